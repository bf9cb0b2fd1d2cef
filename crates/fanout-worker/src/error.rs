use fanout_client::ClientError;
use fanout_core::RegistryError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("Coordinator error: {0}")]
    Client(#[from] ClientError),

    #[error("Capability error: {0}")]
    Registry(#[from] RegistryError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed child message: {0}")]
    ChildProtocol(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, WorkerError>;
