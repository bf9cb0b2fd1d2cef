use fanout_core::{RegistryError, RemoteError, TaskError};
use fanout_protocol::ProtocolError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ServerError {
    #[error("Task rejected: {0}")]
    Task(#[from] TaskError),

    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, ServerError>;

impl From<ServerError> for RemoteError {
    fn from(err: ServerError) -> Self {
        match err {
            ServerError::Task(e) => e.into(),
            ServerError::Registry(e) => e.into(),
            other => RemoteError::internal(other.to_string()),
        }
    }
}
