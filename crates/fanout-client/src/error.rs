use fanout_core::{RemoteError, TaskError, TaskId};
use fanout_protocol::ProtocolError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Remote {0}")]
    Remote(#[from] RemoteError),

    #[error("Task {task_id} failed after exhausting its retries: {last_error}")]
    ExhaustedRetries { task_id: TaskId, last_error: String },

    #[error("Invalid task: {0}")]
    Task(#[from] TaskError),

    #[error("Unexpected response: {0}")]
    UnexpectedResponse(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ClientError>;
