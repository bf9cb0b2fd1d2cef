use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TaskError {
    #[error("max_time must be a non-negative integer number of seconds (got {0})")]
    InvalidMaxTime(i64),

    #[error("max_time of {actual}s exceeds the ceiling of {max}s")]
    MaxTimeTooLarge { max: i64, actual: i64 },

    #[error("Task already in flight: {0}")]
    AlreadyInFlight(String),

    #[error("Method name is empty")]
    EmptyMethod,

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, TaskError>;

/// Category of a failure raised on the far side of an RPC call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemoteErrorKind {
    /// Method name unknown, private, reserved or not callable.
    Protocol,
    /// Arguments rejected before any state changed.
    Validation,
    /// Arguments could not be decoded into the expected shape.
    BadArguments,
    /// The invoked method itself failed.
    Internal,
}

impl RemoteErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RemoteErrorKind::Protocol => "protocol",
            RemoteErrorKind::Validation => "validation",
            RemoteErrorKind::BadArguments => "bad_arguments",
            RemoteErrorKind::Internal => "internal",
        }
    }
}

/// An error carried back in an ERR envelope and re-raised by the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteError {
    pub kind: RemoteErrorKind,
    pub message: String,
}

impl RemoteError {
    pub fn new(kind: RemoteErrorKind, message: impl Into<String>) -> Self {
        RemoteError {
            kind,
            message: message.into(),
        }
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        Self::new(RemoteErrorKind::Protocol, message)
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(RemoteErrorKind::Validation, message)
    }

    pub fn bad_arguments(message: impl Into<String>) -> Self {
        Self::new(RemoteErrorKind::BadArguments, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(RemoteErrorKind::Internal, message)
    }
}

impl fmt::Display for RemoteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} error: {}", self.kind.as_str(), self.message)
    }
}

impl std::error::Error for RemoteError {}

impl From<TaskError> for RemoteError {
    fn from(err: TaskError) -> Self {
        match err {
            TaskError::SerializationError(e) => RemoteError::bad_arguments(e.to_string()),
            other => RemoteError::validation(other.to_string()),
        }
    }
}
