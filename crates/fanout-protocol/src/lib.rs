mod message;
mod codec;

pub use message::{Envelope, EnvelopeKind, Request};
pub use codec::EnvelopeCodec;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Invalid envelope kind: {0}")]
    InvalidEnvelopeKind(u8),

    #[error("Envelope too large: {0} bytes")]
    EnvelopeTooLarge(usize),

    #[error("Empty frame")]
    EmptyFrame,

    #[error("Encode error: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    #[error("Decode error: {0}")]
    Decode(#[from] rmp_serde::decode::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Maximum envelope size (kind byte + payload): 64MB
pub const MAX_ENVELOPE_SIZE: usize = 64 * 1024 * 1024;
