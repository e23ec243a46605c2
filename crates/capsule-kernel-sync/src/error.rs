//! Errors a polling client hits when reading responses back.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SyncError {
    /// A required header is missing or malformed.
    #[error("invalid header {name}: {reason}")]
    InvalidHeader { name: &'static str, reason: String },

    /// A response body did not decode.
    #[error("invalid message: {0}")]
    InvalidMessage(String),

    /// A cursor header did not parse.
    #[error(transparent)]
    Core(#[from] capsule_kernel_core::CoreError),
}

impl From<serde_json::Error> for SyncError {
    fn from(e: serde_json::Error) -> Self {
        SyncError::InvalidMessage(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
