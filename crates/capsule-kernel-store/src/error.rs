//! Store errors.
//!
//! A compare-and-swap miss is not an error; see [`crate::PutResult`].

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite: {0}")]
    Database(#[from] rusqlite::Error),

    /// A stored value did not decode as the expected document.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// A writer panicked while holding the backend lock.
    #[error("store lock poisoned: {0}")]
    Poisoned(String),

    /// A `spawn_blocking` task was cancelled or panicked.
    #[error("blocking task failed: {0}")]
    Task(String),
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;
