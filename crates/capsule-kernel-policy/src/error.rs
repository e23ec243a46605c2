//! Error types for the policy module.

use thiserror::Error;

/// Errors that can occur while interpreting policy inputs.
#[derive(Debug, Error)]
pub enum PolicyError {
    /// Grant entry has neither the bare nor the scoped shape.
    #[error("invalid grant: {0}")]
    InvalidGrant(String),

    /// URL failed to parse or uses a disallowed scheme.
    #[error("invalid url: {0}")]
    InvalidUrl(String),

    /// URL host is a loopback, private, or link-local literal.
    #[error("url resolves to a non-public address: {0}")]
    NonPublicAddress(String),

    /// Core error.
    #[error("core error: {0}")]
    Core(#[from] capsule_kernel_core::CoreError),
}

/// Result type for policy operations.
pub type Result<T> = std::result::Result<T, PolicyError>;
