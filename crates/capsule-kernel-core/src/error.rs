//! Errors from decoding or verifying primitives.
//!
//! Callers on the write path map these onto [`crate::ReasonCode`]s; they
//! never reach a client as-is.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("signature does not verify")]
    InvalidSignature,

    /// Wrong length, or not a point on the curve.
    #[error("invalid public key")]
    InvalidPublicKey,

    #[error("signature must be 64 bytes")]
    InvalidSignatureLength,

    #[error("invalid hex: {0}")]
    InvalidHex(String),

    #[error("invalid agent id: {0}")]
    InvalidAgentId(String),

    #[error("invalid cursor: {0}")]
    InvalidCursor(String),

    /// A value could not be converted to JSON for canonicalization.
    #[error("encoding: {0}")]
    Encoding(String),
}

pub type Result<T> = std::result::Result<T, CoreError>;
