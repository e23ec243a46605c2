//! Error types for the Kernel.
//!
//! Rejected writes are not errors: they come back as
//! [`WriteOutcome::Rejected`](crate::WriteOutcome::Rejected). These variants
//! cover reads that cannot be served and infrastructure failures.

use capsule_kernel_core::{AgentId, CoreError};
use capsule_kernel_policy::{DenyReason, PolicyError};
use capsule_kernel_store::StoreError;
use capsule_kernel_sync::SyncError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum KernelError {
    #[error("store: {0}")]
    Store(#[from] StoreError),

    #[error(transparent)]
    Core(#[from] CoreError),

    #[error(transparent)]
    Policy(#[from] PolicyError),

    #[error(transparent)]
    Sync(#[from] SyncError),

    /// Nothing has been accepted for this identity yet.
    #[error("not found: {0}")]
    NotFound(AgentId),

    /// The requester may not read this resource.
    #[error("access denied: {0}")]
    AccessDenied(DenyReason),

    /// Compare-and-swap kept losing to concurrent writers.
    #[error("contention on {key} after {attempts} attempts")]
    Contention { key: String, attempts: u32 },

    /// A stored document failed to decode or violates its own invariants.
    #[error("corrupt state at {key}: {reason}")]
    CorruptState { key: String, reason: String },
}

impl KernelError {
    /// Whether the caller may retry the same request unchanged.
    pub fn is_transient(&self) -> bool {
        matches!(self, KernelError::Store(_) | KernelError::Contention { .. })
    }
}

pub type Result<T> = std::result::Result<T, KernelError>;
