//! # Capsule Kernel Core
//!
//! Pure primitives for the Capsule Kernel: canonical JSON, cursors, identity,
//! and signed envelopes.
//!
//! This crate contains no I/O, no storage, no networking. It is pure
//! computation over untrusted input.
//!
//! ## Key Types
//!
//! - [`AgentId`] - Self-certifying identity, SHA-256 of a public key
//! - [`Cursor`] - Content address of a canonicalized payload
//! - [`Envelope`] - A signed write binding identity, sequence and payload
//! - [`ReasonCode`] - Machine-readable rejection reason
//!
//! ## Canonicalization
//!
//! Every hash and signature is computed over [`canonicalize`] output. See
//! the [`canonical`] module.

pub mod canonical;
pub mod crypto;
pub mod envelope;
pub mod error;
pub mod reason;
pub mod types;

pub use canonical::{
    canonical_len, canonicalize, canonicalize_serialize, cursor, feed_cursor, signing_digest,
    FeedCursorEntry,
};
pub use crypto::{Keypair, PublicKey, Sha256Hash, Signature};
pub use envelope::{Envelope, SignerRecord, VerifiedEnvelope, SIGNATURE_ALG};
pub use error::{CoreError, Result};
pub use reason::{ReasonCode, ReasonCodes};
pub use types::{normalize_cursor, AgentId, Cursor, CURSOR_PREFIX};
