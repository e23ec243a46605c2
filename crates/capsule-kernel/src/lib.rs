//! # Capsule Kernel
//!
//! Signed, versioned agent state over plain HTTP polling.
//!
//! ## Overview
//!
//! Agents publish state as signed envelopes and readers poll for it with a
//! cursor and conditional GETs. Two flavours share one mechanism:
//!
//! - **Capsules**: one identity-owned memory document per agent
//! - **Feeds**: a publisher-owned, bounded collection of content items
//!
//! Every accepted write becomes a new version addressed by the SHA-256 of
//! its canonical payload. State lives in an eventually-consistent key-value
//! store with single-key compare-and-swap and nothing more.
//!
//! ## Key Concepts
//!
//! - **Identity**: `agent_id` is the SHA-256 of the agent's Ed25519 public key.
//! - **Sequence**: each identity's writes carry strictly increasing `seq`.
//!   Equal is a replay, lower is out of order; both are rejected.
//! - **Cursor**: `sha256:<hex>` of the canonical payload, also the `ETag`.
//! - **Rejection**: expected failures are values carrying reason codes,
//!   never errors.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use capsule_kernel::{Kernel, KernelConfig, WriteRequest};
//! use capsule_kernel::core::{AgentId, Envelope, Keypair};
//! use capsule_kernel::store::SqliteKv;
//! use serde_json::json;
//!
//! async fn example() -> capsule_kernel::Result<()> {
//!     let store = SqliteKv::open("kernel.db")?;
//!     let kernel = Kernel::new(store, KernelConfig::default());
//!
//!     let keypair = Keypair::generate();
//!     let agent_id = AgentId::derive(&keypair.public_key());
//!     let envelope = Envelope::sign(&keypair, 0, json!({"schema": "agent-capsule/v1"}));
//!
//!     let outcome = kernel
//!         .write_capsule(&WriteRequest::new(agent_id.clone(), envelope.to_bytes()))
//!         .await?;
//!     println!("{}", serde_json::to_string(&outcome.to_response()).unwrap_or_default());
//!
//!     let read = kernel.read(&agent_id, None, None).await?;
//!     assert_eq!(read.status(), 200);
//!     Ok(())
//! }
//! ```
//!
//! ## Re-exports
//!
//! - `capsule_kernel::core` - canonical JSON, cursors, identity, envelopes
//! - `capsule_kernel::policy` - schema, safety scan, access control, limits
//! - `capsule_kernel::store` - key-value storage, SQLite and in-memory
//! - `capsule_kernel::sync` - conditional reads and wire messages

pub mod capsule;
pub mod config;
pub mod error;
pub mod feed;
pub mod history;
pub mod kernel;
pub mod keys;
pub mod pairing;
pub mod quota;
pub mod verify;

pub use capsule_kernel_core as core;
pub use capsule_kernel_policy as policy;
pub use capsule_kernel_store as store;
pub use capsule_kernel_sync as sync;

pub use capsule::{
    check_seq, Accepted, CapsuleDocument, Rejection, StateRecord, StateStore, WriteOutcome,
    WriteRequest,
};
pub use config::{FeedConfig, KernelConfig, PairingConfig};
pub use error::{KernelError, Result};
pub use feed::{FeedDocument, FeedItem, FeedStore, Provenance};
pub use history::{HistoryLog, HistoryVersion, Since};
pub use kernel::{Clock, Kernel};
pub use pairing::{PairingOutcome, PairingQueue, PairingSlot};
pub use quota::{QuotaCheck, QuotaEngine};
pub use verify::{AuthStatus, ChainVerifier, LevelReport, VerifyLevel, VerifyReport};

pub use capsule_kernel_core::{AgentId, Cursor, Envelope, Keypair, ReasonCode};
pub use capsule_kernel_policy::Tier;
