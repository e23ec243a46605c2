//! # Capsule Kernel Store
//!
//! Storage abstraction for the Capsule Kernel: a key-value interface with
//! per-key expiry and single-key compare-and-swap, plus SQLite and
//! in-memory implementations.
//!
//! ## Key Types
//!
//! - [`KvStore`] - The async trait for all storage operations
//! - [`KvStoreExt`] - JSON helpers available on every store
//! - [`SqliteKv`] - SQLite-based persistent storage
//! - [`MemoryKv`] - In-memory storage
//! - [`PutResult`] - Outcome of a conditional write
//!
//! ## Usage
//!
//! ```rust,no_run
//! use capsule_kernel_store::{KvStore, KvStoreExt, PutResult, SqliteKv};
//!
//! async fn example() -> capsule_kernel_store::Result<()> {
//!     let store = SqliteKv::open("kernel.db")?;
//!
//!     let current = store.get_json::<serde_json::Value>("capsule:abc").await?;
//!     let expected = current.as_ref().map(|c| c.version);
//!     match store
//!         .put_json_if_version("capsule:abc", &serde_json::json!({}), expected, None)
//!         .await?
//!     {
//!         PutResult::Written { .. } => {}
//!         PutResult::Conflict { .. } => { /* re-read and retry */ }
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Design Notes
//!
//! - **Versions never repeat**: every write draws from one counter, so a
//!   version observed on a read identifies exactly one value.
//! - **Expiry is lazy**: expired entries read as absent; purging is optional.

pub mod error;
pub mod memory;
pub mod migration;
pub mod sqlite;
pub mod traits;

pub use error::{Result, StoreError};
pub use memory::MemoryKv;
pub use sqlite::SqliteKv;
pub use traits::{Entry, KvStore, KvStoreExt, PutResult, Versioned};
