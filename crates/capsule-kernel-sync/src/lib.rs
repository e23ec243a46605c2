//! # Capsule Kernel Sync
//!
//! The polling surface: how clients learn that state changed and fetch it
//! cheaply.
//!
//! ## Model
//!
//! Clients poll a head pointer, compare its cursor with the one they hold,
//! and fetch the full document only when it moved. Full reads honour
//! `If-None-Match` against a strong validator derived from the cursor.
//!
//! ```text
//! Client                                Kernel
//!   |-------- head (known cursor) ------->|
//!   |<------- cursor, changed, ttl -------|
//!   |-------- read (If-None-Match) ------>|
//!   |<------- 304 | 200 + payload --------|
//!   |-------- history?since=cursor ------>|
//!   |<------- delta | resync_required ----|
//! ```
//!
//! This crate holds the conditional-read logic and the wire message types;
//! HTTP routing itself lives outside the kernel.

pub mod conditional;
pub mod error;
pub mod messages;

pub use conditional::{
    etag, if_none_match, CacheHeaders, CachePolicy, Conditional, CACHE_CONTROL, ETAG,
    X_CAPSULE_CURSOR, X_CAPSULE_PREV_CURSOR,
};
pub use error::{Result, SyncError};
pub use messages::{
    decode, encode, FeedHeadResponse, FeedItemError, HeadResponse, HistoryEntry, HistoryResponse,
    QuotaSnapshot, WriteResponse,
};
