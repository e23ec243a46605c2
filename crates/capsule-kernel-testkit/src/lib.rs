//! # Capsule Kernel Testkit
//!
//! Testing utilities for the Capsule Kernel.
//!
//! ## Overview
//!
//! This crate provides:
//!
//! - **Golden vectors**: Known envelopes and cursors with expected outputs
//! - **Generators**: Proptest strategies for property-based testing
//! - **Fixtures**: Agents that sign their own envelopes, and payload builders
//!
//! ## Golden Vectors
//!
//! ```rust
//! use capsule_kernel_testkit::vectors::verify_all_vectors;
//!
//! assert!(verify_all_vectors().is_empty());
//! ```
//!
//! ## Property Testing
//!
//! ```rust,ignore
//! use proptest::prelude::*;
//! use capsule_kernel_testkit::generators::capsule_payload;
//!
//! proptest! {
//!     #[test]
//!     fn cursor_is_deterministic(payload in capsule_payload()) {
//!         prop_assert_eq!(cursor(&payload), cursor(&payload.clone()));
//!     }
//! }
//! ```
//!
//! ## Test Fixtures
//!
//! ```rust
//! use capsule_kernel_testkit::fixtures::{minimal_payload, TestAgent};
//!
//! let agent = TestAgent::with_seed(1);
//! let body = agent.body(0, minimal_payload());
//! ```

pub mod fixtures;
pub mod generators;
pub mod vectors;

pub use fixtures::{agents, minimal_payload, TestAgent};
pub use generators::capsule_payload;
pub use vectors::{all_vectors, feed_vectors, verify_all_vectors, GoldenVector};
