//! # Capsule Kernel Policy
//!
//! Pure policy checks applied to untrusted payloads before they are accepted,
//! and to stored payloads when they are read.
//!
//! - [`schema`] - closed-world `agent-capsule/v1` validation
//! - [`safety`] - deterministic content scan
//! - [`access`] and [`grant`] - visibility and scoped reader grants
//! - [`limits`] - tier-dependent limits
//! - [`urls`] - URL parsing with a guard against non-public hosts
//!
//! Nothing here performs I/O. Every function takes the current time or the
//! tier limits as an explicit argument.

pub mod access;
pub mod error;
pub mod grant;
pub mod limits;
pub mod safety;
pub mod schema;
pub mod urls;

pub use access::{authorize, AccessDecision, DenyReason};
pub use error::{PolicyError, Result};
pub use grant::{AccessPolicy, Grant, Resource, Scope, ScopedGrant};
pub use limits::{Tier, TierLimits};
pub use safety::{scan, Finding, FindingKind, SafetyConfig};
pub use schema::{validate_capsule, ValidationResult, Violation, ViolationKind, SCHEMA_ID};
pub use urls::{parse_http_url, validate_public_url, MAX_URL_LEN};
