//! Strong type definitions for the Capsule Kernel.
//!
//! Identifiers are newtypes so an agent id can never be passed where a
//! cursor is expected.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::crypto::{PublicKey, Sha256Hash};
use crate::error::CoreError;

/// Prefix carried by every cursor string.
pub const CURSOR_PREFIX: &str = "sha256:";

/// A self-certifying agent identity: lowercase hex of SHA-256(public key).
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AgentId(String);

impl AgentId {
    /// Derive the identity bound to a public key.
    pub fn derive(public_key: &PublicKey) -> Self {
        Self(Sha256Hash::hash(public_key.as_bytes()).to_hex())
    }

    /// Parse a claimed identity. Accepts exactly 64 hex characters and
    /// normalizes to lowercase.
    pub fn parse(s: &str) -> Result<Self, CoreError> {
        if s.len() != 64 || !s.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(CoreError::InvalidAgentId(s.chars().take(80).collect()));
        }
        Ok(Self(s.to_ascii_lowercase()))
    }

    /// The hex string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether a claimed id string names this identity, in any hex case.
    pub fn matches(&self, claimed: &str) -> bool {
        Self::parse(claimed).is_ok_and(|id| id == *self)
    }
}

impl fmt::Debug for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AgentId({})", &self.0[..16])
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for AgentId {
    type Error = CoreError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(&s)
    }
}

impl From<AgentId> for String {
    fn from(id: AgentId) -> Self {
        id.0
    }
}

impl AsRef<str> for AgentId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// A content-addressed state version: `"sha256:" + hex(SHA-256(canonical))`.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Cursor(String);

impl Cursor {
    /// Build a cursor from a digest.
    pub fn from_hash(hash: &Sha256Hash) -> Self {
        Self(format!("{CURSOR_PREFIX}{}", hash.to_hex()))
    }

    /// Parse a cursor, with or without the `sha256:` prefix.
    pub fn parse(s: &str) -> Result<Self, CoreError> {
        let hex_part = s.strip_prefix(CURSOR_PREFIX).unwrap_or(s);
        if hex_part.len() != 64 || !hex_part.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(CoreError::InvalidCursor(s.chars().take(80).collect()));
        }
        Ok(Self(format!("{CURSOR_PREFIX}{}", hex_part.to_ascii_lowercase())))
    }

    /// The full `sha256:<hex>` form.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The bare hex digest, used as the strong HTTP validator.
    pub fn hex(&self) -> &str {
        &self.0[CURSOR_PREFIX.len()..]
    }

    /// Compare against a client-supplied cursor string, ignoring the prefix
    /// and hex case.
    pub fn matches(&self, candidate: &str) -> bool {
        normalize_cursor(candidate) == self.hex()
    }
}

/// Bare lowercase hex of a client-supplied cursor, as used for ETags.
///
/// Does not validate; a malformed input simply never matches a [`Cursor`].
pub fn normalize_cursor(s: &str) -> String {
    s.strip_prefix(CURSOR_PREFIX).unwrap_or(s).to_ascii_lowercase()
}

impl fmt::Debug for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Cursor({}...)", &self.hex()[..12])
    }
}

impl fmt::Display for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for Cursor {
    type Error = CoreError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(&s)
    }
}

impl From<Cursor> for String {
    fn from(c: Cursor) -> Self {
        c.0
    }
}
