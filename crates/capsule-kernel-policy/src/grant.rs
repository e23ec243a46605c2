//! Reader grants and the resource → scope map.
//!
//! A grant authorizes another identity to read a resource. Grants are
//! embedded in the owner's payload under `access_control.grants` and come in
//! two shapes: a bare identity string (legacy: every scope, never expires)
//! or a structured entry with scopes and an optional expiry.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use capsule_kernel_core::AgentId;

use crate::error::{PolicyError, Result};

/// A read permission a grant can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Scope {
    #[serde(rename = "capsule:read")]
    CapsuleRead,
    #[serde(rename = "history:read")]
    HistoryRead,
    #[serde(rename = "verify:read")]
    VerifyRead,
    #[serde(rename = "feed:read")]
    FeedRead,
}

impl Scope {
    pub const ALL: [Scope; 4] = [
        Scope::CapsuleRead,
        Scope::HistoryRead,
        Scope::VerifyRead,
        Scope::FeedRead,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Scope::CapsuleRead => "capsule:read",
            Scope::HistoryRead => "history:read",
            Scope::VerifyRead => "verify:read",
            Scope::FeedRead => "feed:read",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Scope::ALL.into_iter().find(|scope| scope.as_str() == s)
    }
}

/// A readable resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Resource {
    Capsule,
    Head,
    History,
    Verify,
    Feed,
}

impl Resource {
    /// The scope a grant must carry to read this resource.
    ///
    /// Static: a grant scoped only to one resource never authorizes another.
    pub fn required_scope(self) -> Scope {
        match self {
            Resource::Capsule | Resource::Head => Scope::CapsuleRead,
            Resource::History => Scope::HistoryRead,
            Resource::Verify => Scope::VerifyRead,
            Resource::Feed => Scope::FeedRead,
        }
    }
}

/// A structured grant entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScopedGrant {
    pub agent_id: AgentId,
    pub scopes: Vec<Scope>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

/// One entry of `access_control.grants`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Grant {
    /// Legacy form: all scopes, never expires.
    Bare(AgentId),
    Scoped(ScopedGrant),
}

impl Grant {
    /// Parse one grant entry strictly.
    pub fn from_value(value: &Value) -> Result<Self> {
        serde_json::from_value(value.clone()).map_err(|e| PolicyError::InvalidGrant(e.to_string()))
    }

    /// The grantee.
    pub fn agent_id(&self) -> &AgentId {
        match self {
            Grant::Bare(id) => id,
            Grant::Scoped(g) => &g.agent_id,
        }
    }

    /// Whether the grant is expired at `now`. Bare grants never expire.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        match self {
            Grant::Bare(_) => false,
            Grant::Scoped(g) => g.expires_at.map_or(false, |exp| exp <= now),
        }
    }

    /// Whether the grant carries a scope. Bare grants carry all scopes.
    pub fn has_scope(&self, scope: Scope) -> bool {
        match self {
            Grant::Bare(_) => true,
            Grant::Scoped(g) => g.scopes.contains(&scope),
        }
    }
}

/// Visibility and grants as declared by a payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessPolicy {
    pub public: bool,
    pub grants: Vec<Grant>,
}

impl Default for AccessPolicy {
    fn default() -> Self {
        Self {
            public: true,
            grants: Vec::new(),
        }
    }
}

impl AccessPolicy {
    /// Extract the policy from a stored payload.
    ///
    /// Public unless `access_control.public` is exactly `false`. Grant
    /// entries that do not parse are skipped; the schema validator keeps
    /// them out of accepted payloads.
    pub fn from_payload(payload: &Value) -> Self {
        let Some(ac) = payload.get("access_control") else {
            return Self::default();
        };
        let public = !matches!(ac.get("public"), Some(Value::Bool(false)));
        let grants = ac
            .get("grants")
            .and_then(Value::as_array)
            .map(|entries| entries.iter().filter_map(|g| Grant::from_value(g).ok()).collect())
            .unwrap_or_default();
        Self { public, grants }
    }

    /// A private policy with the given grants.
    pub fn private(grants: Vec<Grant>) -> Self {
        Self {
            public: false,
            grants,
        }
    }
}
