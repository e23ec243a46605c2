//! Read authorization for capsules, history, verification reports and feeds.

use chrono::{DateTime, Utc};

use capsule_kernel_core::AgentId;

use crate::grant::{AccessPolicy, Resource};

/// Why a read was denied.
///
/// The caller decides whether to surface this as "not found" (hiding
/// existence) or "forbidden".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DenyReason {
    AnonymousRequester,
    NoMatchingGrant,
    GrantExpired,
    ScopeNotGranted,
}

impl DenyReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DenyReason::AnonymousRequester => "anonymous_requester",
            DenyReason::NoMatchingGrant => "no_matching_grant",
            DenyReason::GrantExpired => "grant_expired",
            DenyReason::ScopeNotGranted => "scope_not_granted",
        }
    }
}

impl std::fmt::Display for DenyReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessDecision {
    Allow,
    Deny(DenyReason),
}

impl AccessDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, AccessDecision::Allow)
    }
}

/// Decide whether `requester` may read `resource` owned by `owner`.
///
/// Public resources and the owner always pass. Otherwise grants are scanned
/// in order and the first grant for the requester that is unexpired and
/// carries the required scope allows the read. When no grant allows it, the
/// most specific failure among the requester's grants is reported.
pub fn authorize(
    policy: &AccessPolicy,
    owner: &AgentId,
    requester: Option<&AgentId>,
    resource: Resource,
    now: DateTime<Utc>,
) -> AccessDecision {
    if policy.public {
        return AccessDecision::Allow;
    }
    let Some(requester) = requester else {
        return AccessDecision::Deny(DenyReason::AnonymousRequester);
    };
    if requester == owner {
        return AccessDecision::Allow;
    }

    let scope = resource.required_scope();
    let mut reason = DenyReason::NoMatchingGrant;
    for grant in policy.grants.iter().filter(|g| g.agent_id() == requester) {
        if grant.is_expired(now) {
            reason = DenyReason::GrantExpired;
            continue;
        }
        if !grant.has_scope(scope) {
            if reason == DenyReason::NoMatchingGrant {
                reason = DenyReason::ScopeNotGranted;
            }
            continue;
        }
        return AccessDecision::Allow;
    }
    AccessDecision::Deny(reason)
}
