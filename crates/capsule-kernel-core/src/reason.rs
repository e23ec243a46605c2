//! Machine-readable rejection reasons.
//!
//! Every rejected write reports an ordered, deduplicated list of these codes.
//! Schema violations carry their own `<kind>:<path>` code string.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// A single rejection reason.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ReasonCode {
    /// Raw body exceeds the tier's byte cap (checked before parsing).
    PayloadTooLarge,
    /// Body is not valid JSON.
    InvalidJson,
    /// Body parsed but is not a well-formed envelope.
    InvalidEnvelope,
    /// `signature_alg` missing or not `ed25519`.
    BadSignatureAlg,
    /// Public key is not a valid Ed25519 point or wrong length.
    BadPublicKey,
    /// Signature malformed or does not verify.
    BadSignature,
    /// Claimed identity does not match key, path, or payload.
    AgentIdMismatch,
    /// Sequence number behind the stored one (or negative).
    BadSeq,
    /// Sequence number equal to the stored one.
    ReplaySeq,
    /// A schema violation, already formatted as `<kind>:<path>`.
    Schema(String),
    /// The safety scanner produced at least one finding.
    UnsafeContent,
    /// Canonical payload exceeds the tier's cap.
    CapsuleTooLarge,
    /// Per-identity daily write quota is used up.
    WriteQuotaExceeded,
    /// Per-IP daily new-identity quota is used up.
    NewAgentIpQuotaExceeded,
    /// One or more feed items failed structural validation.
    InvalidItems,
    /// Two items in one feed batch share an id.
    DuplicateItemId,
}

impl ReasonCode {
    /// The wire form of the code.
    pub fn as_str(&self) -> &str {
        match self {
            ReasonCode::PayloadTooLarge => "payload_too_large",
            ReasonCode::InvalidJson => "invalid_json",
            ReasonCode::InvalidEnvelope => "invalid_envelope",
            ReasonCode::BadSignatureAlg => "bad_signature_alg",
            ReasonCode::BadPublicKey => "bad_public_key",
            ReasonCode::BadSignature => "bad_signature",
            ReasonCode::AgentIdMismatch => "agent_id_mismatch",
            ReasonCode::BadSeq => "bad_seq",
            ReasonCode::ReplaySeq => "replay_seq",
            ReasonCode::Schema(code) => code,
            ReasonCode::UnsafeContent => "unsafe_content",
            ReasonCode::CapsuleTooLarge => "capsule_too_large",
            ReasonCode::WriteQuotaExceeded => "write_quota_exceeded",
            ReasonCode::NewAgentIpQuotaExceeded => "new_agent_ip_quota_exceeded",
            ReasonCode::InvalidItems => "invalid_items",
            ReasonCode::DuplicateItemId => "duplicate_item_id",
        }
    }

    /// Parse the wire form. Unknown strings are treated as schema codes.
    pub fn parse(s: &str) -> Self {
        match s {
            "payload_too_large" => ReasonCode::PayloadTooLarge,
            "invalid_json" => ReasonCode::InvalidJson,
            "invalid_envelope" => ReasonCode::InvalidEnvelope,
            "bad_signature_alg" => ReasonCode::BadSignatureAlg,
            "bad_public_key" => ReasonCode::BadPublicKey,
            "bad_signature" => ReasonCode::BadSignature,
            "agent_id_mismatch" => ReasonCode::AgentIdMismatch,
            "bad_seq" => ReasonCode::BadSeq,
            "replay_seq" => ReasonCode::ReplaySeq,
            "unsafe_content" => ReasonCode::UnsafeContent,
            "capsule_too_large" => ReasonCode::CapsuleTooLarge,
            "write_quota_exceeded" => ReasonCode::WriteQuotaExceeded,
            "new_agent_ip_quota_exceeded" => ReasonCode::NewAgentIpQuotaExceeded,
            "invalid_items" => ReasonCode::InvalidItems,
            "duplicate_item_id" => ReasonCode::DuplicateItemId,
            other => ReasonCode::Schema(other.to_string()),
        }
    }

    /// Whether retrying later (without changing the request) can succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ReasonCode::WriteQuotaExceeded | ReasonCode::NewAgentIpQuotaExceeded
        )
    }
}

impl fmt::Display for ReasonCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for ReasonCode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for ReasonCode {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(ReasonCode::parse(&s))
    }
}

/// An ordered, deduplicated list of reason codes (first occurrence wins).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReasonCodes(Vec<ReasonCode>);

impl ReasonCodes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a code unless it is already present.
    pub fn push(&mut self, code: ReasonCode) {
        if !self.0.contains(&code) {
            self.0.push(code);
        }
    }

    pub fn extend<I: IntoIterator<Item = ReasonCode>>(&mut self, codes: I) {
        for code in codes {
            self.push(code);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn contains(&self, code: &ReasonCode) -> bool {
        self.0.contains(code)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ReasonCode> {
        self.0.iter()
    }

    /// Wire strings, in order.
    pub fn to_strings(&self) -> Vec<String> {
        self.0.iter().map(|c| c.as_str().to_string()).collect()
    }
}

impl From<ReasonCode> for ReasonCodes {
    fn from(code: ReasonCode) -> Self {
        Self(vec![code])
    }
}

impl FromIterator<ReasonCode> for ReasonCodes {
    fn from_iter<I: IntoIterator<Item = ReasonCode>>(iter: I) -> Self {
        let mut codes = Self::new();
        codes.extend(iter);
        codes
    }
}
