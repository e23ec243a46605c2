//! Signed write envelopes and their verification.
//!
//! An envelope is verified, then discarded: only the payload (and, for the
//! history ledger, the compact signer record) survive acceptance.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::canonical::signing_digest;
use crate::crypto::{Keypair, PublicKey, Signature};
use crate::error::CoreError;
use crate::reason::ReasonCode;
use crate::types::AgentId;

/// The only accepted signature scheme. There is no fallback.
pub const SIGNATURE_ALG: &str = "ed25519";

/// An envelope as received on the wire, before any verification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Envelope {
    pub agent_id: String,
    pub public_key: String,
    pub seq: i64,
    pub signature: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature_alg: Option<String>,
    pub payload: Value,
}

impl Envelope {
    /// Parse a raw body.
    ///
    /// Returns `invalid_json` if the bytes are not JSON at all and
    /// `invalid_envelope` if they are JSON of the wrong shape.
    pub fn parse(body: &[u8]) -> Result<Self, ReasonCode> {
        let value: Value = serde_json::from_slice(body).map_err(|_| ReasonCode::InvalidJson)?;
        serde_json::from_value(value).map_err(|_| ReasonCode::InvalidEnvelope)
    }

    /// Build and sign an envelope.
    pub fn sign(keypair: &Keypair, seq: i64, payload: Value) -> Self {
        let public_key = keypair.public_key();
        let agent_id = AgentId::derive(&public_key);
        let digest = signing_digest(&agent_id, seq, &payload);
        let signature = keypair.sign_digest(&digest);

        Self {
            agent_id: agent_id.to_string(),
            public_key: public_key.to_hex(),
            seq,
            signature: signature.to_hex(),
            signature_alg: Some(SIGNATURE_ALG.to_string()),
            payload,
        }
    }

    /// Serialize for transport.
    pub fn to_bytes(&self) -> Vec<u8> {
        serde_json::to_vec(self).unwrap_or_default()
    }

    /// Verify self-certification and the signature.
    ///
    /// Atomic: either every check passes and a [`VerifiedEnvelope`] is
    /// returned, or the first failing check's code is returned.
    pub fn verify(self) -> Result<VerifiedEnvelope, ReasonCode> {
        match self.signature_alg.as_deref() {
            Some(SIGNATURE_ALG) => {}
            _ => return Err(ReasonCode::BadSignatureAlg),
        }

        let claimed = AgentId::parse(&self.agent_id).map_err(|_| ReasonCode::InvalidEnvelope)?;
        let (public_key, signature) = check_signer(
            &claimed,
            &self.public_key,
            &self.signature,
            self.seq,
            &self.payload,
        )?;

        Ok(VerifiedEnvelope {
            agent_id: claimed,
            public_key,
            signature,
            seq: self.seq,
            payload: self.payload,
        })
    }
}

/// An envelope whose identity binding and signature have been checked.
#[derive(Debug, Clone)]
pub struct VerifiedEnvelope {
    pub agent_id: AgentId,
    pub public_key: PublicKey,
    pub signature: Signature,
    pub seq: i64,
    pub payload: Value,
}

impl VerifiedEnvelope {
    /// The compact record retained alongside a history version.
    pub fn signer(&self) -> SignerRecord {
        SignerRecord {
            public_key: self.public_key.to_hex(),
            signature: self.signature.to_hex(),
        }
    }
}

/// Public key and signature retained per accepted version so that a later
/// audit can re-verify the write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignerRecord {
    pub public_key: String,
    pub signature: String,
}

impl SignerRecord {
    /// Re-verify this signer against an identity, sequence and payload.
    pub fn verify(&self, agent_id: &AgentId, seq: i64, payload: &Value) -> Result<(), ReasonCode> {
        check_signer(agent_id, &self.public_key, &self.signature, seq, payload).map(|_| ())
    }
}

/// Key binding first, then the signature over the signing digest.
fn check_signer(
    agent_id: &AgentId,
    public_key: &str,
    signature: &str,
    seq: i64,
    payload: &Value,
) -> Result<(PublicKey, Signature), ReasonCode> {
    let public_key = PublicKey::from_hex(public_key).map_err(|_| ReasonCode::BadPublicKey)?;
    if &AgentId::derive(&public_key) != agent_id {
        return Err(ReasonCode::AgentIdMismatch);
    }
    let signature = Signature::from_hex(signature).map_err(|_| ReasonCode::BadSignature)?;
    match public_key.verify_digest(&signing_digest(agent_id, seq, payload), &signature) {
        Ok(()) => Ok((public_key, signature)),
        Err(CoreError::InvalidPublicKey) => Err(ReasonCode::BadPublicKey),
        Err(_) => Err(ReasonCode::BadSignature),
    }
}
