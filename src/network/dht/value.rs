//! The immutable, publisher-signed DHT value (spec 3, 4.3, 6).
//!
//! Every payload begins with a 4-byte type tag and a 4-byte body length,
//! followed by the body and a trailing ML-DSA-87 signature over
//! `tag || length || body` (spec 6). [`DhtValue`] additionally carries the
//! publisher fingerprint, publish timestamp, and TTL as DHT-envelope
//! metadata alongside the signed payload bytes.

use crate::crypto::primitives::SigningPublicKey;
use crate::types::Fingerprint;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u32)]
pub enum PayloadTag {
    PublicKey = 1,
    NameForward = 2,
    NameReverse = 3,
    Presence = 4,
    Profile = 5,
    Spillway = 6,
    GroupMeta = 7,
    GroupKeyCapsule = 8,
    Receipt = 9,
    /// Short-lived ICE candidate exchange record (spec 4.4 tier 2); not
    /// one of spec 4.3's named record types but keyed and signed the same
    /// way, and pruned by the same TTL/expiry mechanism.
    IceRendezvous = 10,
    /// Self-encrypted contact-directory summary, republished periodically
    /// by the contact-sync worker for multi-device discovery (spec 4.5).
    ContactDirectory = 11,
}

impl PayloadTag {
    fn from_u32(v: u32) -> Option<Self> {
        Some(match v {
            1 => Self::PublicKey,
            2 => Self::NameForward,
            3 => Self::NameReverse,
            4 => Self::Presence,
            5 => Self::Profile,
            6 => Self::Spillway,
            7 => Self::GroupMeta,
            8 => Self::GroupKeyCapsule,
            9 => Self::Receipt,
            10 => Self::IceRendezvous,
            11 => Self::ContactDirectory,
            _ => return None,
        })
    }
}

#[derive(Debug, Error)]
pub enum DhtError {
    #[error("malformed DHT payload")]
    Malformed,
    #[error("unrecognized payload tag")]
    UnknownTag,
    #[error("signature verification failed")]
    Auth,
    #[error("no live value found at key")]
    NotFound,
    #[error("network error: {0}")]
    Network(String),
    #[error("operation exceeded its deadline")]
    Timeout,
    #[error("rejected: a value already exists at this key from a different publisher")]
    OwnerConflict,
}

/// Signed `tag || length || body || signature` bytes, the on-wire payload
/// format of spec 6.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignedPayload {
    pub tag: PayloadTag,
    pub body: Vec<u8>,
    pub signature: Vec<u8>,
}

impl SignedPayload {
    fn signed_bytes(tag: PayloadTag, body: &[u8]) -> Vec<u8> {
        let mut buf = Vec::with_capacity(8 + body.len());
        buf.extend_from_slice(&(tag as u32).to_be_bytes());
        buf.extend_from_slice(&(body.len() as u32).to_be_bytes());
        buf.extend_from_slice(body);
        buf
    }

    pub fn sign(
        tag: PayloadTag,
        body: Vec<u8>,
        signer: &crate::crypto::primitives::SigningKeypair,
    ) -> Self {
        let signature = signer.sign(&Self::signed_bytes(tag, &body));
        Self {
            tag,
            body,
            signature,
        }
    }

    /// Reject any payload lacking a valid publisher signature — spec 9's
    /// unambiguous resolution of the "were unsigned writes ever accepted"
    /// open question: they are not, including values already in a local
    /// cache.
    pub fn verify(&self, publisher_key: &SigningPublicKey) -> Result<(), DhtError> {
        let signed = Self::signed_bytes(self.tag, &self.body);
        publisher_key
            .verify(&signed, &self.signature)
            .map_err(|_| DhtError::Auth)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DhtValue {
    pub payload: SignedPayload,
    pub publisher: Fingerprint,
    pub publish_timestamp: chrono::DateTime<chrono::Utc>,
    pub ttl: Duration,
}

impl DhtValue {
    pub fn is_expired(&self, now: chrono::DateTime<chrono::Utc>) -> bool {
        let age = now - self.publish_timestamp;
        age.to_std().map(|a| a > self.ttl).unwrap_or(false)
    }

    pub fn verify(&self, publisher_key: &SigningPublicKey) -> Result<(), DhtError> {
        self.payload.verify(publisher_key)
    }
}

pub fn tag_from_u32(v: u32) -> Result<PayloadTag, DhtError> {
    PayloadTag::from_u32(v).ok_or(DhtError::UnknownTag)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::primitives::SigningKeypair;

    #[test]
    fn verifies_against_correct_publisher() {
        let signer = SigningKeypair::generate_from_seed(&[1u8; 32]).unwrap();
        let payload = SignedPayload::sign(PayloadTag::Presence, b"hello".to_vec(), &signer);
        payload.verify(signer.public_key()).unwrap();
    }

    #[test]
    fn fails_against_wrong_publisher() {
        let signer = SigningKeypair::generate_from_seed(&[2u8; 32]).unwrap();
        let impostor = SigningKeypair::generate_from_seed(&[3u8; 32]).unwrap();
        let payload = SignedPayload::sign(PayloadTag::Presence, b"hello".to_vec(), &signer);
        assert!(payload.verify(impostor.public_key()).is_err());
    }

    #[test]
    fn fails_on_tampered_body() {
        let signer = SigningKeypair::generate_from_seed(&[4u8; 32]).unwrap();
        let mut payload = SignedPayload::sign(PayloadTag::Presence, b"hello".to_vec(), &signer);
        payload.body[0] ^= 0xFF;
        assert!(payload.verify(signer.public_key()).is_err());
    }
}
