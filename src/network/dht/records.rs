//! Typed payload bodies carried inside a [`super::value::SignedPayload`],
//! one per [`super::value::PayloadTag`] (spec 4.3). Each record is
//! serialized with `bincode` to form the `body` bytes that get signed and
//! stored; the tag alone tells a reader which of these to deserialize into.

use crate::crypto::primitives::{EncryptionPublicKey, SigningPublicKey};
use crate::types::Fingerprint;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// `dna:key:<fingerprint>` — a node's long-term public keys. The record a
/// recipient must fetch before it can encrypt to, or verify a signature
/// from, a given fingerprint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublicKeyRecord {
    pub fingerprint: Fingerprint,
    pub signing_public: Vec<u8>,
    pub encryption_public: Vec<u8>,
}

impl PublicKeyRecord {
    pub fn new(fingerprint: Fingerprint, signing: &SigningPublicKey, encryption: &EncryptionPublicKey) -> Self {
        Self {
            fingerprint,
            signing_public: signing.as_bytes().to_vec(),
            encryption_public: encryption.as_bytes().to_vec(),
        }
    }

    pub fn signing_key(&self) -> SigningPublicKey {
        SigningPublicKey::from_bytes(self.signing_public.clone())
    }

    pub fn encryption_key(&self) -> EncryptionPublicKey {
        EncryptionPublicKey::from_bytes(self.encryption_public.clone())
    }
}

/// `dna:name:<name>` — first-writer-wins human-readable name -> fingerprint
/// mapping. Publisher of the record at this key is, by construction, the
/// name's sole owner (spec 4.3's at-most-one-owner invariant).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NameForwardRecord {
    pub name: String,
    pub fingerprint: Fingerprint,
}

/// Reverse pointer stored alongside a node's public key record, so a peer
/// who only has a fingerprint can discover the human-readable name that
/// currently forwards to it, if any.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NameReverseRecord {
    pub fingerprint: Fingerprint,
    pub name: String,
}

/// `dna:presence:<fingerprint>` — short-TTL online/offline beacon refreshed
/// by the presence worker (spec 4.5).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PresenceRecord {
    pub fingerprint: Fingerprint,
    pub addr_hints: Vec<String>,
    pub last_refreshed: chrono::DateTime<chrono::Utc>,
}

/// `dna:profile:<fingerprint>` — user-editable display metadata, never
/// interpreted by the engine beyond storage and retrieval.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileRecord {
    pub fingerprint: Fingerprint,
    pub display_name: Option<String>,
    pub status_text: Option<String>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

/// `dna:inbox:<fingerprint>` — one queued envelope for an offline
/// recipient. Unlike the other record types this key holds a bounded
/// multiset rather than a single current value: each queued envelope is
/// published and signed independently by the sender, and any reader with
/// the recipient's key can attempt trial-decapsulation against every entry
/// still within its TTL.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpillwayRecord {
    pub recipient: Fingerprint,
    pub envelope_bytes: Vec<u8>,
    pub queued_at: chrono::DateTime<chrono::Utc>,
}

/// `dna:group:<group id>` — group membership roster and metadata, signed by
/// whichever member currently holds ownership.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupMetaRecord {
    pub group_id: Uuid,
    pub name: String,
    pub creator: Fingerprint,
    pub members: Vec<Fingerprint>,
    pub active_gsk_id: Uuid,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

/// `dna:gsk:<group id><member fingerprint>` — the current group symmetric
/// key, KEM-wrapped for one specific member. Rotated (a fresh record
/// published per remaining member) whenever membership changes (spec 4.5).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupKeyCapsuleRecord {
    pub group_id: Uuid,
    pub member: Fingerprint,
    pub gsk_id: Uuid,
    pub kem_ciphertext: Vec<u8>,
    pub wrapped_key: Vec<u8>,
}

/// Delivery/read receipt, addressed by `(sender, send_timestamp,
/// content_hash)` rather than a message id, since the DHT has no concept
/// of the sender's local message store (spec 9's receipt-schema open
/// question, resolved this way).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReceiptRecord {
    pub sender: Fingerprint,
    pub send_timestamp: chrono::DateTime<chrono::Utc>,
    pub content_hash: [u8; 32],
    pub kind: ReceiptRecordKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReceiptRecordKind {
    Delivered,
    Read,
}

/// One publisher's candidate list for an in-progress ICE exchange (spec
/// 4.4 tier 2). Both sides publish their own `IceRendezvousRecord` at the
/// same [`super::keys::ice_rendezvous_record`] key; each reads the other's
/// entry to run connectivity checks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IceRendezvousRecord {
    pub publisher: Fingerprint,
    pub candidates: Vec<IceCandidateRecord>,
    pub published_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct IceCandidateRecord {
    pub host: bool,
    pub addr: std::net::SocketAddr,
}

/// `dna:contacts:<fingerprint>` — a self-encrypted contact-directory
/// summary, republished by the contact-sync worker (spec 4.5) so other
/// devices sharing this identity can discover its contact list. The body
/// is a 1:1 envelope (spec 4.2) addressed to the identity's own encryption
/// key, so only a device holding the matching decapsulation key can read
/// the fingerprint list inside.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContactDirectoryRecord {
    pub fingerprint: Fingerprint,
    pub encrypted_envelope: Vec<u8>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::primitives::{EncryptionKeypair, SigningKeypair};

    #[test]
    fn public_key_record_round_trips_through_bincode() {
        let signing = SigningKeypair::generate_from_seed(&[9u8; 32]).unwrap();
        let encryption = EncryptionKeypair::generate_from_seed(&[9u8; 32]).unwrap();
        let fp = Fingerprint::parse(&"e".repeat(128)).unwrap();
        let record = PublicKeyRecord::new(fp.clone(), signing.public_key(), encryption.public_key());
        let bytes = bincode::serialize(&record).unwrap();
        let back: PublicKeyRecord = bincode::deserialize(&bytes).unwrap();
        assert_eq!(back.fingerprint, fp);
        assert_eq!(back.signing_public, signing.public_key().as_bytes());
    }
}
