//! Deterministic DHT key derivation (spec 4.3). Every record type hashes a
//! fixed ASCII prefix plus its natural identifier through SHA3-512, giving a
//! 64-byte key namespace with no central registry of "which key is which
//! kind of record" — the prefix alone determines it.

use crate::crypto::primitives::sha3_512;
use crate::types::Fingerprint;
use uuid::Uuid;

/// A 64-byte SHA3-512 DHT key.
pub type DhtKey = [u8; 64];

fn derive(prefix: &str, id: &[u8]) -> DhtKey {
    let mut buf = Vec::with_capacity(prefix.len() + id.len());
    buf.extend_from_slice(prefix.as_bytes());
    buf.extend_from_slice(id);
    sha3_512(&buf)
}

pub fn public_key_record(fingerprint: &Fingerprint) -> DhtKey {
    derive("dna:key:", fingerprint.as_str().as_bytes())
}

pub fn name_forward_record(name: &str) -> DhtKey {
    derive("dna:name:", name.as_bytes())
}

/// Stored at the fingerprint's own key space (distinct prefix from
/// `public_key_record`), so a reverse lookup never collides with, or
/// requires re-fetching, the forward public-key record.
pub fn name_reverse_record(fingerprint: &Fingerprint) -> DhtKey {
    derive("dna:namerev:", fingerprint.as_str().as_bytes())
}

pub fn profile_record(fingerprint: &Fingerprint) -> DhtKey {
    derive("dna:profile:", fingerprint.as_str().as_bytes())
}

pub fn presence_record(fingerprint: &Fingerprint) -> DhtKey {
    derive("dna:presence:", fingerprint.as_str().as_bytes())
}

/// Spillway (offline inbox) key: an append-only multiset bounded by TTL, so
/// unlike the other record types this key may hold many concurrent values
/// (one per queued envelope) rather than a single current value.
pub fn spillway_record(recipient_fingerprint: &Fingerprint) -> DhtKey {
    derive("dna:inbox:", recipient_fingerprint.as_str().as_bytes())
}

/// `dna:contacts:<fingerprint>` — self-encrypted contact-directory summary
/// (spec 4.5's contact-sync worker).
pub fn contact_directory_record(fingerprint: &Fingerprint) -> DhtKey {
    derive("dna:contacts:", fingerprint.as_str().as_bytes())
}

pub fn group_meta_record(group: &Uuid) -> DhtKey {
    derive("dna:group:", group.as_bytes())
}

/// One key per (group, member) pair, so each member's GSK capsule can be
/// addressed and replaced independently during rotation (spec 4.3, 4.5).
pub fn group_key_capsule_record(group: &Uuid, member: &Fingerprint) -> DhtKey {
    let mut id = Vec::with_capacity(16 + member.as_str().len());
    id.extend_from_slice(group.as_bytes());
    id.extend_from_slice(member.as_str().as_bytes());
    derive("dna:gsk:", &id)
}

/// One shared key per unordered fingerprint pair, so both sides of an ICE
/// exchange publish their candidate lists to the same rendezvous record
/// (spec 4.4 tier 2) without needing to agree in advance who initiates.
pub fn ice_rendezvous_record(a: &Fingerprint, b: &Fingerprint) -> DhtKey {
    let (low, high) = if a.as_str() <= b.as_str() { (a, b) } else { (b, a) };
    let mut id = Vec::with_capacity(low.as_str().len() + high.as_str().len());
    id.extend_from_slice(low.as_str().as_bytes());
    id.extend_from_slice(high.as_str().as_bytes());
    derive("dna:ice:", &id)
}

/// One key per (sender, send_timestamp, content_hash) triple, matching
/// `ReceiptReference` — receipts are addressed by what they refer to, not
/// by an id minted at send time, since the DHT never sees the sender's
/// local message store.
pub fn receipt_record(sender: &Fingerprint, send_timestamp_nanos: i64, content_hash: &[u8; 32]) -> DhtKey {
    let mut id = Vec::with_capacity(sender.as_str().len() + 8 + 32);
    id.extend_from_slice(sender.as_str().as_bytes());
    id.extend_from_slice(&send_timestamp_nanos.to_be_bytes());
    id.extend_from_slice(content_hash);
    derive("dna:receipt:", &id)
}
