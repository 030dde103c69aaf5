//! The DHT overlay facade (spec 4.3): signature gating, at-most-one-owner
//! enforcement, TTL expiry, and per-key subscriptions sit here; [`node`]
//! supplies the routing table and [`value`]/[`records`] supply the wire
//! types. Network transport (actually reaching other nodes) is out of this
//! module's scope — this is the local node's view of, and authority over,
//! its own store and the records it has decided to trust.

use super::keys::DhtKey;
use super::node::{NodeContact, NodeId, RoutingTable};
use super::records::PublicKeyRecord;
use super::value::{DhtError, DhtValue, PayloadTag};
use crate::crypto::primitives::{derive_fingerprint, SigningPublicKey};
use crate::types::Fingerprint;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, RwLock};

const DEFAULT_BUCKET_SIZE: usize = 20;
const SUBSCRIBE_CHANNEL_CAPACITY: usize = 32;

/// Record types for which the overlay enforces a single live value per key
/// (first-writer-wins, spec 4.3). `Spillway` is excluded: it is an
/// append-only multiset of queued envelopes.
fn is_single_owner(tag: PayloadTag) -> bool {
    !matches!(tag, PayloadTag::Spillway | PayloadTag::IceRendezvous)
}

struct Slot {
    values: Vec<DhtValue>,
    notify: broadcast::Sender<DhtValue>,
}

impl Slot {
    fn new() -> Self {
        let (notify, _) = broadcast::channel(SUBSCRIBE_CHANNEL_CAPACITY);
        Self {
            values: Vec::new(),
            notify,
        }
    }
}

/// The local node's DHT overlay: routing table plus authoritative local
/// value store. `put`/`get`/`remove` are what the messenger orchestrator
/// calls; `bootstrap` seeds the routing table from known-good contacts.
pub struct Dht {
    local_id: NodeId,
    local_fingerprint: Fingerprint,
    routing_table: RwLock<RoutingTable>,
    store: RwLock<HashMap<DhtKey, Slot>>,
    replication_factor: usize,
}

impl Dht {
    pub fn new(local_fingerprint: Fingerprint) -> Self {
        let local_id = NodeId::from_fingerprint(&local_fingerprint);
        Self {
            local_id,
            local_fingerprint,
            routing_table: RwLock::new(RoutingTable::new(local_id, DEFAULT_BUCKET_SIZE)),
            store: RwLock::new(HashMap::new()),
            replication_factor: DEFAULT_BUCKET_SIZE,
        }
    }

    pub fn local_id(&self) -> NodeId {
        self.local_id
    }

    /// Seed the routing table from a bootstrap-node list (spec 4.3, 6's
    /// `bootstrap_nodes` config entry).
    pub async fn bootstrap(&self, seeds: impl IntoIterator<Item = NodeContact>) {
        let mut table = self.routing_table.write().await;
        for contact in seeds {
            table.observe(contact);
        }
    }

    pub async fn observe_contact(&self, contact: NodeContact) {
        self.routing_table.write().await.observe(contact);
    }

    /// The `replication_factor` contacts closest to `key`'s own node-space
    /// projection, i.e. where a `put` would be replicated to on a real
    /// multi-node deployment.
    pub async fn closest_contacts(&self, key: &DhtKey) -> Vec<NodeContact> {
        let target = NodeId::from_bytes(first_32(key));
        self.routing_table
            .read()
            .await
            .closest(&target, self.replication_factor)
    }

    /// Store `value` at `key`, enforcing signature verification and
    /// at-most-one-owner semantics before accepting it.
    pub async fn put(&self, key: DhtKey, value: DhtValue) -> Result<(), DhtError> {
        self.verify_publisher(&key, &value).await?;

        let mut store = self.store.write().await;
        let slot = store.entry(key).or_insert_with(Slot::new);

        if is_single_owner(value.payload.tag) {
            slot.values.retain(|existing| !existing.is_expired(chrono::Utc::now()));
            if let Some(existing) = slot.values.first() {
                if existing.publisher != value.publisher {
                    return Err(DhtError::OwnerConflict);
                }
            }
            slot.values.clear();
            slot.values.push(value.clone());
        } else {
            slot.values.push(value.clone());
        }
        let _ = slot.notify.send(value);
        Ok(())
    }

    /// All non-expired, signature-valid values currently stored at `key`.
    pub async fn get(&self, key: &DhtKey) -> Result<Vec<DhtValue>, DhtError> {
        let mut store = self.store.write().await;
        let slot = store.get_mut(key).ok_or(DhtError::NotFound)?;
        let now = chrono::Utc::now();
        slot.values.retain(|v| !v.is_expired(now));
        if slot.values.is_empty() {
            return Err(DhtError::NotFound);
        }
        Ok(slot.values.clone())
    }

    /// Remove values at `key`. For most record types this clears only
    /// `requester`'s own prior value (presence/profile retraction). The
    /// spillway inbox is the exception: its entries are published by the
    /// *sender*, not the recipient polling for them, so a recipient calling
    /// this after a successful fetch clears every entry at the key instead
    /// — the key itself is derived from the recipient's own fingerprint
    /// (spec 4.3's `dna:inbox:<fingerprint>`), so knowing it to call this at
    /// all already implies being, or having been told by, that recipient.
    pub async fn remove(&self, key: &DhtKey, requester: &Fingerprint) -> Result<usize, DhtError> {
        let mut store = self.store.write().await;
        let slot = store.get_mut(key).ok_or(DhtError::NotFound)?;
        let before = slot.values.len();
        if slot.values.iter().any(|v| v.payload.tag == PayloadTag::Spillway) {
            slot.values.clear();
        } else {
            slot.values.retain(|v| &v.publisher != requester);
        }
        Ok(before - slot.values.len())
    }

    /// A broadcast receiver that yields every value subsequently published
    /// at `key`, for callers that want to watch a presence or spillway
    /// record without polling (spec 4.3's "subscribe" operation).
    pub async fn subscribe(&self, key: DhtKey) -> broadcast::Receiver<DhtValue> {
        let mut store = self.store.write().await;
        let slot = store.entry(key).or_insert_with(Slot::new);
        slot.notify.subscribe()
    }

    /// Verify `value`'s signature against its claimed publisher's
    /// registered signing key. A `PublicKeyRecord` is self-certifying: its
    /// own fingerprint must equal the hash of its embedded keys, and its
    /// signature must verify under its own embedded signing key. Every
    /// other record type is verified against the publisher's already-known
    /// `PublicKeyRecord`, which must itself already be present and valid in
    /// this node's store — unsigned or unverifiable writes are always
    /// rejected, never merely cached as unverified (spec 9).
    async fn verify_publisher(&self, key: &DhtKey, value: &DhtValue) -> Result<(), DhtError> {
        if value.payload.tag == PayloadTag::PublicKey {
            let record: PublicKeyRecord =
                bincode::deserialize(&value.payload.body).map_err(|_| DhtError::Malformed)?;
            if &record.fingerprint != &value.publisher {
                return Err(DhtError::Auth);
            }
            let expected_fp = derive_fingerprint(&record.signing_key(), &record.encryption_key());
            if expected_fp != record.fingerprint.as_str() {
                return Err(DhtError::Auth);
            }
            value.verify(&record.signing_key())?;
            let own_key = super::keys::public_key_record(&record.fingerprint);
            if &own_key != key {
                return Err(DhtError::Malformed);
            }
            return Ok(());
        }

        let publisher_key = self.publisher_signing_key(&value.publisher).await?;
        value.verify(&publisher_key)
    }

    async fn publisher_signing_key(&self, publisher: &Fingerprint) -> Result<SigningPublicKey, DhtError> {
        let key = super::keys::public_key_record(publisher);
        let store = self.store.read().await;
        let slot = store.get(&key).ok_or(DhtError::NotFound)?;
        let now = chrono::Utc::now();
        let live = slot
            .values
            .iter()
            .find(|v| !v.is_expired(now))
            .ok_or(DhtError::NotFound)?;
        let record: PublicKeyRecord =
            bincode::deserialize(&live.payload.body).map_err(|_| DhtError::Malformed)?;
        Ok(record.signing_key())
    }
}

fn first_32(key: &DhtKey) -> [u8; 32] {
    let mut out = [0u8; 32];
    out.copy_from_slice(&key[..32]);
    out
}

pub type SharedDht = Arc<Dht>;

/// Default presence-record TTL (spec 4.5's ~5 minute presence refresh
/// cadence; the record is considered stale two refresh intervals out).
pub const PRESENCE_TTL: Duration = Duration::from_secs(10 * 60);
/// Spillway envelope TTL: 7 days, matching the offline-queue tier's
/// delivery window.
pub const SPILLWAY_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::primitives::{EncryptionKeypair, SigningKeypair};
    use crate::network::dht::keys;
    use crate::network::dht::records::PresenceRecord;
    use crate::network::dht::value::SignedPayload;

    fn fingerprint_for(signing: &SigningKeypair, encryption: &EncryptionKeypair) -> Fingerprint {
        Fingerprint::parse(&derive_fingerprint(signing.public_key(), encryption.public_key())).unwrap()
    }

    fn publish_self_key(
        dht: &Dht,
        signing: &SigningKeypair,
        encryption: &EncryptionKeypair,
        fingerprint: &Fingerprint,
    ) -> (DhtKey, DhtValue) {
        let record = PublicKeyRecord::new(fingerprint.clone(), signing.public_key(), encryption.public_key());
        let body = bincode::serialize(&record).unwrap();
        let payload = SignedPayload::sign(PayloadTag::PublicKey, body, signing);
        let value = DhtValue {
            payload,
            publisher: fingerprint.clone(),
            publish_timestamp: chrono::Utc::now(),
            ttl: Duration::from_secs(3600),
        };
        (keys::public_key_record(fingerprint), value)
    }

    #[tokio::test]
    async fn self_signed_public_key_record_is_accepted() {
        let signing = SigningKeypair::generate_from_seed(&[1u8; 32]).unwrap();
        let encryption = EncryptionKeypair::generate_from_seed(&[1u8; 32]).unwrap();
        let fp = fingerprint_for(&signing, &encryption);
        let dht = Dht::new(fp.clone());
        let (key, value) = publish_self_key(&dht, &signing, &encryption, &fp);
        dht.put(key, value).await.unwrap();
    }

    #[tokio::test]
    async fn presence_record_requires_known_publisher_key() {
        let signing = SigningKeypair::generate_from_seed(&[2u8; 32]).unwrap();
        let encryption = EncryptionKeypair::generate_from_seed(&[2u8; 32]).unwrap();
        let fp = fingerprint_for(&signing, &encryption);
        let dht = Dht::new(fp.clone());

        let presence = PresenceRecord {
            fingerprint: fp.clone(),
            addr_hints: vec![],
            last_refreshed: chrono::Utc::now(),
        };
        let body = bincode::serialize(&presence).unwrap();
        let payload = SignedPayload::sign(PayloadTag::Presence, body, &signing);
        let value = DhtValue {
            payload,
            publisher: fp.clone(),
            publish_timestamp: chrono::Utc::now(),
            ttl: PRESENCE_TTL,
        };

        // Before the publisher's key record exists, this must be rejected.
        let presence_key = keys::presence_record(&fp);
        assert!(dht.put(presence_key, value.clone()).await.is_err());

        let (key_record_key, key_record_value) = publish_self_key(&dht, &signing, &encryption, &fp);
        dht.put(key_record_key, key_record_value).await.unwrap();

        dht.put(presence_key, value).await.unwrap();
    }

    #[tokio::test]
    async fn second_publisher_cannot_overwrite_a_name_record() {
        let owner_signing = SigningKeypair::generate_from_seed(&[3u8; 32]).unwrap();
        let owner_encryption = EncryptionKeypair::generate_from_seed(&[3u8; 32]).unwrap();
        let owner_fp = fingerprint_for(&owner_signing, &owner_encryption);

        let rival_signing = SigningKeypair::generate_from_seed(&[4u8; 32]).unwrap();
        let rival_encryption = EncryptionKeypair::generate_from_seed(&[4u8; 32]).unwrap();
        let rival_fp = fingerprint_for(&rival_signing, &rival_encryption);

        let dht = Dht::new(owner_fp.clone());
        let (owner_key_key, owner_key_value) =
            publish_self_key(&dht, &owner_signing, &owner_encryption, &owner_fp);
        dht.put(owner_key_key, owner_key_value).await.unwrap();
        let (rival_key_key, rival_key_value) =
            publish_self_key(&dht, &rival_signing, &rival_encryption, &rival_fp);
        dht.put(rival_key_key, rival_key_value).await.unwrap();

        let name_key = keys::name_forward_record("alice");
        let owner_record = crate::network::dht::records::NameForwardRecord {
            name: "alice".into(),
            fingerprint: owner_fp.clone(),
        };
        let owner_body = bincode::serialize(&owner_record).unwrap();
        let owner_payload = SignedPayload::sign(PayloadTag::NameForward, owner_body, &owner_signing);
        dht.put(
            name_key,
            DhtValue {
                payload: owner_payload,
                publisher: owner_fp.clone(),
                publish_timestamp: chrono::Utc::now(),
                ttl: Duration::from_secs(3600),
            },
        )
        .await
        .unwrap();

        let rival_record = crate::network::dht::records::NameForwardRecord {
            name: "alice".into(),
            fingerprint: rival_fp.clone(),
        };
        let rival_body = bincode::serialize(&rival_record).unwrap();
        let rival_payload = SignedPayload::sign(PayloadTag::NameForward, rival_body, &rival_signing);
        let result = dht
            .put(
                name_key,
                DhtValue {
                    payload: rival_payload,
                    publisher: rival_fp,
                    publish_timestamp: chrono::Utc::now(),
                    ttl: Duration::from_secs(3600),
                },
            )
            .await;
        assert!(matches!(result, Err(DhtError::OwnerConflict)));
    }
}
