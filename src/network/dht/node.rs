//! Kademlia-style routing table: `NodeId`, XOR distance, k-buckets.
//!
//! Adapted directly from the teacher's `network::fgtw::node` (`NodeId`,
//! `KBucket`, bucket-index-by-leading-zeros), replacing the teacher's
//! `DevicePubkey`-keyed node identity and `eagle_time` clock with this
//! crate's `Fingerprint` and `chrono::DateTime<Utc>`.

use crate::crypto::primitives::sha3_256;
use crate::types::Fingerprint;
use std::net::SocketAddr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId([u8; 32]);

impl NodeId {
    pub fn from_fingerprint(fingerprint: &Fingerprint) -> Self {
        Self(sha3_256(fingerprint.as_str().as_bytes()))
    }

    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// XOR distance to another node, used for both k-bucket placement and
    /// "k closest peers" selection when replicating a `put`.
    pub fn distance(&self, other: &NodeId) -> [u8; 32] {
        let mut dist = [0u8; 32];
        for i in 0..32 {
            dist[i] = self.0[i] ^ other.0[i];
        }
        dist
    }

    /// Bucket index for `other` relative to `self`: bucket 0 is farthest,
    /// bucket 255 is closest.
    pub fn bucket_index(&self, other: &NodeId) -> usize {
        let distance = self.distance(other);
        let mut leading_zeros = 0usize;
        for &byte in &distance {
            if byte != 0 {
                leading_zeros += byte.leading_zeros() as usize;
                break;
            }
            leading_zeros += 8;
        }
        255_usize.saturating_sub(leading_zeros)
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", &self.to_hex()[..16])
    }
}

#[derive(Debug, Clone)]
pub struct NodeContact {
    pub node_id: NodeId,
    pub fingerprint: Fingerprint,
    pub addr: SocketAddr,
    pub last_seen: chrono::DateTime<chrono::Utc>,
}

impl NodeContact {
    pub fn new(fingerprint: Fingerprint, addr: SocketAddr) -> Self {
        let node_id = NodeId::from_fingerprint(&fingerprint);
        Self {
            node_id,
            fingerprint,
            addr,
            last_seen: chrono::Utc::now(),
        }
    }

    pub fn touch(&mut self) {
        self.last_seen = chrono::Utc::now();
    }

    pub fn is_stale(&self, max_age: chrono::Duration) -> bool {
        chrono::Utc::now() - self.last_seen > max_age
    }
}

/// Up to `max_size` contacts at one XOR-distance range; evicts the
/// least-recently-seen entry when full and a new contact arrives, matching
/// standard Kademlia LRU-bucket behavior.
#[derive(Debug, Clone)]
pub struct KBucket {
    entries: Vec<NodeContact>,
    max_size: usize,
}

impl KBucket {
    pub fn new(max_size: usize) -> Self {
        Self {
            entries: Vec::with_capacity(max_size),
            max_size,
        }
    }

    pub fn insert(&mut self, contact: NodeContact) -> bool {
        if let Some(pos) = self.entries.iter().position(|c| c.node_id == contact.node_id) {
            self.entries.remove(pos);
            self.entries.push(contact);
            return true;
        }
        if self.entries.len() < self.max_size {
            self.entries.push(contact);
            return true;
        }
        // Bucket full: evict the least-recently-seen entry for the newcomer.
        if let Some((idx, _)) = self
            .entries
            .iter()
            .enumerate()
            .min_by_key(|(_, c)| c.last_seen)
        {
            self.entries.remove(idx);
            self.entries.push(contact);
            return true;
        }
        false
    }

    pub fn contacts(&self) -> &[NodeContact] {
        &self.entries
    }

    pub fn remove_stale(&mut self, max_age: chrono::Duration) {
        self.entries.retain(|c| !c.is_stale(max_age));
    }
}

/// A node's full routing table: 256 k-buckets indexed by XOR-distance
/// leading-zero count, as in the teacher's `RoutingTable`.
#[derive(Debug, Clone)]
pub struct RoutingTable {
    self_id: NodeId,
    buckets: Vec<KBucket>,
    bucket_size: usize,
}

impl RoutingTable {
    pub fn new(self_id: NodeId, bucket_size: usize) -> Self {
        Self {
            self_id,
            buckets: (0..256).map(|_| KBucket::new(bucket_size)).collect(),
            bucket_size,
        }
    }

    pub fn observe(&mut self, contact: NodeContact) {
        if contact.node_id == self.self_id {
            return;
        }
        let idx = self.self_id.bucket_index(&contact.node_id);
        self.buckets[idx].insert(contact);
    }

    /// The `k` contacts (across all buckets) closest to `target` by XOR
    /// distance — the set a `put` replicates to and a `get`/`find_node`
    /// walks outward from.
    pub fn closest(&self, target: &NodeId, k: usize) -> Vec<NodeContact> {
        let mut all: Vec<&NodeContact> = self.buckets.iter().flat_map(|b| b.contacts()).collect();
        all.sort_by_key(|c| c.node_id.distance(target));
        all.into_iter().take(k).cloned().collect()
    }

    pub fn bucket_size(&self) -> usize {
        self.bucket_size
    }

    pub fn len(&self) -> usize {
        self.buckets.iter().map(|b| b.contacts().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr, SocketAddr};

    fn fp(byte: u8) -> Fingerprint {
        Fingerprint::parse(&hex::encode([byte; 64])).unwrap()
    }

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), port)
    }

    #[test]
    fn distance_to_self_is_zero() {
        let id = NodeId::from_fingerprint(&fp(1));
        assert_eq!(id.distance(&id), [0u8; 32]);
    }

    #[test]
    fn closest_orders_by_xor_distance() {
        let self_id = NodeId::from_fingerprint(&fp(0));
        let mut table = RoutingTable::new(self_id, 20);
        for i in 1..10u8 {
            table.observe(NodeContact::new(fp(i), addr(1000 + i as u16)));
        }
        let target = NodeId::from_fingerprint(&fp(5));
        let closest = table.closest(&target, 3);
        assert_eq!(closest.len(), 3);
        // The exact match (fp(5)) must be first.
        assert_eq!(closest[0].node_id, target);
    }

    #[test]
    fn bucket_evicts_oldest_when_full() {
        let mut bucket = KBucket::new(2);
        let mut c1 = NodeContact::new(fp(1), addr(1));
        c1.last_seen = chrono::Utc::now() - chrono::Duration::seconds(100);
        let c2 = NodeContact::new(fp(2), addr(2));
        let c3 = NodeContact::new(fp(3), addr(3));
        bucket.insert(c1);
        bucket.insert(c2.clone());
        bucket.insert(c3.clone());
        let ids: Vec<_> = bucket.contacts().iter().map(|c| c.node_id).collect();
        assert_eq!(ids.len(), 2);
        assert!(ids.contains(&c2.node_id));
        assert!(ids.contains(&c3.node_id));
    }
}
