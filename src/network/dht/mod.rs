//! The Kademlia-style DHT overlay (spec 4.3): deterministic key derivation,
//! signed record types, and the local node's store/routing facade.

pub mod keys;
pub mod node;
pub mod overlay;
pub mod records;
pub mod value;

pub use keys::DhtKey;
pub use node::{KBucket, NodeContact, NodeId, RoutingTable};
pub use overlay::{Dht, SharedDht, PRESENCE_TTL, SPILLWAY_TTL};
pub use records::{
    ContactDirectoryRecord, GroupKeyCapsuleRecord, GroupMetaRecord, IceCandidateRecord,
    IceRendezvousRecord, NameForwardRecord, NameReverseRecord, PresenceRecord, ProfileRecord,
    PublicKeyRecord, ReceiptRecord, ReceiptRecordKind, SpillwayRecord,
};
pub use value::{DhtError, DhtValue, PayloadTag, SignedPayload};
