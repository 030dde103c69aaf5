//! Networking layer: the DHT overlay (spec 4.3) and the P2P transport that
//! rides on top of it (spec 4.4).

pub mod dht;
pub mod transport;

pub use dht::Dht;
pub use transport::{DeliveryTier, Transport, TransportConfig};
