//! P2P transport (spec 4.4): a best-effort duplex byte channel for
//! delivering one envelope, tiered direct LAN -> ICE -> DHT offline queue.
//! Grounded in the teacher's `network::pt` tiering (UDP primary, TCP
//! fallback, relay last resort) and `network::udp`/`network::tcp` socket
//! idioms, adapted to this crate's three named tiers and single
//! `on_envelope` callback contract.

pub mod callback;
pub mod ice;
pub mod inbound_queue;
pub mod tcp;
pub mod transport;
pub mod udp;

pub use callback::{EnvelopeCallback, SharedCallback};
pub use ice::{IceCandidate, IceSession};
pub use inbound_queue::InboundQueue;
pub use transport::{DeliveryTier, Transport, TransportConfig};
