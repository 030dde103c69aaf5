//! The transport facade (spec 4.4): tries direct LAN, then ICE, then falls
//! back to the DHT spillway queue, for a single envelope delivery attempt.

use super::callback::SharedCallback;
use super::ice::{self, CandidateKind, IceCandidate, IceSession, ICE_BUDGET};
use super::inbound_queue::{InboundFrame, InboundQueue};
use super::{tcp, udp};
use crate::crypto::primitives::SigningKeypair;
use crate::error::{EngineError, EngineResult};
use crate::network::dht::{
    keys, records::IceRendezvousRecord, records::IceCandidateRecord, records::PresenceRecord,
    records::SpillwayRecord, DhtValue, PayloadTag, SharedDht, SignedPayload, SPILLWAY_TTL,
};
use crate::types::Fingerprint;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryTier {
    Direct,
    Ice,
    Spillway,
}

#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub direct_connect_timeout: Duration,
    pub ice_budget: Duration,
    pub stun_server: Option<SocketAddr>,
    pub inbound_queue_capacity: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            direct_connect_timeout: Duration::from_secs(2),
            ice_budget: ICE_BUDGET,
            stun_server: None,
            inbound_queue_capacity: super::inbound_queue::DEFAULT_CAPACITY,
        }
    }
}

/// Coordinates the three delivery tiers and owns the inbound frame queue.
/// One `Transport` per running engine instance.
pub struct Transport {
    local_fingerprint: Fingerprint,
    signer: SigningKeypair,
    dht: SharedDht,
    config: TransportConfig,
    callback: SharedCallback,
    inbound: Arc<Mutex<InboundQueue>>,
    udp_socket: Arc<UdpSocket>,
}

impl Transport {
    pub async fn bind(
        local_fingerprint: Fingerprint,
        signer: SigningKeypair,
        dht: SharedDht,
        config: TransportConfig,
        local_addr: SocketAddr,
    ) -> std::io::Result<Self> {
        let udp_socket = Arc::new(udp::bind(local_addr).await?);
        Ok(Self {
            local_fingerprint,
            signer,
            dht,
            config,
            callback: SharedCallback::new(),
            inbound: Arc::new(Mutex::new(InboundQueue::default())),
            udp_socket,
        })
    }

    pub async fn set_callback(&self, callback: super::callback::EnvelopeCallback) {
        self.callback.set(callback).await;
    }

    /// The locally bound direct-tier UDP address, used to populate this
    /// identity's own presence record address hints (spec 3, 4.5).
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.udp_socket.local_addr()
    }

    pub async fn shutdown(&self) {
        self.callback.clear().await;
    }

    /// Attempt delivery tier by tier, returning whichever tier succeeded.
    /// Never returns an error for "recipient offline" — that degrades to
    /// the spillway tier, which always succeeds unless the DHT write
    /// itself fails.
    pub async fn deliver(&self, recipient: &Fingerprint, envelope_bytes: Vec<u8>) -> EngineResult<DeliveryTier> {
        if let Some(addr) = self.recipient_direct_addr(recipient).await {
            if self.try_direct(addr, &envelope_bytes).await {
                return Ok(DeliveryTier::Direct);
            }
        }

        if let Some(addr) = self.try_ice(recipient).await {
            if udp::send(&self.udp_socket, &envelope_bytes, addr).await.is_ok() {
                return Ok(DeliveryTier::Ice);
            }
        }

        self.queue_spillway(recipient, envelope_bytes).await?;
        Ok(DeliveryTier::Spillway)
    }

    async fn recipient_direct_addr(&self, recipient: &Fingerprint) -> Option<SocketAddr> {
        let key = keys::presence_record(recipient);
        let values = self.dht.get(&key).await.ok()?;
        let value = values.into_iter().next()?;
        let record: PresenceRecord = bincode::deserialize(&value.payload.body).ok()?;
        record.addr_hints.iter().find_map(|hint| hint.parse().ok())
    }

    async fn try_direct(&self, addr: SocketAddr, envelope_bytes: &[u8]) -> bool {
        if envelope_bytes.len() <= udp::MAX_DATAGRAM_ENVELOPE {
            if udp::send(&self.udp_socket, envelope_bytes, addr).await.is_ok() {
                return true;
            }
        }
        match tcp::connect(addr, self.config.direct_connect_timeout).await {
            Ok(mut stream) => tcp::send(&mut stream, envelope_bytes).await.is_ok(),
            Err(_) => false,
        }
    }

    async fn try_ice(&self, recipient: &Fingerprint) -> Option<SocketAddr> {
        let stun_server = self.config.stun_server?;
        let host = ice::gather_host_candidate(&self.udp_socket).await.ok()?;
        let reflexive =
            ice::gather_server_reflexive_candidate(&self.udp_socket, stun_server, Duration::from_secs(2))
                .await
                .ok();

        let mut local_candidates = vec![host];
        if let Some(r) = reflexive {
            local_candidates.push(r);
        }

        let key = keys::ice_rendezvous_record(&self.local_fingerprint, recipient);
        let record = IceRendezvousRecord {
            publisher: self.local_fingerprint.clone(),
            candidates: local_candidates
                .iter()
                .map(|c| IceCandidateRecord {
                    host: matches!(c.kind, CandidateKind::Host),
                    addr: c.addr,
                })
                .collect(),
            published_at: chrono::Utc::now(),
        };
        let body = bincode::serialize(&record).ok()?;
        let payload = SignedPayload::sign(PayloadTag::IceRendezvous, body, &self.signer);
        let value = DhtValue {
            payload,
            publisher: self.local_fingerprint.clone(),
            publish_timestamp: chrono::Utc::now(),
            ttl: self.config.ice_budget,
        };
        self.dht.put(key, value).await.ok()?;

        let deadline = tokio::time::Instant::now() + self.config.ice_budget;
        loop {
            if let Ok(values) = self.dht.get(&key).await {
                for value in values {
                    if value.publisher == *recipient {
                        if let Ok(peer_record) =
                            bincode::deserialize::<IceRendezvousRecord>(&value.payload.body)
                        {
                            let peer_candidates: Vec<IceCandidate> = peer_record
                                .candidates
                                .iter()
                                .map(|c| IceCandidate {
                                    kind: if c.host {
                                        CandidateKind::Host
                                    } else {
                                        CandidateKind::ServerReflexive
                                    },
                                    addr: c.addr,
                                })
                                .collect();
                            if let Some(addr) = IceSession::select_candidate(
                                &self.udp_socket,
                                &peer_candidates,
                                b"dna-ice-probe",
                                Duration::from_millis(500),
                            )
                            .await
                            {
                                return Some(addr);
                            }
                        }
                    }
                }
            }
            if tokio::time::Instant::now() >= deadline {
                return None;
            }
            tokio::time::sleep(Duration::from_millis(250)).await;
        }
    }

    async fn queue_spillway(&self, recipient: &Fingerprint, envelope_bytes: Vec<u8>) -> EngineResult<()> {
        let record = SpillwayRecord {
            recipient: recipient.clone(),
            envelope_bytes,
            queued_at: chrono::Utc::now(),
        };
        let body = bincode::serialize(&record).map_err(|e| EngineError::Storage(e.to_string()))?;
        let payload = SignedPayload::sign(PayloadTag::Spillway, body, &self.signer);
        let key = keys::spillway_record(recipient);
        let value = DhtValue {
            payload,
            publisher: self.local_fingerprint.clone(),
            publish_timestamp: chrono::Utc::now(),
            ttl: SPILLWAY_TTL,
        };
        self.dht
            .put(key, value)
            .await
            .map_err(|e| EngineError::Network(e.to_string()))
    }

    /// Run the direct-tier UDP receive loop: frames are pushed onto the
    /// bounded inbound queue and drained into the registered callback.
    /// Intended to run as a background task for the lifetime of the
    /// engine.
    pub async fn run_udp_receive_loop(self: Arc<Self>) {
        loop {
            match udp::recv(&self.udp_socket).await {
                Ok((bytes, _addr)) => {
                    let mut queue = self.inbound.lock().await;
                    queue.push(InboundFrame {
                        sender_hint: None,
                        bytes,
                    });
                    drop(queue);
                    self.drain_one().await;
                }
                Err(e) => {
                    log::warn!("udp receive loop error: {e}");
                }
            }
        }
    }

    async fn drain_one(&self) {
        let frame = {
            let mut queue = self.inbound.lock().await;
            queue.pop()
        };
        if let Some(frame) = frame {
            self.callback.invoke(frame.sender_hint, frame.bytes).await;
        }
    }
}
