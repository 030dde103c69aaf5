//! ICE-lite connectivity tier (spec 4.4 tier 2): host + STUN
//! server-reflexive candidate gathering, rendezvous via the DHT, and a
//! direct connectivity check. Implements the RFC 5245 candidate/check
//! vocabulary at the fidelity this crate needs (binding-request STUN only,
//! no TURN relay, no trickle) rather than pulling in a full ICE agent
//! dependency — hand-parsing a small, stable wire protocol here matches
//! the teacher's own practice of hand-parsing its UDP/TCP frames rather
//! than reaching for an external codec crate.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;
use tokio::net::UdpSocket;

pub const ICE_BUDGET: Duration = Duration::from_secs(10);
const STUN_MAGIC_COOKIE: u32 = 0x2112_A442;
const STUN_BINDING_REQUEST: u16 = 0x0001;
const STUN_BINDING_SUCCESS: u16 = 0x0101;
const ATTR_XOR_MAPPED_ADDRESS: u16 = 0x0020;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CandidateKind {
    Host,
    ServerReflexive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IceCandidate {
    pub kind: CandidateKind,
    pub addr: SocketAddr,
}

/// Discover the local, routable source address by connecting a UDP socket
/// outward (no packets actually leave for a connected UDP socket; this
/// only consults the OS routing table), the same trick the teacher's
/// `network::udp::get_local_ip` uses for LAN broadcast discovery.
fn local_host_candidate() -> std::io::Result<SocketAddr> {
    let socket = std::net::UdpSocket::bind("0.0.0.0:0")?;
    socket.connect("1.1.1.1:80")?;
    socket.local_addr()
}

pub async fn gather_host_candidate(bound: &UdpSocket) -> std::io::Result<IceCandidate> {
    let local_ip = local_host_candidate()?.ip();
    let port = bound.local_addr()?.port();
    Ok(IceCandidate {
        kind: CandidateKind::Host,
        addr: SocketAddr::new(local_ip, port),
    })
}

fn build_binding_request(transaction_id: &[u8; 12]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(20);
    buf.extend_from_slice(&STUN_BINDING_REQUEST.to_be_bytes());
    buf.extend_from_slice(&0u16.to_be_bytes()); // no attributes in the request
    buf.extend_from_slice(&STUN_MAGIC_COOKIE.to_be_bytes());
    buf.extend_from_slice(transaction_id);
    buf
}

fn parse_xor_mapped_address(body: &[u8], transaction_id: &[u8; 12]) -> Option<SocketAddr> {
    let mut ptr = 0;
    while ptr + 4 <= body.len() {
        let attr_type = u16::from_be_bytes([body[ptr], body[ptr + 1]]);
        let attr_len = u16::from_be_bytes([body[ptr + 2], body[ptr + 3]]) as usize;
        let value_start = ptr + 4;
        let value_end = value_start + attr_len;
        if value_end > body.len() {
            return None;
        }
        if attr_type == ATTR_XOR_MAPPED_ADDRESS && attr_len >= 8 {
            let value = &body[value_start..value_end];
            let family = value[1];
            let xport = u16::from_be_bytes([value[2], value[3]]);
            let port = xport ^ ((STUN_MAGIC_COOKIE >> 16) as u16);
            if family == 0x01 {
                let cookie_bytes = STUN_MAGIC_COOKIE.to_be_bytes();
                let mut ip_bytes = [0u8; 4];
                for i in 0..4 {
                    ip_bytes[i] = value[4 + i] ^ cookie_bytes[i];
                }
                return Some(SocketAddr::new(IpAddr::V4(Ipv4Addr::from(ip_bytes)), port));
            }
            let _ = transaction_id;
        }
        // attributes are padded to a 4-byte boundary
        ptr = value_end + ((4 - (attr_len % 4)) % 4);
    }
    None
}

/// Send one STUN binding request to `stun_server` over `socket` and parse
/// the server-reflexive candidate from the response.
pub async fn gather_server_reflexive_candidate(
    socket: &UdpSocket,
    stun_server: SocketAddr,
    timeout: Duration,
) -> std::io::Result<IceCandidate> {
    let mut transaction_id = [0u8; 12];
    crate::crypto::primitives::random_bytes(12)
        .map(|bytes| transaction_id.copy_from_slice(&bytes))
        .map_err(|_| std::io::Error::new(std::io::ErrorKind::Other, "entropy source unavailable"))?;

    let request = build_binding_request(&transaction_id);
    socket.send_to(&request, stun_server).await?;

    let mut buf = [0u8; 512];
    let (len, _from) = tokio::time::timeout(timeout, socket.recv_from(&mut buf))
        .await
        .map_err(|_| std::io::Error::new(std::io::ErrorKind::TimedOut, "STUN request timed out"))??;

    if len < 20 {
        return Err(std::io::Error::new(std::io::ErrorKind::InvalidData, "STUN response too short"));
    }
    let msg_type = u16::from_be_bytes([buf[0], buf[1]]);
    if msg_type != STUN_BINDING_SUCCESS {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            "STUN server did not return a binding success response",
        ));
    }
    let attr_len = u16::from_be_bytes([buf[2], buf[3]]) as usize;
    let body = &buf[20..(20 + attr_len).min(len)];
    let addr = parse_xor_mapped_address(body, &transaction_id)
        .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::InvalidData, "no XOR-MAPPED-ADDRESS attribute"))?;

    Ok(IceCandidate {
        kind: CandidateKind::ServerReflexive,
        addr,
    })
}

/// Candidate lists exchanged between the two parties via a short-lived DHT
/// rendezvous record keyed by both fingerprints (spec 4.4). Connectivity
/// checks against the peer's candidates are attempted in
/// host-then-reflexive priority order.
pub struct IceSession {
    pub local_candidates: Vec<IceCandidate>,
}

impl IceSession {
    pub fn new(local_candidates: Vec<IceCandidate>) -> Self {
        Self { local_candidates }
    }

    /// A simple UDP hole-punch connectivity check: send a short probe and
    /// wait for any reply from the same address within `timeout`.
    pub async fn check(
        socket: &UdpSocket,
        candidate: SocketAddr,
        probe: &[u8],
        timeout: Duration,
    ) -> bool {
        if socket.send_to(probe, candidate).await.is_err() {
            return false;
        }
        let mut buf = [0u8; 64];
        match tokio::time::timeout(timeout, socket.recv_from(&mut buf)).await {
            Ok(Ok((_, from))) => from == candidate,
            _ => false,
        }
    }

    /// Walk `peer_candidates` in priority order (host candidates are
    /// cheaper and tried first) until one passes a connectivity check.
    pub async fn select_candidate(
        socket: &UdpSocket,
        peer_candidates: &[IceCandidate],
        probe: &[u8],
        per_check_timeout: Duration,
    ) -> Option<SocketAddr> {
        let mut ordered: Vec<&IceCandidate> = peer_candidates.iter().collect();
        ordered.sort_by_key(|c| match c.kind {
            CandidateKind::Host => 0,
            CandidateKind::ServerReflexive => 1,
        });
        for candidate in ordered {
            if Self::check(socket, candidate.addr, probe, per_check_timeout).await {
                return Some(candidate.addr);
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn xor_mapped_address_round_trips() {
        let transaction_id = [7u8; 12];
        let ip = Ipv4Addr::new(203, 0, 113, 42);
        let port: u16 = 54321;

        let cookie_bytes = STUN_MAGIC_COOKIE.to_be_bytes();
        let xport = port ^ ((STUN_MAGIC_COOKIE >> 16) as u16);
        let mut xip = [0u8; 4];
        for i in 0..4 {
            xip[i] = ip.octets()[i] ^ cookie_bytes[i];
        }

        let mut body = Vec::new();
        body.extend_from_slice(&ATTR_XOR_MAPPED_ADDRESS.to_be_bytes());
        body.extend_from_slice(&8u16.to_be_bytes());
        body.push(0); // reserved
        body.push(0x01); // IPv4
        body.extend_from_slice(&xport.to_be_bytes());
        body.extend_from_slice(&xip);

        let parsed = parse_xor_mapped_address(&body, &transaction_id).unwrap();
        assert_eq!(parsed, SocketAddr::new(IpAddr::V4(ip), port));
    }

    #[test]
    fn candidates_prioritize_host_over_reflexive() {
        let host = IceCandidate {
            kind: CandidateKind::Host,
            addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 1),
        };
        let reflexive = IceCandidate {
            kind: CandidateKind::ServerReflexive,
            addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 2),
        };
        let mut candidates = vec![reflexive, host];
        candidates.sort_by_key(|c| match c.kind {
            CandidateKind::Host => 0,
            CandidateKind::ServerReflexive => 1,
        });
        assert_eq!(candidates[0].kind, CandidateKind::Host);
    }
}
