//! Direct-tier UDP send/receive, used when a recipient's presence record
//! advertises a reachable LAN endpoint (spec 4.4 tier 1). Grounded in the
//! teacher's `network::udp` "one place packets go out" convention; this
//! crate's envelopes are self-delimiting datagrams (no VSF length header
//! to thread through), so framing is just "one envelope per datagram".

use std::net::SocketAddr;
use tokio::net::UdpSocket;

/// Maximum single-datagram payload this tier will attempt; larger
/// envelopes should fall through to the TCP direct attempt or a later
/// tier rather than risk IP fragmentation/drop.
pub const MAX_DATAGRAM_ENVELOPE: usize = 1400;

pub async fn send(socket: &UdpSocket, envelope_bytes: &[u8], addr: SocketAddr) -> std::io::Result<()> {
    socket.send_to(envelope_bytes, addr).await?;
    Ok(())
}

/// Receive one datagram, truncated to `MAX_DATAGRAM_ENVELOPE`; oversized
/// or malformed datagrams are the caller's concern (they simply won't
/// parse as an envelope).
pub async fn recv(socket: &UdpSocket) -> std::io::Result<(Vec<u8>, SocketAddr)> {
    let mut buf = vec![0u8; MAX_DATAGRAM_ENVELOPE];
    let (len, addr) = socket.recv_from(&mut buf).await?;
    buf.truncate(len);
    Ok((buf, addr))
}

pub async fn bind(local_addr: SocketAddr) -> std::io::Result<UdpSocket> {
    UdpSocket::bind(local_addr).await
}
