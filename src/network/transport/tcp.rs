//! Direct-tier TCP fallback (spec 4.4 tier 1, used when the recipient's
//! endpoint accepts a stream connection but the envelope is too large for
//! one UDP datagram). Grounded in the teacher's `network::tcp` "no
//! external framing beyond what's already in the payload" approach, but
//! since this crate's envelopes carry no embedded length field, a 4-byte
//! big-endian length prefix is added here instead.

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

pub const MAX_ENVELOPE_LEN: u32 = 16 * 1024 * 1024;

pub async fn send(stream: &mut TcpStream, envelope_bytes: &[u8]) -> std::io::Result<()> {
    let len = envelope_bytes.len() as u32;
    stream.write_all(&len.to_be_bytes()).await?;
    stream.write_all(envelope_bytes).await?;
    stream.flush().await
}

pub async fn recv(stream: &mut TcpStream) -> std::io::Result<Vec<u8>> {
    let mut len_buf = [0u8; 4];
    stream.read_exact(&mut len_buf).await?;
    let len = u32::from_be_bytes(len_buf);
    if len > MAX_ENVELOPE_LEN {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            "declared envelope length exceeds MAX_ENVELOPE_LEN",
        ));
    }
    let mut buf = vec![0u8; len as usize];
    stream.read_exact(&mut buf).await?;
    Ok(buf)
}

pub async fn connect(addr: std::net::SocketAddr, timeout: std::time::Duration) -> std::io::Result<TcpStream> {
    tokio::time::timeout(timeout, TcpStream::connect(addr))
        .await
        .map_err(|_| std::io::Error::new(std::io::ErrorKind::TimedOut, "tcp connect timed out"))?
}
