//! Length-prefixed UDP framing
//!
//! Logical streams carrying UDP prefix each datagram with a 2-byte
//! big-endian length so boundaries survive the byte-stream transport.

use crate::error::ProtocolError;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Largest payload the 2-byte prefix can describe.
pub const MAX_UDP_PAYLOAD: usize = 65535;

/// Write one datagram as `len(2 BE) | payload`.
pub async fn write_datagram<W>(w: &mut W, payload: &[u8]) -> Result<(), ProtocolError>
where
    W: AsyncWrite + Unpin,
{
    if payload.len() > MAX_UDP_PAYLOAD {
        return Err(ProtocolError::OversizedDatagram(payload.len()));
    }
    w.write_all(&(payload.len() as u16).to_be_bytes()).await?;
    w.write_all(payload).await?;
    w.flush().await?;
    Ok(())
}

/// Read one datagram into `buf`, returning the payload length.
///
/// `buf` must be at least [`MAX_UDP_PAYLOAD`] bytes.
pub async fn read_datagram<R>(r: &mut R, buf: &mut [u8]) -> Result<usize, ProtocolError>
where
    R: AsyncRead + Unpin,
{
    let mut length_buf = [0u8; 2];
    r.read_exact(&mut length_buf).await?;
    let len = u16::from_be_bytes(length_buf) as usize;
    r.read_exact(&mut buf[..len]).await?;
    Ok(len)
}
