//! Request header codec
//!
//! Every logical stream starts with exactly one header. Wire layout, all
//! integers big-endian:
//!
//! ```text
//! version(1) | total_len(2) | request_id(5) | protocol(1) | port(2) |
//! addr_type(1) | addr_payload(0..=255)
//! ```
//!
//! `total_len` covers the entire header including itself; the receiver
//! derives the address payload length from it.

use crate::error::ProtocolError;
use crate::protocol::addr::Addr;
use rand::distributions::Alphanumeric;
use rand::Rng;
use std::fmt;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Protocol byte for TCP streams
pub const PROTOCOL_TCP: u8 = 0;
/// Protocol byte for UDP streams
pub const PROTOCOL_UDP: u8 = 1;

/// version + total length + request id + protocol + port + addr type
const LEN_MANDATORY_FIELDS: usize = 12;
const LEN_REQUEST_ID: usize = 5;

/// Short random token correlating the two ends of a flow in logs.
///
/// Not unique and never used as a key.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RequestId([u8; LEN_REQUEST_ID]);

impl RequestId {
    /// Generate a fresh random alphanumeric ID.
    pub fn new() -> Self {
        let mut id = [0u8; LEN_REQUEST_ID];
        let mut rng = rand::thread_rng();
        for b in &mut id {
            *b = rng.sample(Alphanumeric);
        }
        RequestId(id)
    }

    /// Rehydrate from wire bytes.
    pub fn from_bytes(bytes: [u8; LEN_REQUEST_ID]) -> Self {
        RequestId(bytes)
    }

    /// The raw 5 bytes.
    pub fn as_bytes(&self) -> &[u8; LEN_REQUEST_ID] {
        &self.0
    }
}

impl Default for RequestId {
    fn default() -> Self {
        RequestId([b'0'; LEN_REQUEST_ID])
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&String::from_utf8_lossy(&self.0))
    }
}

/// The request envelope written once at the start of every logical stream.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Header {
    /// Reserved, currently 0
    pub version: u8,
    /// Log-correlation token
    pub request_id: RequestId,
    /// [`PROTOCOL_TCP`] or [`PROTOCOL_UDP`]; unknown values are carried
    /// through so the dispatcher can reject them with a typed ack
    pub protocol: u8,
    /// Destination port
    pub port: u16,
    /// Destination address
    pub addr: Addr,
}

impl Header {
    /// Encode the header into its wire form.
    pub fn marshal(&self) -> Vec<u8> {
        let addr_bytes = self.addr.marshal();
        let total_len = LEN_MANDATORY_FIELDS + addr_bytes.len();
        let mut buf = Vec::with_capacity(total_len);

        buf.push(self.version);
        buf.extend_from_slice(&(total_len as u16).to_be_bytes());
        buf.extend_from_slice(self.request_id.as_bytes());
        buf.push(self.protocol);
        buf.extend_from_slice(&self.port.to_be_bytes());
        buf.push(self.addr.type_byte());
        buf.extend_from_slice(&addr_bytes);
        buf
    }

    /// Read one header from the stream.
    pub async fn read_from<R>(r: &mut R) -> Result<Self, ProtocolError>
    where
        R: AsyncRead + Unpin,
    {
        let mut length_buf = [0u8; 3];
        r.read_exact(&mut length_buf).await?;
        let version = length_buf[0];
        let total_len = u16::from_be_bytes([length_buf[1], length_buf[2]]);
        if (total_len as usize) < LEN_MANDATORY_FIELDS {
            return Err(ProtocolError::TruncatedHeader(total_len));
        }

        let mut body = vec![0u8; total_len as usize - 3];
        r.read_exact(&mut body).await?;

        let mut cursor = 0;
        let mut request_id = [0u8; LEN_REQUEST_ID];
        request_id.copy_from_slice(&body[cursor..cursor + LEN_REQUEST_ID]);
        cursor += LEN_REQUEST_ID;

        let protocol = body[cursor];
        cursor += 1;

        let port = u16::from_be_bytes([body[cursor], body[cursor + 1]]);
        cursor += 2;

        let addr_type = body[cursor];
        cursor += 1;

        let addr = Addr::from_bytes(addr_type, &body[cursor..])?;

        Ok(Header {
            version,
            request_id: RequestId::from_bytes(request_id),
            protocol,
            port,
            addr,
        })
    }

    /// Write the header to the stream.
    pub async fn write_to<W>(&self, w: &mut W) -> Result<(), ProtocolError>
    where
        W: AsyncWrite + Unpin,
    {
        w.write_all(&self.marshal()).await?;
        w.flush().await?;
        Ok(())
    }
}
