//! Acknowledgement codec
//!
//! The dispatcher answers every header with a single byte describing the
//! outcome of the upstream dial. Payload only flows after an OK.

use crate::error::ProtocolError;
use std::fmt;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Outcome of the dispatcher's dial attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum AckCode {
    /// Dial succeeded, bidirectional copy begins
    Ok = 1,
    /// Dial failed for an uncategorised reason
    UnknownError = 2,
    /// DNS negative answer
    NoSuchHost = 3,
    /// DNS lookup timed out
    ResolveTimeout = 4,
    /// Connect attempt timed out
    ConnectTimeout = 5,
    /// Header carried an unknown protocol byte
    UnknownProtocol = 6,
}

impl AckCode {
    /// Whether this code allows payload to flow.
    pub fn is_ok(&self) -> bool {
        matches!(self, AckCode::Ok)
    }
}

impl TryFrom<u8> for AckCode {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, ProtocolError> {
        match value {
            1 => Ok(AckCode::Ok),
            2 => Ok(AckCode::UnknownError),
            3 => Ok(AckCode::NoSuchHost),
            4 => Ok(AckCode::ResolveTimeout),
            5 => Ok(AckCode::ConnectTimeout),
            6 => Ok(AckCode::UnknownProtocol),
            other => Err(ProtocolError::UnknownAckCode(other)),
        }
    }
}

impl fmt::Display for AckCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AckCode::Ok => "OK",
            AckCode::UnknownError => "unknown error",
            AckCode::NoSuchHost => "no such host",
            AckCode::ResolveTimeout => "resolve timeout",
            AckCode::ConnectTimeout => "connect timeout",
            AckCode::UnknownProtocol => "unknown protocol",
        };
        f.write_str(s)
    }
}

/// The single-byte reply written by the dispatcher after the dial.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Acknowledgement {
    /// The outcome code
    pub code: AckCode,
}

impl Acknowledgement {
    /// Build an acknowledgement for the given code.
    pub fn new(code: AckCode) -> Self {
        Acknowledgement { code }
    }

    /// Encode into the wire byte.
    pub fn marshal(&self) -> [u8; 1] {
        [self.code as u8]
    }

    /// Read one acknowledgement from the stream.
    pub async fn read_from<R>(r: &mut R) -> Result<Self, ProtocolError>
    where
        R: AsyncRead + Unpin,
    {
        let mut buf = [0u8; 1];
        r.read_exact(&mut buf).await?;
        Ok(Acknowledgement {
            code: AckCode::try_from(buf[0])?,
        })
    }

    /// Write the acknowledgement to the stream.
    pub async fn write_to<W>(&self, w: &mut W) -> Result<(), ProtocolError>
    where
        W: AsyncWrite + Unpin,
    {
        w.write_all(&self.marshal()).await?;
        w.flush().await?;
        Ok(())
    }
}
