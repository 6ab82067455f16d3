//! Error types for portrelay
//!
//! This module defines the typed errors surfaced by the wire codec and the
//! relay engines.

use std::io;
use thiserror::Error;

/// Errors raised while encoding or decoding wire messages.
///
/// The codec never retries; I/O errors are surfaced verbatim through the
/// `Io` variant.
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// IO error while reading or writing a message
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Header total length smaller than the mandatory fields
    #[error("header too short: {0}")]
    TruncatedHeader(u16),

    /// Address payload has no valid interpretation for its type tag
    #[error("invalid address payload of {len} bytes for type {typ}")]
    InvalidAddress {
        /// Address type tag from the wire
        typ: u8,
        /// Observed payload length
        len: usize,
    },

    /// Acknowledgement byte does not map to a known code
    #[error("unknown ack code: {0}")]
    UnknownAckCode(u8),

    /// UDP payload exceeds what the length prefix can carry
    #[error("datagram too large: {0} bytes")]
    OversizedDatagram(usize),
}

/// Main error type for relay operations
#[derive(Error, Debug)]
pub enum RelayError {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Wire protocol error
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Destination address could not be resolved
    #[error("resolution error: {0}")]
    Resolution(String),

    /// Tunnel terminated or refused a stream
    #[error("tunnel error: {0}")]
    Tunnel(String),

    /// Invalid target or port specification
    #[error("invalid target: {0}")]
    Target(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncated_header_display() {
        let err = ProtocolError::TruncatedHeader(11);
        assert_eq!(format!("{err}"), "header too short: 11");
    }

    #[test]
    fn test_unknown_ack_code_display() {
        let err = ProtocolError::UnknownAckCode(42);
        assert_eq!(format!("{err}"), "unknown ack code: 42");
    }

    #[test]
    fn test_invalid_address_display() {
        let err = ProtocolError::InvalidAddress { typ: 0, len: 7 };
        assert_eq!(
            format!("{err}"),
            "invalid address payload of 7 bytes for type 0"
        );
    }

    #[test]
    fn test_relay_error_from_io() {
        let io_err = io::Error::new(io::ErrorKind::Other, "boom");
        let err: RelayError = io_err.into();
        assert!(matches!(err, RelayError::Io(_)));
    }

    #[test]
    fn test_relay_error_from_protocol() {
        let err: RelayError = ProtocolError::TruncatedHeader(3).into();
        assert!(matches!(err, RelayError::Protocol(_)));
    }
}
