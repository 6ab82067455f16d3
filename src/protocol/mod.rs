//! Wire protocol for the relay tunnel
//!
//! Every logical stream carries exactly one [`Header`], then exactly one
//! [`Acknowledgement`], then payload. Streams marked UDP frame each
//! datagram with a 2-byte big-endian length prefix.

mod ack;
mod addr;
mod header;
pub mod udp;

pub use ack::{AckCode, Acknowledgement};
pub use addr::{join_host_port, Addr, AddrPort, ADDR_TYPE_HOST, ADDR_TYPE_IP};
pub use header::{Header, RequestId, PROTOCOL_TCP, PROTOCOL_UDP};
