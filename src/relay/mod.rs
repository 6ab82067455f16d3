//! Bidirectional copy engines
//!
//! The per-protocol proxy loops run on the dispatcher side of the tunnel,
//! plus the buffer pool and idle alarm they are built on.

pub mod alarm;
pub mod bufpool;
mod tcp;
mod udp;

pub use alarm::Alarm;
pub use bufpool::{BufferPool, PooledBuf, TCP_BUFFER_SIZE, UDP_BUFFER_SIZE};
pub use tcp::proxy_tcp;
pub use udp::{proxy_udp, UDP_IDLE_TIMEOUT};
