//! # Portrelay - Port-Forwarding Relay
//!
//! Portrelay tunnels local TCP connections and UDP datagrams, over a
//! pre-established multiplexed stream connection to an in-cluster agent,
//! to arbitrary destinations reachable from the agent's network. It
//! extends the conventional port-forward primitive with:
//!
//! - **UDP support**: datagrams are length-prefix framed over the tunnel
//! - **Flexible destinations**: service cluster IPs, external names, raw
//!   IPs and hostnames resolved at the agent
//! - **Rollout tracking**: watch-driven resolution keeps new flows on a
//!   live replica while existing flows stay pinned
//! - **SOCKS5 front end**: any client can request arbitrary (addr, port)
//!   from inside the cluster
//! - **Targets file**: concurrent multi-target forwarding from a simple
//!   tabular file
//!
//! ## Architecture
//!
//! ```text
//! local client -> forwarder -> logical stream -> dispatcher -> target
//!                              (header + ack)
//! ```
//!
//! The client side accepts TCP/UDP locally and opens one logical stream
//! per flow; each stream carries one request header, one acknowledgement
//! and then payload. The dispatcher (`portrelay-server`) dials the
//! destination and runs the per-protocol proxy loop.
//!
//! Cluster discovery and the multiplexed transport are collaborator
//! boundaries: see [`orchestrator::Orchestrator`] and
//! [`tunnel::StreamConnection`].

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod client;
pub mod error;
pub mod orchestrator;
pub mod ports;
pub mod protocol;
pub mod relay;
pub mod resolver;
pub mod server;
pub mod tunnel;

pub use error::{ProtocolError, RelayError};

/// Version of the portrelay library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Name of the application
pub const NAME: &str = env!("CARGO_PKG_NAME");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }

    #[test]
    fn test_name() {
        assert_eq!(NAME, "portrelay");
    }
}
