//! Port-spec parsing
//!
//! A port spec is `[LOCAL:]REMOTE[@PROTO]`. REMOTE may be numeric or, when
//! the target resolves to a workload, the name of one of its ports. The
//! protocol defaults to TCP unless the spec pins it or the workload's port
//! table determines it unambiguously.

use crate::protocol::{PROTOCOL_TCP, PROTOCOL_UDP};
use anyhow::{bail, Result};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// Transport protocol of a forwarded port.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Protocol {
    /// Stream forwarding
    Tcp,
    /// Datagram forwarding
    Udp,
}

impl Protocol {
    /// The wire byte used in request headers.
    pub fn wire_byte(&self) -> u8 {
        match self {
            Protocol::Tcp => PROTOCOL_TCP,
            Protocol::Udp => PROTOCOL_UDP,
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Tcp => f.write_str("tcp"),
            Protocol::Udp => f.write_str("udp"),
        }
    }
}

impl FromStr for Protocol {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "tcp" => Ok(Protocol::Tcp),
            "udp" => Ok(Protocol::Udp),
            other => bail!("unknown protocol: {other:?}"),
        }
    }
}

/// One forwarding entry: local bind port, remote destination port and the
/// protocol between them. A local port of 0 means "pick any".
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PortPair {
    /// Local port to bind
    pub local_port: u16,
    /// Remote destination port
    pub remote_port: u16,
    /// Transport protocol
    pub protocol: Protocol,
}

/// A named port from a workload's port table.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct NamedPort {
    /// Port number
    pub port: u16,
    /// Declared protocol
    pub protocol: Protocol,
}

/// The ports a workload exposes, indexed by name and by number.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct WorkloadPorts {
    names: HashMap<String, NamedPort>,
    protocols: HashMap<u16, Vec<Protocol>>,
}

impl WorkloadPorts {
    /// Record one declared port.
    pub fn insert(&mut self, name: &str, port: u16, protocol: Protocol) {
        self.names
            .insert(name.to_owned(), NamedPort { port, protocol });
        self.protocols.entry(port).or_default().push(protocol);
    }

    /// Look up a port by name.
    pub fn by_name(&self, name: &str) -> Option<NamedPort> {
        self.names.get(name).copied()
    }

    /// The declared protocols of a numeric port.
    pub fn protocols_of(&self, port: u16) -> &[Protocol] {
        self.protocols.get(&port).map(Vec::as_slice).unwrap_or(&[])
    }
}

/// Parser turning port-spec strings into [`PortPair`]s.
#[derive(Debug, Default)]
pub struct Parser<'a> {
    specs: &'a [String],
    ports: Option<&'a WorkloadPorts>,
}

impl<'a> Parser<'a> {
    /// Parse the given specs without workload context.
    pub fn new(specs: &'a [String]) -> Self {
        Parser { specs, ports: None }
    }

    /// Attach a workload port table for named ports and protocol
    /// inference.
    pub fn with_ports(mut self, ports: &'a WorkloadPorts) -> Self {
        self.ports = Some(ports);
        self
    }

    /// Parse every spec, rejecting the whole batch on the first error.
    pub fn parse(&self) -> Result<Vec<PortPair>> {
        self.specs.iter().map(|s| self.parse_one(s)).collect()
    }

    fn parse_one(&self, spec: &str) -> Result<PortPair> {
        let mut arg = spec;
        let mut pinned: Option<Protocol> = None;

        if let Some(idx) = arg.find('@') {
            if idx > 0 {
                if idx < arg.len() - 1 {
                    pinned = Some(arg[idx + 1..].parse()?);
                }
                arg = &arg[..idx];
            }
        }

        let (local_str, remote_str) = match arg.split(':').collect::<Vec<_>>()[..] {
            [remote] => (None, remote),
            [local, remote] => (Some(if local.is_empty() { "0" } else { local }), remote),
            _ => bail!("invalid port format: {arg:?}"),
        };

        let mut protocol = pinned;
        let remote_port = match parse_port(remote_str) {
            Ok(port) => {
                if pinned.is_none() {
                    if let Some(ports) = self.ports {
                        match ports.protocols_of(port) {
                            [] => {}
                            [single] => protocol = Some(*single),
                            many => bail!(
                                "ambiguous protocol of port {port}: {}",
                                many.iter()
                                    .map(Protocol::to_string)
                                    .collect::<Vec<_>>()
                                    .join("/")
                            ),
                        }
                    }
                }
                port
            }
            Err(err) => {
                // Assume it is the name of a port.
                let Some(ports) = self.ports else {
                    return Err(err);
                };
                let Some(named) = ports.by_name(remote_str) else {
                    bail!("port name not found: {remote_str:?}");
                };
                if pinned.is_none() {
                    protocol = Some(named.protocol);
                }
                named.port
            }
        };

        let local_port = match local_str {
            None => remote_port,
            Some(s) => parse_port(s)?,
        };

        Ok(PortPair {
            local_port,
            remote_port,
            protocol: protocol.unwrap_or(Protocol::Tcp),
        })
    }
}

fn parse_port(s: &str) -> Result<u16> {
    s.parse::<u16>().map_err(|_| anyhow::anyhow!("invalid port: {s:?}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dns_ports() -> WorkloadPorts {
        let mut ports = WorkloadPorts::default();
        ports.insert("tcp-dns", 53, Protocol::Tcp);
        ports.insert("udp-dns", 53, Protocol::Udp);
        ports.insert("web", 8080, Protocol::Tcp);
        ports
    }

    #[test]
    fn test_simple_specs() {
        let specs: Vec<String> = ["5353@udp", ":8080", "8443:443@tcp"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let got = Parser::new(&specs).parse().unwrap();
        assert_eq!(
            got,
            vec![
                PortPair {
                    local_port: 5353,
                    remote_port: 5353,
                    protocol: Protocol::Udp,
                },
                PortPair {
                    local_port: 0,
                    remote_port: 8080,
                    protocol: Protocol::Tcp,
                },
                PortPair {
                    local_port: 8443,
                    remote_port: 443,
                    protocol: Protocol::Tcp,
                },
            ]
        );
    }

    #[test]
    fn test_any_local_port_with_protocol() {
        let specs = vec![":53@udp".to_string()];
        let got = Parser::new(&specs).parse().unwrap();
        assert_eq!(
            got[0],
            PortPair {
                local_port: 0,
                remote_port: 53,
                protocol: Protocol::Udp,
            }
        );
    }

    #[test]
    fn test_named_ports() {
        let ports = dns_ports();
        let specs: Vec<String> = ["udp-dns", ":tcp-dns", "5353:udp-dns"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let got = Parser::new(&specs).with_ports(&ports).parse().unwrap();
        assert_eq!(
            got,
            vec![
                PortPair {
                    local_port: 53,
                    remote_port: 53,
                    protocol: Protocol::Udp,
                },
                PortPair {
                    local_port: 0,
                    remote_port: 53,
                    protocol: Protocol::Tcp,
                },
                PortPair {
                    local_port: 5353,
                    remote_port: 53,
                    protocol: Protocol::Udp,
                },
            ]
        );
    }

    #[test]
    fn test_protocol_inferred_from_workload() {
        let mut ports = WorkloadPorts::default();
        ports.insert("udp", 53, Protocol::Udp);
        ports.insert("tcp", 8080, Protocol::Tcp);

        let specs: Vec<String> = ["5353:53", "8080"].iter().map(|s| s.to_string()).collect();
        let got = Parser::new(&specs).with_ports(&ports).parse().unwrap();
        assert_eq!(
            got,
            vec![
                PortPair {
                    local_port: 5353,
                    remote_port: 53,
                    protocol: Protocol::Udp,
                },
                PortPair {
                    local_port: 8080,
                    remote_port: 8080,
                    protocol: Protocol::Tcp,
                },
            ]
        );
    }

    #[test]
    fn test_pinned_protocol_overrides_workload() {
        let mut ports = WorkloadPorts::default();
        ports.insert("udp", 53, Protocol::Udp);

        let specs = vec!["5353@tcp".to_string()];
        let got = Parser::new(&specs).with_ports(&ports).parse().unwrap();
        assert_eq!(
            got[0],
            PortPair {
                local_port: 5353,
                remote_port: 5353,
                protocol: Protocol::Tcp,
            }
        );
    }

    #[test]
    fn test_ambiguous_protocol_rejected() {
        let ports = dns_ports();
        let specs = vec!["53".to_string()];
        let err = Parser::new(&specs).with_ports(&ports).parse().unwrap_err();
        assert!(err.to_string().contains("ambiguous protocol of port 53"));
    }

    #[test]
    fn test_port_name_not_found() {
        let ports = WorkloadPorts::default();
        let specs = vec!["no-such-port".to_string()];
        let err = Parser::new(&specs).with_ports(&ports).parse().unwrap_err();
        assert!(err.to_string().contains("port name not found"));
    }

    #[test]
    fn test_unknown_protocol() {
        let specs = vec!["8080@sctp".to_string()];
        let err = Parser::new(&specs).parse().unwrap_err();
        assert_eq!(err.to_string(), "unknown protocol: \"sctp\"");
    }

    #[test]
    fn test_invalid_port_format() {
        let specs = vec!["1:2:3".to_string()];
        let err = Parser::new(&specs).parse().unwrap_err();
        assert_eq!(err.to_string(), "invalid port format: \"1:2:3\"");
    }

    #[test]
    fn test_invalid_ports() {
        for bad in ["foo", "foo:123", "70000"] {
            let specs = vec![bad.to_string()];
            assert!(Parser::new(&specs).parse().is_err(), "spec {bad:?}");
        }
    }

    #[test]
    fn test_trailing_at_sign_defaults_to_tcp() {
        let specs = vec!["80@".to_string()];
        let got = Parser::new(&specs).parse().unwrap();
        assert_eq!(got[0].protocol, Protocol::Tcp);
        assert_eq!(got[0].remote_port, 80);
    }

    #[test]
    fn test_protocol_wire_bytes() {
        assert_eq!(Protocol::Tcp.wire_byte(), PROTOCOL_TCP);
        assert_eq!(Protocol::Udp.wire_byte(), PROTOCOL_UDP);
    }
}
