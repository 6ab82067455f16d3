//! Server-side dispatcher
//!
//! Accepts tunnel-side connections, reads the request header, dials the
//! destination and answers with a typed acknowledgement before handing the
//! connection to the per-protocol proxy loop.

use crate::protocol::{
    join_host_port, AckCode, Acknowledgement, Header, PROTOCOL_TCP, PROTOCOL_UDP,
};
use crate::relay::{proxy_tcp, proxy_udp};
use anyhow::Result;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::{lookup_host, TcpListener, TcpStream, UdpSocket};
use tokio::time::timeout;
use tracing::{error, info};

/// Port the dispatcher listens on inside the cluster.
pub const SERVER_PORT: u16 = 9527;

/// Default timeout for dialing upstream destinations.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// A failed dial, categorised for the acknowledgement.
#[derive(Debug)]
enum DialError {
    NoSuchHost(String),
    ResolveTimeout,
    ConnectTimeout,
    Other(std::io::Error),
}

impl DialError {
    fn ack_code(&self) -> AckCode {
        match self {
            DialError::NoSuchHost(_) => AckCode::NoSuchHost,
            DialError::ResolveTimeout => AckCode::ResolveTimeout,
            DialError::ConnectTimeout => AckCode::ConnectTimeout,
            DialError::Other(_) => AckCode::UnknownError,
        }
    }
}

impl std::fmt::Display for DialError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DialError::NoSuchHost(host) => write!(f, "no such host: {host}"),
            DialError::ResolveTimeout => f.write_str("resolve timeout"),
            DialError::ConnectTimeout => f.write_str("connect timeout"),
            DialError::Other(err) => write!(f, "{err}"),
        }
    }
}

/// The dispatcher: a dial-and-copy engine behind the tunnel.
#[derive(Clone, Debug)]
pub struct Dispatcher {
    connect_timeout: Duration,
}

impl Dispatcher {
    /// Create a dispatcher with the given upstream connect timeout.
    pub fn new(connect_timeout: Duration) -> Self {
        Dispatcher { connect_timeout }
    }

    /// Serve connections accepted from `listener` forever.
    ///
    /// Accept failures are logged and the loop keeps going; every accepted
    /// connection is handled on its own task.
    pub async fn run(self, listener: TcpListener) -> Result<()> {
        let local_addr = listener.local_addr()?;
        info!(address = %local_addr, "relay server is running");

        loop {
            let (conn, _) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(err) => {
                    error!(error = %err, "fail to accept connection");
                    continue;
                }
            };
            let dispatcher = self.clone();
            tokio::spawn(async move {
                dispatcher.handle_conn(conn).await;
            });
        }
    }

    async fn handle_conn(&self, mut conn: TcpStream) {
        let hdr = match Header::read_from(&mut conn).await {
            Ok(hdr) => hdr,
            Err(err) => {
                error!(error = %err, "fail to read header");
                return;
            }
        };

        let req_id = hdr.request_id.to_string();
        let dst = join_host_port(&hdr.addr.to_string(), hdr.port);

        match hdr.protocol {
            PROTOCOL_TCP => {
                let upstream = match self.dial_tcp(&dst).await {
                    Ok(upstream) => upstream,
                    Err(err) => {
                        error!(reqID = %req_id, dstAddr = %dst, error = %err, "fail to create tcp connection");
                        let _ = Acknowledgement::new(err.ack_code()).write_to(&mut conn).await;
                        return;
                    }
                };
                if let Err(err) = Acknowledgement::new(AckCode::Ok).write_to(&mut conn).await {
                    error!(reqID = %req_id, error = %err, "fail to write ack");
                    return;
                }
                info!(reqID = %req_id, dstAddr = %dst, "start proxy tcp request");
                proxy_tcp(hdr.request_id, conn, upstream).await;
            }

            PROTOCOL_UDP => {
                let upstream = match self.dial_udp(&dst).await {
                    Ok(upstream) => upstream,
                    Err(err) => {
                        error!(reqID = %req_id, dstAddr = %dst, error = %err, "fail to create udp connection");
                        let _ = Acknowledgement::new(err.ack_code()).write_to(&mut conn).await;
                        return;
                    }
                };
                if let Err(err) = Acknowledgement::new(AckCode::Ok).write_to(&mut conn).await {
                    error!(reqID = %req_id, error = %err, "fail to write ack");
                    return;
                }
                info!(reqID = %req_id, dstAddr = %dst, "start proxy udp request");
                proxy_udp(hdr.request_id, conn, upstream).await;
            }

            unknown => {
                info!(reqID = %req_id, dstAddr = %dst, protocol = unknown, "unknown protocol");
                let _ = Acknowledgement::new(AckCode::UnknownProtocol)
                    .write_to(&mut conn)
                    .await;
            }
        }
    }

    /// Resolve the destination, separating DNS failures from DNS
    /// timeouts so each maps to its own ack code.
    async fn resolve(&self, dst: &str) -> Result<SocketAddr, DialError> {
        match timeout(self.connect_timeout, lookup_host(dst)).await {
            Err(_) => Err(DialError::ResolveTimeout),
            Ok(Err(_)) => Err(DialError::NoSuchHost(dst.to_owned())),
            Ok(Ok(mut addrs)) => addrs.next().ok_or(DialError::NoSuchHost(dst.to_owned())),
        }
    }

    async fn dial_tcp(&self, dst: &str) -> Result<TcpStream, DialError> {
        let addr = self.resolve(dst).await?;
        match timeout(self.connect_timeout, TcpStream::connect(addr)).await {
            Err(_) => Err(DialError::ConnectTimeout),
            Ok(Err(err)) => Err(DialError::Other(err)),
            Ok(Ok(stream)) => Ok(stream),
        }
    }

    async fn dial_udp(&self, dst: &str) -> Result<UdpSocket, DialError> {
        let addr = self.resolve(dst).await?;
        let bind_addr = if addr.is_ipv4() { "0.0.0.0:0" } else { "[::]:0" };
        let socket = UdpSocket::bind(bind_addr).await.map_err(DialError::Other)?;
        socket.connect(addr).await.map_err(DialError::Other)?;
        Ok(socket)
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Dispatcher::new(DEFAULT_CONNECT_TIMEOUT)
    }
}
