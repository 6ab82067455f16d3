//! Local listeners
//!
//! A forwarder owns one local listener (TCP or UDP), resolves the
//! destination once per new flow and spawns a worker per flow. Accept and
//! read loops exit as soon as the tunnel's closed signal fires.

use crate::client::conntrack::ConnTrack;
use crate::client::tcp::handle_tcp_conn;
use crate::client::udp::handle_udp_conn;
use crate::ports::{PortPair, Protocol};
use crate::protocol::udp::MAX_UDP_PAYLOAD;
use crate::protocol::{join_host_port, AddrPort};
use crate::resolver::AddrGetter;
use crate::tunnel::StreamConnection;
use anyhow::{Context, Result};
use bytes::Bytes;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, UdpSocket};
use tokio::sync::mpsc;
use tracing::{debug, error, info};

/// Receive-buffer size for the local UDP socket; bursts of datagrams
/// otherwise overflow the default while workers are being set up.
const UDP_RECV_BUFFER: usize = 1 << 20;

enum Listener {
    Tcp(TcpListener),
    Udp(Arc<UdpSocket>),
}

/// One local listener forwarding to one remote port.
pub struct PortForwarder {
    resolver: Arc<dyn AddrGetter>,
    ports: PortPair,
    listen_addr: String,
    listener: Option<Listener>,
}

impl PortForwarder {
    /// Describe a forwarder; nothing is bound until [`listen`](Self::listen).
    pub fn new(resolver: Arc<dyn AddrGetter>, ports: PortPair, listen_addr: String) -> Self {
        PortForwarder {
            resolver,
            ports,
            listen_addr,
            listener: None,
        }
    }

    /// The port pair this forwarder serves.
    pub fn ports(&self) -> PortPair {
        self.ports
    }

    /// Bind the local socket.
    pub async fn listen(&mut self) -> Result<()> {
        let bind_addr = join_host_port(&self.listen_addr, self.ports.local_port);
        let listener = match self.ports.protocol {
            Protocol::Tcp => {
                let listener = TcpListener::bind(&bind_addr)
                    .await
                    .with_context(|| format!("listen on {bind_addr}"))?;
                Listener::Tcp(listener)
            }
            Protocol::Udp => {
                let socket = UdpSocket::bind(&bind_addr)
                    .await
                    .with_context(|| format!("listen on {bind_addr}"))?;
                let _ = socket2::SockRef::from(&socket).set_recv_buffer_size(UDP_RECV_BUFFER);
                Listener::Udp(Arc::new(socket))
            }
        };
        self.listener = Some(listener);
        Ok(())
    }

    /// The bound local address, once listening.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        match self.listener.as_ref()? {
            Listener::Tcp(l) => l.local_addr().ok(),
            Listener::Udp(s) => s.local_addr().ok(),
        }
    }

    /// Serve flows until the tunnel closes or the listener fails.
    pub async fn run(mut self, conn: Arc<dyn StreamConnection>) {
        match self.listener.take() {
            Some(Listener::Tcp(listener)) => self.run_tcp(listener, conn).await,
            Some(Listener::Udp(socket)) => self.run_udp(socket, conn).await,
            None => error!("forwarder started without listening"),
        }
    }

    async fn run_tcp(&self, listener: TcpListener, conn: Arc<dyn StreamConnection>) {
        let local_addr = listener
            .local_addr()
            .map(|a| a.to_string())
            .unwrap_or_default();
        info!(
            protocol = %self.ports.protocol,
            localAddr = %local_addr,
            remotePort = self.ports.remote_port,
            "forwarding"
        );

        let mut closed = conn.closed();
        loop {
            let accepted = tokio::select! {
                biased;
                _ = closed.wait_for(|v| *v) => return,
                accepted = listener.accept() => accepted,
            };

            let (stream, _) = match accepted {
                Ok(accepted) => accepted,
                Err(err) => {
                    error!(error = %err, "fail to accept tcp connection");
                    return;
                }
            };

            let remote_addr = match self.resolver.get() {
                Ok(addr) => addr,
                Err(err) => {
                    error!(error = %err, "fail to get remote address");
                    continue;
                }
            };

            tokio::spawn(handle_tcp_conn(
                stream,
                Arc::clone(&conn),
                AddrPort::new(remote_addr, self.ports.remote_port),
            ));
        }
    }

    async fn run_udp(&self, socket: Arc<UdpSocket>, conn: Arc<dyn StreamConnection>) {
        let local_addr = socket
            .local_addr()
            .map(|a| a.to_string())
            .unwrap_or_default();
        info!(
            protocol = %self.ports.protocol,
            localAddr = %local_addr,
            remotePort = self.ports.remote_port,
            "forwarding"
        );

        let track = Arc::new(ConnTrack::new());
        let (finish_tx, mut finish_rx) = mpsc::channel::<String>(16);

        let cleaner_track = Arc::clone(&track);
        tokio::spawn(async move {
            while let Some(key) = finish_rx.recv().await {
                cleaner_track.delete(&key);
                debug!(key = %key, "remove udp conn from conntrack table");
            }
        });

        let mut closed = conn.closed();
        let mut buf = vec![0u8; MAX_UDP_PAYLOAD];
        loop {
            let received = tokio::select! {
                biased;
                _ = closed.wait_for(|v| *v) => return,
                received = socket.recv_from(&mut buf) => received,
            };

            let (n, client_addr) = match received {
                Ok(received) => received,
                Err(err) => {
                    error!(error = %err, "fail to read udp packet");
                    return;
                }
            };
            // The read buffer is reused; hand the worker its own copy.
            let datagram = Bytes::copy_from_slice(&buf[..n]);

            let key = client_addr.to_string();
            let sender = match track.get(&key) {
                Some(sender) => sender,
                None => {
                    let remote_addr = match self.resolver.get() {
                        Ok(addr) => addr,
                        Err(err) => {
                            // Drop the datagram; nothing is installed so the
                            // next one retries resolution.
                            error!(error = %err, "fail to get remote address");
                            continue;
                        }
                    };

                    let (tx, rx) = mpsc::channel(1);
                    track.set(key, tx.clone());
                    tokio::spawn(handle_udp_conn(
                        Arc::clone(&socket),
                        client_addr,
                        rx,
                        finish_tx.clone(),
                        Arc::clone(&conn),
                        AddrPort::new(remote_addr, self.ports.remote_port),
                    ));
                    tx
                }
            };

            // A failed send means the worker is gone and the entry is about
            // to be cleaned up; the datagram is dropped.
            let _ = sender.send(datagram).await;
        }
    }
}
