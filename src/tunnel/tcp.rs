//! Plain-TCP tunnel
//!
//! Connects each logical stream straight to a dispatcher listening on a
//! reachable address. Useful for driving a dispatcher without an
//! orchestrator in between, and for the integration suite.

use super::{StreamConnection, StreamDyn, HEADER_STREAM_TYPE, STREAM_TYPE_ERROR};
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::net::SocketAddr;
use tokio::net::TcpStream;
use tokio::sync::watch;

/// A tunnel that opens one TCP connection per data stream.
///
/// Error streams have no wire counterpart here; they are satisfied with an
/// immediately-EOF pipe so the stream conventions still hold.
#[derive(Debug)]
pub struct TcpTunnel {
    server_addr: SocketAddr,
    closed_tx: watch::Sender<bool>,
}

impl TcpTunnel {
    /// Build a tunnel that dials the dispatcher at `server_addr`.
    pub fn new(server_addr: SocketAddr) -> Self {
        TcpTunnel {
            server_addr,
            closed_tx: watch::Sender::new(false),
        }
    }
}

#[async_trait]
impl StreamConnection for TcpTunnel {
    async fn create_stream(
        &self,
        headers: HashMap<String, String>,
    ) -> Result<Box<dyn StreamDyn>> {
        if *self.closed_tx.borrow() {
            anyhow::bail!("tunnel is closed");
        }

        if headers.get(HEADER_STREAM_TYPE).map(String::as_str) == Some(STREAM_TYPE_ERROR) {
            // EOFs as soon as it is read.
            let (ours, _theirs) = tokio::io::duplex(1);
            return Ok(Box::new(ours));
        }

        let stream = TcpStream::connect(self.server_addr)
            .await
            .with_context(|| format!("connect to dispatcher at {}", self.server_addr))?;
        stream.set_nodelay(true)?;
        Ok(Box::new(stream))
    }

    fn closed(&self) -> watch::Receiver<bool> {
        self.closed_tx.subscribe()
    }

    fn close(&self) {
        let _ = self.closed_tx.send(true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_data_stream_reaches_server() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let tunnel = TcpTunnel::new(addr);
        let mut stream = tunnel
            .create_stream(HashMap::from([(
                HEADER_STREAM_TYPE.to_owned(),
                super::super::STREAM_TYPE_DATA.to_owned(),
            )]))
            .await
            .unwrap();

        let (mut server, _) = listener.accept().await.unwrap();
        stream.write_all(b"hello").await.unwrap();

        let mut buf = [0u8; 5];
        server.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"hello");
    }

    #[tokio::test]
    async fn test_error_stream_is_empty() {
        let tunnel = TcpTunnel::new("127.0.0.1:1".parse().unwrap());
        let mut stream = tunnel
            .create_stream(HashMap::from([(
                HEADER_STREAM_TYPE.to_owned(),
                STREAM_TYPE_ERROR.to_owned(),
            )]))
            .await
            .unwrap();

        let mut buf = Vec::new();
        let n = stream.read_to_end(&mut buf).await.unwrap();
        assert_eq!(n, 0);
    }

    #[tokio::test]
    async fn test_close_signal_is_observable() {
        let tunnel = TcpTunnel::new("127.0.0.1:1".parse().unwrap());
        let closed = tunnel.closed();
        assert!(!*closed.borrow());

        tunnel.close();
        assert!(*closed.borrow());

        let res = tunnel.create_stream(HashMap::new()).await;
        assert!(res.is_err());
    }
}
