//! Server-side TCP proxy loop
//!
//! Two brokers copy in opposite directions with pooled buffers. Half-close
//! is load-bearing: when one direction hits EOF the broker shuts down the
//! write side of its destination so the peer sees a clean FIN, while the
//! other direction keeps draining.

use crate::protocol::RequestId;
use crate::relay::bufpool::{BufferPool, TCP_BUFFER_SIZE};
use std::sync::OnceLock;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tracing::debug;

fn tcp_pool() -> &'static BufferPool {
    static POOL: OnceLock<BufferPool> = OnceLock::new();
    POOL.get_or_init(|| BufferPool::new(TCP_BUFFER_SIZE))
}

/// Copy one direction until EOF or error, then close the write side of
/// the destination. Returns the write half so the caller can keep tuning
/// the socket it belongs to.
async fn broker(mut src: OwnedReadHalf, mut dst: OwnedWriteHalf) -> OwnedWriteHalf {
    let mut buf = tcp_pool().get();
    loop {
        match src.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                if dst.write_all(&buf[..n]).await.is_err() {
                    break;
                }
            }
        }
    }
    let _ = dst.shutdown().await;
    dst
}

/// Relay bytes between the tunnel-side connection and the upstream until
/// both directions are done.
///
/// When the downstream (tunnel) side closes first, any queued upstream
/// data is useless; linger(0) on the upstream recycles the port faster.
pub async fn proxy_tcp(request_id: RequestId, down: TcpStream, up: TcpStream) {
    let req_id = request_id.to_string();

    let (down_read, down_write) = down.into_split();
    let (up_read, up_write) = up.into_split();

    let mut down_to_up = tokio::spawn(broker(down_read, up_write));
    let mut up_to_down = tokio::spawn(broker(up_read, down_write));

    tokio::select! {
        res = &mut down_to_up => {
            debug!(reqID = %req_id, "client closed connection");
            if let Ok(up_write) = res {
                let _ = up_write.as_ref().set_linger(Some(Duration::ZERO));
            }
            up_to_down.abort();
            let _ = up_to_down.await;
        }
        _ = &mut up_to_down => {
            debug!(reqID = %req_id, "server closed connection");
            down_to_up.abort();
            let _ = down_to_up.await;
        }
    }

    debug!(reqID = %req_id, "proxy tcp exit");
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    async fn tcp_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).await.unwrap();
        let (server, _) = listener.accept().await.unwrap();
        (client, server)
    }

    #[tokio::test]
    async fn test_proxy_tcp_relays_both_directions() {
        let (mut local, down) = tcp_pair().await;
        let (up, mut remote) = tcp_pair().await;

        let proxy = tokio::spawn(proxy_tcp(RequestId::new(), down, up));

        local.write_all(b"ping").await.unwrap();
        let mut buf = [0u8; 4];
        remote.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");

        remote.write_all(b"pong").await.unwrap();
        local.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"pong");

        drop(local);
        drop(remote);
        let _ = tokio::time::timeout(Duration::from_secs(1), proxy).await;
    }

    #[tokio::test]
    async fn test_proxy_tcp_propagates_half_close_upstream() {
        let (mut local, down) = tcp_pair().await;
        let (up, mut remote) = tcp_pair().await;

        let proxy = tokio::spawn(proxy_tcp(RequestId::new(), down, up));

        // The client sends a request and closes its write side; upstream
        // sees the request followed by a clean FIN.
        local.write_all(b"req").await.unwrap();
        local.shutdown().await.unwrap();

        let mut buf = [0u8; 3];
        remote.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"req");
        assert_eq!(remote.read(&mut buf).await.unwrap(), 0);

        let _ = tokio::time::timeout(Duration::from_secs(1), proxy).await;
    }

    #[tokio::test]
    async fn test_proxy_tcp_delivers_reply_before_upstream_close() {
        let (mut local, down) = tcp_pair().await;
        let (up, mut remote) = tcp_pair().await;

        let proxy = tokio::spawn(proxy_tcp(RequestId::new(), down, up));

        // Upstream pushes a banner and closes first; the reply reaches the
        // client intact before teardown.
        remote.write_all(b"banner").await.unwrap();
        drop(remote);

        let mut reply = Vec::new();
        local.read_to_end(&mut reply).await.unwrap();
        assert_eq!(reply, b"banner");

        let _ = tokio::time::timeout(Duration::from_secs(1), proxy).await;
    }

    #[tokio::test]
    async fn test_proxy_tcp_exits_when_upstream_closes() {
        let (mut local, down) = tcp_pair().await;
        let (up, remote) = tcp_pair().await;

        let proxy = tokio::spawn(proxy_tcp(RequestId::new(), down, up));

        drop(remote);

        let mut buf = Vec::new();
        local.read_to_end(&mut buf).await.unwrap();
        assert!(buf.is_empty());

        let res = tokio::time::timeout(Duration::from_secs(1), proxy).await;
        assert!(res.is_ok());
    }
}
