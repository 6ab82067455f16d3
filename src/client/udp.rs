//! Client-side UDP worker
//!
//! One worker owns the upstream stream for one local source address. A
//! downstream writer drains the conntrack channel into length-prefixed
//! frames; an upstream reader turns frames back into datagrams addressed
//! to the source. The worker signals the cleaner with its source key when
//! either side terminates.

use crate::protocol::udp::{read_datagram, write_datagram, MAX_UDP_PAYLOAD};
use crate::protocol::{Acknowledgement, AddrPort, Header, RequestId, PROTOCOL_UDP};
use crate::server::SERVER_PORT;
use crate::tunnel::{self, StreamConnection};
use bytes::Bytes;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

/// Forward datagrams from one local source through the tunnel to `dst`.
#[allow(clippy::too_many_arguments)]
pub async fn handle_udp_conn(
    socket: Arc<UdpSocket>,
    client_addr: SocketAddr,
    mut datagrams: mpsc::Receiver<Bytes>,
    finish: mpsc::Sender<String>,
    conn: Arc<dyn StreamConnection>,
    dst: AddrPort,
) {
    let request_id = RequestId::new();
    let req_id = request_id.to_string();

    let local_addr = socket
        .local_addr()
        .map(|a| a.to_string())
        .unwrap_or_default();
    info!(
        reqID = %req_id,
        dstAddr = %dst,
        localAddr = %local_addr,
        clientAddr = %client_addr,
        "handling udp connection"
    );

    // Whatever happens below, let the cleaner drop our conntrack entry.
    let _guard = FinishGuard {
        finish,
        key: client_addr.to_string(),
    };

    let stream = match tunnel::create_stream(&conn, request_id, SERVER_PORT).await {
        Ok(stream) => stream,
        Err(err) => {
            error!(reqID = %req_id, error = %err, "fail to create stream");
            return;
        }
    };
    let (data, errors) = stream.into_parts();

    let (mut stream_read, mut stream_write) = tokio::io::split(data);

    let hdr = Header {
        version: 0,
        request_id,
        protocol: PROTOCOL_UDP,
        port: dst.port(),
        addr: dst.addr().clone(),
    };
    if let Err(err) = hdr.write_to(&mut stream_write).await {
        error!(reqID = %req_id, error = %err, "fail to write header");
        return;
    }

    let ack = match Acknowledgement::read_from(&mut stream_read).await {
        Ok(ack) => ack,
        Err(err) => {
            error!(reqID = %req_id, error = %err, "fail to receive ack");
            return;
        }
    };
    if !ack.code.is_ok() {
        error!(reqID = %req_id, error = %ack.code, "fail to connect");
        return;
    }

    // Downstream writer: local datagrams onto the stream.
    let writer = tokio::spawn(async move {
        while let Some(datagram) = datagrams.recv().await {
            if write_datagram(&mut stream_write, &datagram).await.is_err() {
                return;
            }
        }
    });

    // Upstream reader: framed replies back to the local source.
    let rid = req_id.clone();
    let reader = tokio::spawn(async move {
        let mut buf = vec![0u8; MAX_UDP_PAYLOAD];
        loop {
            let n = match read_datagram(&mut stream_read, &mut buf).await {
                Ok(n) => n,
                Err(_) => break,
            };
            if socket.send_to(&buf[..n], client_addr).await.is_err() {
                break;
            }
        }
        debug!(reqID = %rid, "server close connection");
    });

    // The stream is done when the server stops sending; the writer has
    // nothing useful left to do at that point.
    let _ = reader.await;
    writer.abort();

    // The error channel always yields exactly one value, possibly none.
    if let Some(err) = errors.recv().await {
        error!(reqID = %req_id, error = %err, "unexpected error from stream");
    }
    debug!(reqID = %req_id, "handle udp connection exit");
}

struct FinishGuard {
    finish: mpsc::Sender<String>,
    key: String,
}

impl Drop for FinishGuard {
    fn drop(&mut self) {
        let finish = self.finish.clone();
        let key = std::mem::take(&mut self.key);
        tokio::spawn(async move {
            let _ = finish.send(key).await;
        });
    }
}
