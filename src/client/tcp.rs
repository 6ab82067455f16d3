//! Client-side TCP worker
//!
//! One worker per accepted local connection: open a logical stream, write
//! the request header, require an OK acknowledgement, then copy both
//! directions. The local-to-remote copy half-closes the stream on EOF so
//! the dispatcher can flush the reply; the worker only returns once the
//! remote side is done or a local write fails, then drains the stream's
//! error channel.

use crate::client::is_closed_conn_error;
use crate::protocol::{Acknowledgement, AddrPort, Header, RequestId, PROTOCOL_TCP};
use crate::server::SERVER_PORT;
use crate::tunnel::{self, StreamConnection};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tracing::{debug, error, info};

/// Forward one local TCP connection through the tunnel to `dst`.
pub async fn handle_tcp_conn(
    client_conn: TcpStream,
    conn: Arc<dyn StreamConnection>,
    dst: AddrPort,
) {
    let request_id = RequestId::new();
    let req_id = request_id.to_string();

    let client_addr = client_conn
        .peer_addr()
        .map(|a| a.to_string())
        .unwrap_or_default();
    let local_addr = client_conn
        .local_addr()
        .map(|a| a.to_string())
        .unwrap_or_default();
    info!(
        reqID = %req_id,
        dstAddr = %dst,
        localAddr = %local_addr,
        clientAddr = %client_addr,
        "handling tcp connection"
    );

    let stream = match tunnel::create_stream(&conn, request_id, SERVER_PORT).await {
        Ok(stream) => stream,
        Err(err) => {
            error!(reqID = %req_id, error = %err, "fail to create stream");
            return;
        }
    };
    let (mut data, errors) = stream.into_parts();

    let hdr = Header {
        version: 0,
        request_id,
        protocol: PROTOCOL_TCP,
        port: dst.port(),
        addr: dst.addr().clone(),
    };
    if let Err(err) = hdr.write_to(&mut data).await {
        error!(reqID = %req_id, error = %err, "fail to write header");
        return;
    }

    let ack = match Acknowledgement::read_from(&mut data).await {
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

    let (mut stream_read, mut stream_write) = tokio::io::split(data);
    let (mut client_read, mut client_write) = client_conn.into_split();

    let rid = req_id.clone();
    let mut remote_done = tokio::spawn(async move {
        // Copy from the remote side to the local port.
        if let Err(err) = tokio::io::copy(&mut stream_read, &mut client_write).await {
            if !is_closed_conn_error(&err) {
                error!(reqID = %rid, error = %err, "fail to copy from remote stream to local connection");
            }
        }
    });

    let rid = req_id.clone();
    let mut local_copy = tokio::spawn(async move {
        // Copy from the local port to the remote side, then tell the
        // server no more data is coming.
        let res = tokio::io::copy(&mut client_read, &mut stream_write).await;
        let _ = stream_write.shutdown().await;
        match res {
            Err(err) if !is_closed_conn_error(&err) => {
                error!(reqID = %rid, error = %err, "fail to copy from local connection to remote stream");
                Err(err)
            }
            _ => Ok(()),
        }
    });

    // Wait for the remote copy to finish, or bail out early when the
    // local-to-remote copy failed.
    tokio::select! {
        _ = &mut remote_done => {}
        res = &mut local_copy => {
            if !matches!(res, Ok(Err(_))) {
                let _ = (&mut remote_done).await;
            }
        }
    }
    remote_done.abort();
    local_copy.abort();

    // The error channel always yields exactly one value, possibly none.
    if let Some(err) = errors.recv().await {
        error!(reqID = %req_id, error = %err, "unexpected error from stream");
    }
    debug!(reqID = %req_id, "handle tcp connection exit");
}
