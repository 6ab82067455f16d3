//! Tunnel abstraction
//!
//! A tunnel is an already-established multiplexed connection to the
//! in-cluster dispatcher. The collaborator behind [`StreamConnection`]
//! hands out raw logical streams; this module layers the port-forward
//! conventions on top: every request opens an error stream (write side
//! closed immediately) followed by a data stream, and the error stream is
//! drained into a channel that yields exactly one value when the stream
//! terminates.

mod tcp;

pub use tcp::TcpTunnel;

use crate::protocol::RequestId;
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{oneshot, watch};

/// Stream header naming the sub-stream kind.
pub const HEADER_STREAM_TYPE: &str = "streamType";
/// Stream header carrying the dispatcher port.
pub const HEADER_PORT: &str = "port";
/// Stream header carrying the per-flow request ID.
pub const HEADER_REQUEST_ID: &str = "requestID";

/// Sub-stream kind for payload bytes.
pub const STREAM_TYPE_DATA: &str = "data";
/// Sub-stream kind for out-of-band errors.
pub const STREAM_TYPE_ERROR: &str = "error";

/// Object-safe byte stream.
pub trait StreamDyn: AsyncRead + AsyncWrite + Unpin + Send + Debug {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send + Debug> StreamDyn for T {}

/// The multiplexed connection contract required from the orchestrator
/// layer.
///
/// Stream creation is serialised internally by the implementation; the
/// connection is shared read-only by every forwarder and closed exactly
/// once by the top-level driver.
#[async_trait]
pub trait StreamConnection: Send + Sync {
    /// Create one logical stream described by the given headers.
    async fn create_stream(
        &self,
        headers: HashMap<String, String>,
    ) -> Result<Box<dyn StreamDyn>>;

    /// One-shot signal observed when the tunnel itself terminates.
    ///
    /// The receiver reads `true` once the tunnel is gone; `borrow()` gives
    /// a non-blocking check and `wait_for` an awaitable one.
    fn closed(&self) -> watch::Receiver<bool>;

    /// Terminate the tunnel and all its streams.
    fn close(&self);
}

/// One logical request stream: payload bytes plus the deferred error
/// value read from the companion error stream.
#[derive(Debug)]
pub struct TunnelStream {
    /// The data sub-stream carrying header, ack and payload.
    pub data: Box<dyn StreamDyn>,
    errors: ErrorReceiver,
}

impl TunnelStream {
    /// Split into the data stream and the error receiver.
    pub fn into_parts(self) -> (Box<dyn StreamDyn>, ErrorReceiver) {
        (self.data, self.errors)
    }
}

/// Receiver for the single error value produced when a logical stream
/// terminates.
#[derive(Debug)]
pub struct ErrorReceiver(oneshot::Receiver<Option<String>>);

impl ErrorReceiver {
    /// Wait for the stream to terminate and return its error, if any.
    pub async fn recv(self) -> Option<String> {
        self.0.await.unwrap_or(None)
    }
}

/// Whether an error-stream message indicates a corrupted multiplexed
/// session. The only known recovery is closing the whole tunnel.
pub fn is_sandbox_closed(msg: &str) -> bool {
    msg.contains("network namespace for sandbox ") && msg.trim_end().ends_with("is closed")
}

/// Open one logical request stream on the tunnel.
///
/// The error stream is created first and its write side closed right
/// away; a background task drains it and delivers exactly one value
/// (possibly none) once it terminates.
pub async fn create_stream(
    conn: &Arc<dyn StreamConnection>,
    request_id: RequestId,
    server_port: u16,
) -> Result<TunnelStream> {
    let mut headers = HashMap::from([
        (HEADER_PORT.to_owned(), server_port.to_string()),
        (HEADER_REQUEST_ID.to_owned(), request_id.to_string()),
        (
            HEADER_STREAM_TYPE.to_owned(),
            STREAM_TYPE_ERROR.to_owned(),
        ),
    ]);

    let mut error_stream = conn
        .create_stream(headers.clone())
        .await
        .context("create error stream")?;
    // We never write to this stream.
    let _ = error_stream.shutdown().await;

    headers.insert(HEADER_STREAM_TYPE.to_owned(), STREAM_TYPE_DATA.to_owned());
    let data = conn
        .create_stream(headers)
        .await
        .context("create data stream")?;

    let (tx, rx) = oneshot::channel();
    let conn = Arc::clone(conn);
    tokio::spawn(async move {
        let mut message = String::new();
        let value = match error_stream.read_to_string(&mut message).await {
            Err(err) => Some(format!("error reading from error stream: {err}")),
            Ok(_) if !message.is_empty() => {
                Some(format!("an error occurred forwarding: {message}"))
            }
            Ok(_) => None,
        };
        let _ = tx.send(value);

        if is_sandbox_closed(&message) {
            conn.close();
        }
    });

    Ok(TunnelStream {
        data,
        errors: ErrorReceiver(rx),
    })
}
