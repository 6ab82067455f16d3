//! Server-side UDP proxy loop
//!
//! Bridges the length-prefixed tunnel stream with a connected UDP socket.
//! Both directions poll with a short read deadline and share one idle
//! alarm; a timeout is keepalive polling while the alarm is live and an
//! exit condition once it has fired.

use crate::protocol::udp::{read_datagram, write_datagram, MAX_UDP_PAYLOAD};
use crate::protocol::RequestId;
use crate::relay::alarm::Alarm;
use crate::relay::bufpool::{BufferPool, UDP_BUFFER_SIZE};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpStream, UdpSocket};
use tokio::time::timeout;
use tracing::debug;

/// How long a UDP flow may stay idle before both directions exit.
pub const UDP_IDLE_TIMEOUT: Duration = Duration::from_secs(110);

/// Poll interval for the deadline-driven reads.
const READ_DEADLINE: Duration = Duration::from_secs(5);

fn udp_pool() -> &'static BufferPool {
    static POOL: OnceLock<BufferPool> = OnceLock::new();
    POOL.get_or_init(|| BufferPool::new(UDP_BUFFER_SIZE))
}

/// Tunnel stream → UDP socket.
async fn down_broker(mut down: OwnedReadHalf, up: Arc<UdpSocket>, alarm: Arc<Alarm>) {
    let mut buf = udp_pool().get();
    loop {
        let n = match timeout(READ_DEADLINE, read_datagram(&mut down, &mut buf)).await {
            Err(_) => {
                if alarm.expired() {
                    return;
                }
                continue;
            }
            Ok(Err(_)) => return,
            Ok(Ok(n)) => n,
        };
        if up.send(&buf[..n]).await.is_err() {
            return;
        }
        alarm.reset();
    }
}

/// UDP socket → tunnel stream.
async fn up_broker(up: Arc<UdpSocket>, mut down: OwnedWriteHalf, alarm: Arc<Alarm>) {
    let mut buf = udp_pool().get();
    loop {
        let n = match timeout(READ_DEADLINE, up.recv(&mut buf[..MAX_UDP_PAYLOAD])).await {
            Err(_) => {
                if alarm.expired() {
                    return;
                }
                continue;
            }
            Ok(Err(_)) => return,
            Ok(Ok(n)) => n,
        };
        if write_datagram(&mut down, &buf[..n]).await.is_err() {
            return;
        }
        alarm.reset();
    }
}

/// Relay datagrams between the tunnel-side connection and the connected
/// upstream socket until the stream closes or the flow idles out.
pub async fn proxy_udp(request_id: RequestId, down: TcpStream, up: UdpSocket) {
    let req_id = request_id.to_string();

    let alarm = Arc::new(Alarm::new(UDP_IDLE_TIMEOUT));
    let up = Arc::new(up);
    let (down_read, down_write) = down.into_split();

    let mut downstream = tokio::spawn(down_broker(down_read, Arc::clone(&up), Arc::clone(&alarm)));
    let mut upstream = tokio::spawn(up_broker(up, down_write, alarm));

    tokio::select! {
        _ = &mut downstream => {
            debug!(reqID = %req_id, "client closed connection");
            upstream.abort();
            let _ = upstream.await;
        }
        _ = &mut upstream => {
            debug!(reqID = %req_id, "server closed connection");
            downstream.abort();
            let _ = downstream.await;
        }
    }

    debug!(reqID = %req_id, "proxy udp exit");
}
