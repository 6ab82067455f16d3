//! SOCKS5 front end
//!
//! A minimal RFC 1928 subset: version 5, no authentication, CONNECT only.
//! The handshake yields the requested destination and the accepted
//! connection is handed to the regular TCP forwarding path.

use crate::client::tcp::handle_tcp_conn;
use crate::protocol::{Addr, AddrPort, ADDR_TYPE_HOST, ADDR_TYPE_IP};
use crate::tunnel::StreamConnection;
use anyhow::{bail, Result};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{error, info};

const SOCKS5_VERSION: u8 = 0x05;
const CMD_CONNECT: u8 = 0x01;
const ATYP_IPV4: u8 = 0x01;
const ATYP_DOMAIN: u8 = 0x03;
const ATYP_IPV6: u8 = 0x04;

/// VER, REP, RSV, ATYP=IPv4, BND.ADDR and BND.PORT all zero.
const REPLY_SUCCEEDED: [u8; 10] = [5, 0, 0, 1, 0, 0, 0, 0, 0, 0];
const REPLY_COMMAND_NOT_SUPPORTED: [u8; 10] = [5, 7, 0, 1, 0, 0, 0, 0, 0, 0];
const REPLY_ADDR_TYPE_NOT_SUPPORTED: [u8; 10] = [5, 8, 0, 1, 0, 0, 0, 0, 0, 0];

/// Run the SOCKS5 handshake and return the requested destination.
pub async fn socks5_handshake(conn: &mut TcpStream) -> Result<AddrPort> {
    // VER, NMETHODS, METHODS
    let mut head = [0u8; 2];
    conn.read_exact(&mut head).await?;
    if head[0] != SOCKS5_VERSION {
        bail!("unsupported socks version: {}", head[0]);
    }
    let mut methods = vec![0u8; head[1] as usize];
    conn.read_exact(&mut methods).await?;

    // VER, METHOD: no authentication
    conn.write_all(&[SOCKS5_VERSION, 0]).await?;

    // VER, CMD, RSV
    let mut request = [0u8; 3];
    conn.read_exact(&mut request).await?;
    let cmd = request[1];

    let mut atyp = [0u8; 1];
    conn.read_exact(&mut atyp).await?;

    let addr = match atyp[0] {
        ATYP_IPV4 => {
            let mut octets = [0u8; 4];
            conn.read_exact(&mut octets).await?;
            Addr::from_bytes(ADDR_TYPE_IP, &octets)?
        }
        ATYP_IPV6 => {
            let mut octets = [0u8; 16];
            conn.read_exact(&mut octets).await?;
            Addr::from_bytes(ADDR_TYPE_IP, &octets)?
        }
        ATYP_DOMAIN => {
            let mut len = [0u8; 1];
            conn.read_exact(&mut len).await?;
            let mut name = vec![0u8; len[0] as usize];
            conn.read_exact(&mut name).await?;
            Addr::from_bytes(ADDR_TYPE_HOST, &name)?
        }
        other => {
            let _ = conn.write_all(&REPLY_ADDR_TYPE_NOT_SUPPORTED).await;
            bail!("unsupported address type: {other}");
        }
    };

    let mut port_buf = [0u8; 2];
    conn.read_exact(&mut port_buf).await?;
    let port = u16::from_be_bytes(port_buf);

    match cmd {
        CMD_CONNECT => {
            conn.write_all(&REPLY_SUCCEEDED).await?;
        }
        other => {
            let _ = conn.write_all(&REPLY_COMMAND_NOT_SUPPORTED).await;
            bail!("unsupported command: {other}");
        }
    }

    Ok(AddrPort::new(addr, port))
}

async fn handle_socks5_conn(mut client_conn: TcpStream, conn: Arc<dyn StreamConnection>) {
    let dst = match socks5_handshake(&mut client_conn).await {
        Ok(dst) => dst,
        Err(err) => {
            error!(error = %err, "fail to handle socks5 handshake");
            return;
        }
    };

    handle_tcp_conn(client_conn, conn, dst).await;
}

/// Accept SOCKS5 clients until the tunnel closes or the listener fails.
pub async fn run_socks5_server(listener: TcpListener, conn: Arc<dyn StreamConnection>) {
    let local_addr = listener
        .local_addr()
        .map(|a| a.to_string())
        .unwrap_or_default();
    info!(address = %local_addr, "socks5 server is running");

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
        tokio::spawn(handle_socks5_conn(stream, Arc::clone(&conn)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    async fn handshake_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).await.unwrap();
        let (server, _) = listener.accept().await.unwrap();
        (client, server)
    }

    #[tokio::test]
    async fn test_connect_with_domain() {
        let (mut client, mut server) = handshake_pair().await;

        let handshake = tokio::spawn(async move { socks5_handshake(&mut server).await });

        client.write_all(&[5, 1, 0]).await.unwrap();
        let mut reply = [0u8; 2];
        client.read_exact(&mut reply).await.unwrap();
        assert_eq!(reply, [5, 0]);

        let mut request = vec![5, 1, 0, ATYP_DOMAIN, 11];
        request.extend_from_slice(b"example.com");
        request.extend_from_slice(&443u16.to_be_bytes());
        client.write_all(&request).await.unwrap();

        let mut reply = [0u8; 10];
        client.read_exact(&mut reply).await.unwrap();
        assert_eq!(reply, REPLY_SUCCEEDED);

        let dst = handshake.await.unwrap().unwrap();
        assert_eq!(dst.addr(), &Addr::from_host("example.com"));
        assert_eq!(dst.port(), 443);
    }

    #[tokio::test]
    async fn test_connect_with_ipv4() {
        let (mut client, mut server) = handshake_pair().await;
        let handshake = tokio::spawn(async move { socks5_handshake(&mut server).await });

        client.write_all(&[5, 1, 0]).await.unwrap();
        let mut reply = [0u8; 2];
        client.read_exact(&mut reply).await.unwrap();

        let mut request = vec![5, 1, 0, ATYP_IPV4, 10, 0, 0, 7];
        request.extend_from_slice(&80u16.to_be_bytes());
        client.write_all(&request).await.unwrap();

        let mut reply = [0u8; 10];
        client.read_exact(&mut reply).await.unwrap();
        assert_eq!(reply, REPLY_SUCCEEDED);

        let dst = handshake.await.unwrap().unwrap();
        assert_eq!(dst.addr(), &Addr::from_ip("10.0.0.7").unwrap());
        assert_eq!(dst.port(), 80);
    }

    #[tokio::test]
    async fn test_connect_with_ipv6() {
        let (mut client, mut server) = handshake_pair().await;
        let handshake = tokio::spawn(async move { socks5_handshake(&mut server).await });

        client.write_all(&[5, 1, 0]).await.unwrap();
        let mut reply = [0u8; 2];
        client.read_exact(&mut reply).await.unwrap();

        let mut request = vec![5, 1, 0, ATYP_IPV6];
        let mut v6 = [0u8; 16];
        v6[15] = 1;
        request.extend_from_slice(&v6);
        request.extend_from_slice(&53u16.to_be_bytes());
        client.write_all(&request).await.unwrap();

        let mut reply = [0u8; 10];
        client.read_exact(&mut reply).await.unwrap();
        assert_eq!(reply, REPLY_SUCCEEDED);

        let dst = handshake.await.unwrap().unwrap();
        assert_eq!(dst.addr(), &Addr::from_ip("::1").unwrap());
    }

    #[tokio::test]
    async fn test_bind_command_rejected() {
        let (mut client, mut server) = handshake_pair().await;
        let handshake = tokio::spawn(async move { socks5_handshake(&mut server).await });

        client.write_all(&[5, 1, 0]).await.unwrap();
        let mut reply = [0u8; 2];
        client.read_exact(&mut reply).await.unwrap();

        // BIND to 1.2.3.4:80
        let mut request = vec![5, 2, 0, ATYP_IPV4, 1, 2, 3, 4];
        request.extend_from_slice(&80u16.to_be_bytes());
        client.write_all(&request).await.unwrap();

        let mut reply = [0u8; 10];
        client.read_exact(&mut reply).await.unwrap();
        assert_eq!(reply, REPLY_COMMAND_NOT_SUPPORTED);

        assert!(handshake.await.unwrap().is_err());
    }

    #[tokio::test]
    async fn test_unknown_address_type_rejected() {
        let (mut client, mut server) = handshake_pair().await;
        let handshake = tokio::spawn(async move { socks5_handshake(&mut server).await });

        client.write_all(&[5, 1, 0]).await.unwrap();
        let mut reply = [0u8; 2];
        client.read_exact(&mut reply).await.unwrap();

        client.write_all(&[5, 1, 0, 9]).await.unwrap();

        let mut reply = [0u8; 10];
        client.read_exact(&mut reply).await.unwrap();
        assert_eq!(reply, REPLY_ADDR_TYPE_NOT_SUPPORTED);

        assert!(handshake.await.unwrap().is_err());
    }

    #[tokio::test]
    async fn test_wrong_version_rejected() {
        let (mut client, mut server) = handshake_pair().await;
        let handshake = tokio::spawn(async move { socks5_handshake(&mut server).await });

        client.write_all(&[4, 1, 0]).await.unwrap();
        assert!(handshake.await.unwrap().is_err());
    }
}
