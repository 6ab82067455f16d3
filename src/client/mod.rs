//! Client-side forwarding
//!
//! Everything that runs on the near side of the tunnel: local listeners,
//! per-flow workers, the SOCKS5 front end, targets parsing and the
//! top-level drivers.

pub mod conntrack;
mod forwarder;
mod socks;
mod targets;
mod tcp;
mod udp;

pub use forwarder::PortForwarder;
pub use socks::{run_socks5_server, socks5_handshake};
pub use targets::{
    parse_targets_file, target_from_args, validate_fields, Target, DEFAULT_LISTEN_ADDR,
};
pub use tcp::handle_tcp_conn;
pub use udp::handle_udp_conn;

use crate::orchestrator::Orchestrator;
use crate::ports::Parser;
use crate::protocol::Addr;
use crate::resolver::{self, AddrGetter, StaticAddr};
use crate::tunnel::StreamConnection;
use anyhow::{bail, Context, Result};
use std::io;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info};

/// Whether a copy error only reports that the peer or our own teardown
/// closed the connection. Expected, not worth logging.
pub(crate) fn is_closed_conn_error(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::BrokenPipe
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::NotConnected
    )
}

/// Build one forwarder per (target, port pair).
///
/// Resolution strategy per resource kind: `ip/` and `host/` become static
/// resolvers without touching the orchestrator; everything else resolves
/// the object and follows it (fixed IP for pods and cluster IPs, hostname
/// for external names, watch-driven for selectors).
pub async fn build_forwarders(
    orchestrator: &Arc<dyn Orchestrator>,
    targets: &[Target],
) -> Result<Vec<PortForwarder>> {
    let mut forwarders = Vec::new();

    for target in targets {
        let (kind, name) = target
            .resource
            .split_once('/')
            .with_context(|| format!("unknown resource: {:?}", target.resource))?;

        let (getter, pairs): (Arc<dyn AddrGetter>, _) = match kind {
            "ip" => {
                let addr = Addr::from_ip(name)?;
                let pairs = Parser::new(&target.ports).parse()?;
                (Arc::new(StaticAddr::new(addr)), pairs)
            }
            "host" => {
                let pairs = Parser::new(&target.ports).parse()?;
                (Arc::new(StaticAddr::new(Addr::from_host(name))), pairs)
            }
            _ => {
                let obj = orchestrator
                    .get_object(&target.namespace, &target.resource)
                    .await
                    .with_context(|| format!("get {:?}", target.resource))?;
                let getter =
                    resolver::for_object(&obj, Arc::clone(orchestrator), &target.namespace)
                        .await?;
                let pairs = Parser::new(&target.ports).with_ports(obj.ports()).parse()?;
                (getter, pairs)
            }
        };

        for pair in pairs {
            forwarders.push(PortForwarder::new(
                Arc::clone(&getter),
                pair,
                target.listen_addr.clone(),
            ));
        }
    }

    Ok(forwarders)
}

/// Bind and run the given forwarders until the tunnel closes or an
/// interrupt arrives.
///
/// Binding is best-effort: failures are logged and skipped, and any
/// non-empty subset of successful binds is enough to proceed.
pub async fn run(
    conn: Arc<dyn StreamConnection>,
    forwarders: Vec<PortForwarder>,
) -> Result<()> {
    let mut bound = Vec::new();
    for mut forwarder in forwarders {
        match forwarder.listen().await {
            Ok(()) => bound.push(forwarder),
            Err(err) => {
                error!(
                    port = forwarder.ports().local_port,
                    error = %err,
                    "fail to listen on port"
                );
            }
        }
    }
    if bound.is_empty() {
        bail!("unable to listen on any of the requested ports");
    }

    for forwarder in bound {
        tokio::spawn(forwarder.run(Arc::clone(&conn)));
    }

    wait_for_shutdown(conn).await
}

/// Run a SOCKS5 proxy on the given listener until the tunnel closes or an
/// interrupt arrives.
pub async fn run_socks_proxy(
    conn: Arc<dyn StreamConnection>,
    listener: TcpListener,
) -> Result<()> {
    tokio::spawn(run_socks5_server(listener, Arc::clone(&conn)));
    wait_for_shutdown(conn).await
}

async fn wait_for_shutdown(conn: Arc<dyn StreamConnection>) -> Result<()> {
    let mut closed = conn.closed();
    tokio::select! {
        _ = closed.wait_for(|v| *v) => {
            info!("lost connection to relay server");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("interrupted, shutting down");
            conn.close();
        }
    }
    Ok(())
}
