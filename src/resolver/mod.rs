//! Remote-address resolution
//!
//! A forwarder asks its resolver for the current destination address once
//! per new flow. Static resolvers wrap a fixed address; dynamic resolvers
//! follow a pod selector so new flows land on a live replica after a
//! rollout while existing flows keep the address they opened with.

mod dynamic;
mod static_addr;

pub use dynamic::DynamicAddr;
pub use static_addr::StaticAddr;

use crate::error::RelayError;
use crate::orchestrator::{Orchestrator, RemoteObject};
use crate::protocol::Addr;
use anyhow::Result;
use std::sync::Arc;

/// The capability yielding the current destination address.
///
/// `get` is non-blocking and, for dynamic resolvers, returns the
/// last-known address.
pub trait AddrGetter: Send + Sync + std::fmt::Debug {
    /// Current destination address for this target.
    fn get(&self) -> Result<Addr, RelayError>;
}

/// Build the resolver appropriate for a resolved resource object.
pub async fn for_object(
    obj: &RemoteObject,
    orchestrator: Arc<dyn Orchestrator>,
    namespace: &str,
) -> Result<Arc<dyn AddrGetter>> {
    match obj {
        RemoteObject::Pod { ip, .. } => {
            let addr = Addr::from_ip(ip)?;
            Ok(Arc::new(StaticAddr::new(addr)))
        }

        RemoteObject::Service {
            cluster_ip,
            external_name,
            selector,
            ..
        } => {
            if let Some(name) = external_name {
                return Ok(Arc::new(StaticAddr::new(Addr::from_host(name))));
            }
            if let Some(ip) = cluster_ip {
                let addr = Addr::from_ip(ip)?;
                return Ok(Arc::new(StaticAddr::new(addr)));
            }
            match selector.as_deref() {
                Some(selector) if !selector.is_empty() => {
                    let getter =
                        DynamicAddr::new(orchestrator, namespace, selector).await?;
                    Ok(Arc::new(getter))
                }
                _ => anyhow::bail!("service selector is empty"),
            }
        }

        RemoteObject::Workload { selector, .. } => {
            let getter = DynamicAddr::new(orchestrator, namespace, selector).await?;
            Ok(Arc::new(getter))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::{PodEvent, PodInfo, PodWatch};
    use crate::ports::WorkloadPorts;
    use crate::tunnel::StreamConnection;
    use async_trait::async_trait;
    use tokio::sync::mpsc;

    struct NoPods;

    #[async_trait]
    impl Orchestrator for NoPods {
        async fn get_object(&self, _ns: &str, _resource: &str) -> Result<RemoteObject> {
            anyhow::bail!("not found")
        }

        async fn list_pods(&self, _ns: &str, _selector: &str) -> Result<Vec<PodInfo>> {
            Ok(vec![])
        }

        async fn watch_pods(&self, _ns: &str, _selector: &str) -> Result<PodWatch> {
            let (_tx, rx) = mpsc::channel::<PodEvent>(1);
            Ok(rx)
        }

        async fn open_tunnel(
            &self,
            _ns: &str,
            _pod: &str,
        ) -> Result<Arc<dyn StreamConnection>> {
            anyhow::bail!("no tunnel")
        }
    }

    #[tokio::test]
    async fn test_pod_object_yields_static_resolver() {
        let obj = RemoteObject::Pod {
            ip: "10.1.2.3".into(),
            ports: WorkloadPorts::default(),
        };
        let getter = for_object(&obj, Arc::new(NoPods), "default").await.unwrap();
        assert_eq!(getter.get().unwrap(), Addr::from_ip("10.1.2.3").unwrap());
    }

    #[tokio::test]
    async fn test_external_name_service_yields_host() {
        let obj = RemoteObject::Service {
            cluster_ip: None,
            external_name: Some("db.example.com".into()),
            selector: None,
            ports: WorkloadPorts::default(),
        };
        let getter = for_object(&obj, Arc::new(NoPods), "default").await.unwrap();
        assert_eq!(getter.get().unwrap(), Addr::from_host("db.example.com"));
    }

    #[tokio::test]
    async fn test_cluster_ip_service_yields_static_ip() {
        let obj = RemoteObject::Service {
            cluster_ip: Some("10.96.0.10".into()),
            external_name: None,
            selector: Some("app=dns".into()),
            ports: WorkloadPorts::default(),
        };
        let getter = for_object(&obj, Arc::new(NoPods), "default").await.unwrap();
        assert_eq!(getter.get().unwrap(), Addr::from_ip("10.96.0.10").unwrap());
    }

    #[tokio::test]
    async fn test_headless_service_without_selector_is_rejected() {
        let obj = RemoteObject::Service {
            cluster_ip: None,
            external_name: None,
            selector: None,
            ports: WorkloadPorts::default(),
        };
        let err = for_object(&obj, Arc::new(NoPods), "default")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("selector is empty"));
    }

    #[tokio::test]
    async fn test_workload_without_running_pods_fails_init() {
        let obj = RemoteObject::Workload {
            selector: "app=web".into(),
            ports: WorkloadPorts::default(),
        };
        let err = for_object(&obj, Arc::new(NoPods), "default")
            .await
            .unwrap_err();
        assert!(format!("{err:#}").contains("no running pods"));
    }
}
