//! Orchestrator boundary
//!
//! The relay core treats the cluster as an opaque collaborator: something
//! that can resolve a resource name into an object, enumerate and watch
//! pods, and open a multiplexed stream connection to a named pod. Only the
//! surface the core consumes is modelled here.

use crate::ports::WorkloadPorts;
use crate::tunnel::StreamConnection;
use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::SystemTime;
use tokio::sync::mpsc;

/// Lifecycle phase of a pod.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PodPhase {
    /// Scheduled but not yet running
    Pending,
    /// All containers up
    Running,
    /// Terminated successfully
    Succeeded,
    /// Terminated with failure
    Failed,
    /// State could not be obtained
    Unknown,
}

/// The slice of pod state the relay consumes.
#[derive(Clone, Debug)]
pub struct PodInfo {
    /// Pod name
    pub name: String,
    /// Pod IP, empty until assigned
    pub ip: String,
    /// Current phase
    pub phase: PodPhase,
    /// Creation timestamp, newest wins when picking a destination
    pub created_at: SystemTime,
    /// Whether deletion has been requested
    pub deleted: bool,
}

impl PodInfo {
    /// Whether the pod is running and not being torn down.
    pub fn is_running(&self) -> bool {
        self.phase == PodPhase::Running && !self.deleted
    }
}

/// Kind of a pod watch event.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EventType {
    /// Pod appeared
    Added,
    /// Pod changed
    Modified,
    /// Pod removed
    Deleted,
    /// Progress marker, carries no object
    Bookmark,
    /// Watch-side error
    Error,
}

/// One event from a pod watch.
#[derive(Clone, Debug)]
pub struct PodEvent {
    /// What happened
    pub event_type: EventType,
    /// The pod concerned, absent for bookmarks and errors
    pub pod: Option<PodInfo>,
}

/// Stream of pod watch events.
pub type PodWatch = mpsc::Receiver<PodEvent>;

/// A resource object resolved from a `KIND/NAME` reference, reduced to
/// what the relay needs: an address or a selector, plus the port table.
#[derive(Clone, Debug)]
pub enum RemoteObject {
    /// A single pod with a fixed IP
    Pod {
        /// The pod IP
        ip: String,
        /// Container ports
        ports: WorkloadPorts,
    },
    /// A service; exactly one of the address fields applies
    Service {
        /// Cluster IP, absent for headless services
        cluster_ip: Option<String>,
        /// External name for ExternalName services
        external_name: Option<String>,
        /// Pod selector, absent when the service defines none
        selector: Option<String>,
        /// Service ports
        ports: WorkloadPorts,
    },
    /// A selector-backed workload (deployment, statefulset, replicaset,
    /// daemonset, job)
    Workload {
        /// Pod selector
        selector: String,
        /// Template container ports
        ports: WorkloadPorts,
    },
}

impl RemoteObject {
    /// The object's port table.
    pub fn ports(&self) -> &WorkloadPorts {
        match self {
            RemoteObject::Pod { ports, .. } => ports,
            RemoteObject::Service { ports, .. } => ports,
            RemoteObject::Workload { ports, .. } => ports,
        }
    }
}

/// The cluster-side collaborator.
#[async_trait]
pub trait Orchestrator: Send + Sync {
    /// Resolve a `KIND/NAME` resource reference in a namespace.
    async fn get_object(&self, namespace: &str, resource: &str) -> Result<RemoteObject>;

    /// List the pods matching a selector.
    async fn list_pods(&self, namespace: &str, selector: &str) -> Result<Vec<PodInfo>>;

    /// Start a watch over the pods matching a selector.
    async fn watch_pods(&self, namespace: &str, selector: &str) -> Result<PodWatch>;

    /// Open a multiplexed stream connection to a named pod.
    async fn open_tunnel(
        &self,
        namespace: &str,
        pod: &str,
    ) -> Result<Arc<dyn StreamConnection>>;
}
