//! Watch-driven resolver
//!
//! Tracks the newest Running pod behind a selector. A background task
//! follows the pod watch; when the tracked pod stops running, is deleted
//! or disappears, the task re-lists until a replacement is found. Reads
//! never block on the watch.

use super::AddrGetter;
use crate::error::RelayError;
use crate::orchestrator::{EventType, Orchestrator};
use crate::protocol::Addr;
use anyhow::{Context, Result};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tracing::{debug, error, warn};

/// Interval between re-list attempts after the tracked pod dies.
const UPDATE_RETRY_INTERVAL: Duration = Duration::from_secs(2);
/// Re-list attempts before giving up on an update.
const UPDATE_RETRY_ATTEMPTS: u32 = 30;

#[derive(Debug, Default)]
struct Tracked {
    pod_name: String,
    addr: Option<Addr>,
}

/// Resolver that follows a pod selector across replica rollovers.
#[derive(Debug)]
pub struct DynamicAddr {
    state: Arc<RwLock<Tracked>>,
}

impl DynamicAddr {
    /// List the matching pods, pick the newest Running one and start the
    /// watch. Fails when no Running pod exists.
    pub async fn new(
        orchestrator: Arc<dyn Orchestrator>,
        namespace: &str,
        selector: &str,
    ) -> Result<Self> {
        let state = Arc::new(RwLock::new(Tracked::default()));

        update_pod_ip(&orchestrator, namespace, selector, &state)
            .await
            .context("init pod ip")?;

        let watch = orchestrator
            .watch_pods(namespace, selector)
            .await
            .context("watch pods")?;

        tokio::spawn(watch_for_updates(
            watch,
            orchestrator,
            namespace.to_owned(),
            selector.to_owned(),
            Arc::clone(&state),
        ));

        Ok(DynamicAddr { state })
    }
}

impl AddrGetter for DynamicAddr {
    fn get(&self) -> Result<Addr, RelayError> {
        let tracked = self.state.read().unwrap();
        tracked
            .addr
            .clone()
            .ok_or_else(|| RelayError::Resolution("no pod address tracked".to_owned()))
    }
}

/// Re-list the selector and adopt the newest Running pod.
async fn update_pod_ip(
    orchestrator: &Arc<dyn Orchestrator>,
    namespace: &str,
    selector: &str,
    state: &Arc<RwLock<Tracked>>,
) -> Result<()> {
    let mut pods = orchestrator
        .list_pods(namespace, selector)
        .await
        .context("list pods")?;
    pods.sort_by(|a, b| b.created_at.cmp(&a.created_at));

    for pod in pods {
        if pod.phase == crate::orchestrator::PodPhase::Running {
            let addr = Addr::from_ip(&pod.ip)
                .with_context(|| format!("pod {} has invalid ip {:?}", pod.name, pod.ip))?;
            let mut tracked = state.write().unwrap();
            tracked.pod_name = pod.name;
            tracked.addr = Some(addr);
            return Ok(());
        }
    }

    anyhow::bail!("no running pods found")
}

async fn watch_for_updates(
    mut watch: crate::orchestrator::PodWatch,
    orchestrator: Arc<dyn Orchestrator>,
    namespace: String,
    selector: String,
    state: Arc<RwLock<Tracked>>,
) {
    while let Some(event) = watch.recv().await {
        debug!(event = ?event.event_type, "receive event");

        if matches!(event.event_type, EventType::Bookmark | EventType::Error) {
            continue;
        }

        let Some(pod) = event.pod else {
            continue;
        };
        let tracked_name = state.read().unwrap().pod_name.clone();
        if pod.name != tracked_name {
            debug!(pod = %pod.name, current = %tracked_name, "ignore event from unrelated pod");
            continue;
        }

        if event.event_type == EventType::Modified && pod.is_running() {
            debug!(pod = %pod.name, "pod is still running");
            continue;
        }

        debug!(current = %tracked_name, "try to update remote address");
        let mut updated = false;
        for _ in 0..UPDATE_RETRY_ATTEMPTS {
            match update_pod_ip(&orchestrator, &namespace, &selector, &state).await {
                Ok(()) => {
                    updated = true;
                    break;
                }
                Err(err) => {
                    warn!(error = %err, "fail to update remote address, will retry");
                    tokio::time::sleep(UPDATE_RETRY_INTERVAL).await;
                }
            }
        }
        if updated {
            let current = state.read().unwrap().pod_name.clone();
            debug!(current = %current, "successfully updated remote address");
        } else {
            error!("fail to update remote address within timeout");
        }
    }
}
