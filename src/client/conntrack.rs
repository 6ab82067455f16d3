//! UDP connection tracking
//!
//! Maps each local source address to the channel feeding its per-flow
//! worker. Entries are created on the first datagram from a new source and
//! removed when the worker signals completion.

use bytes::Bytes;
use std::collections::HashMap;
use std::sync::RwLock;
use tokio::sync::mpsc;

/// Sender side of a per-flow datagram channel.
pub type DatagramSender = mpsc::Sender<Bytes>;

/// Source-keyed table of active UDP flows.
///
/// Reads happen on every datagram; writes only when flows start or end.
/// The lock is never held across I/O.
#[derive(Debug, Default)]
pub struct ConnTrack {
    items: RwLock<HashMap<String, DatagramSender>>,
}

impl ConnTrack {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// The sender for a source key, if a flow is active.
    pub fn get(&self, key: &str) -> Option<DatagramSender> {
        self.items.read().unwrap().get(key).cloned()
    }

    /// Install the sender for a new flow.
    pub fn set(&self, key: String, sender: DatagramSender) {
        self.items.write().unwrap().insert(key, sender);
    }

    /// Remove a finished flow.
    pub fn delete(&self, key: &str) {
        self.items.write().unwrap().remove(key);
    }

    /// Number of active flows.
    pub fn len(&self) -> usize {
        self.items.read().unwrap().len()
    }

    /// Whether no flow is active.
    pub fn is_empty(&self) -> bool {
        self.items.read().unwrap().is_empty()
    }
}
