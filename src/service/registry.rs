//! Process-wide map of computer ID to live connection.
//!
//! A reconnecting computer replaces its previous handle in one atomic map
//! update, and the previous handle is disconnected inside that update. A
//! session that ends only removes its own entry, so a late teardown of an
//! evicted handle never removes the connection that replaced it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::{debug, info};

use super::handle::HostHandle;
use crate::store::ComputerId;

#[derive(Debug, Default)]
pub struct HostRegistry {
    hosts: DashMap<ComputerId, Arc<HostHandle>>,
    closed: AtomicBool,
}

impl HostRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install `handle` as the live connection for its computer.
    ///
    /// Returns the handle it replaced, already disconnected. On a closed
    /// registry `handle` is disconnected as soon as it is installed.
    pub fn register(&self, handle: Arc<HostHandle>) -> Option<Arc<HostHandle>> {
        let computer_id = handle.computer_id();
        let previous = match self.hosts.entry(computer_id) {
            Entry::Occupied(mut entry) => {
                let previous = entry.insert(Arc::clone(&handle));
                previous.disconnect();
                info!(computer_id, "Replaced existing connection");
                Some(previous)
            }
            Entry::Vacant(entry) => {
                entry.insert(Arc::clone(&handle));
                debug!(computer_id, "Registered connection");
                None
            }
        };

        // Checked after the insert: either this sees the flag or `close`
        // sees the entry.
        if self.is_closed() {
            debug!(computer_id, "Registry closed, disconnecting late registration");
            handle.disconnect();
        }
        previous
    }

    /// Remove the entry for `computer_id` only if it is still `handle`.
    pub fn remove_if_current(&self, computer_id: ComputerId, handle: &Arc<HostHandle>) -> bool {
        self.hosts
            .remove_if(&computer_id, |_, current| Arc::ptr_eq(current, handle))
            .is_some()
    }

    /// The live connection for `computer_id`, if the computer is online.
    pub fn lookup_online_computer(&self, computer_id: ComputerId) -> Option<Arc<HostHandle>> {
        self.hosts
            .get(&computer_id)
            .map(|entry| Arc::clone(entry.value()))
            .filter(|handle| !handle.is_disconnected())
    }

    pub fn len(&self) -> usize {
        self.hosts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty()
    }

    /// IDs of every computer with a registered connection.
    pub fn online_computers(&self) -> Vec<ComputerId> {
        let mut ids: Vec<_> = self.hosts.iter().map(|entry| *entry.key()).collect();
        ids.sort_unstable();
        ids
    }

    /// Stop accepting hosts for good and disconnect every registered one.
    pub fn close(&self) -> usize {
        self.closed.store(true, Ordering::SeqCst);
        self.disconnect_all()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Disconnect every registered host. Sessions remove their own entries
    /// as they finish. Returns how many handles were signalled.
    pub fn disconnect_all(&self) -> usize {
        let handles: Vec<_> = self
            .hosts
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        for handle in &handles {
            handle.disconnect();
        }
        handles.len()
    }
}
