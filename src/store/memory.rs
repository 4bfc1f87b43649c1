//! In-memory [`ComputerStore`].
//!
//! Backs tests and single-process deployments. All state sits behind one
//! `RwLock`, so `persist_computer` is atomic: a failed call leaves nothing
//! behind.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::debug;

use super::{
    Computer, ComputerChange, ComputerId, ComputerStore, ComputerUpdate, GroupId, NewComputer,
};
use crate::error::{constants, ProtocolError, Result};

#[derive(Debug, Default)]
struct Inner {
    computers: HashMap<ComputerId, Computer>,
    by_public_key: HashMap<String, ComputerId>,
    memberships: HashMap<ComputerId, BTreeSet<GroupId>>,
    disconnect_stamps: HashMap<ComputerId, u32>,
    next_id: ComputerId,
}

impl Inner {
    fn insert(&mut self, new: &NewComputer) -> Result<Computer> {
        if self.by_public_key.contains_key(&new.public_key) {
            return Err(ProtocolError::Storage(
                constants::ERR_DUPLICATE_PUBLIC_KEY.into(),
            ));
        }
        self.next_id += 1;
        let computer = Computer {
            id: self.next_id,
            public_key: new.public_key.clone(),
            name: new.name.clone(),
            app_version: new.app_version.clone(),
            os_version: new.os_version.clone(),
            last_disconnect_ms: new.last_disconnect_ms,
        };
        self.by_public_key
            .insert(computer.public_key.clone(), computer.id);
        self.computers.insert(computer.id, computer.clone());
        Ok(computer)
    }

    fn update(&mut self, update: &ComputerUpdate) -> Result<Computer> {
        let computer = self
            .computers
            .get_mut(&update.id)
            .ok_or_else(|| ProtocolError::Storage(constants::ERR_UNKNOWN_COMPUTER.into()))?;
        computer.app_version = update.app_version.clone();
        computer.os_version = update.os_version.clone();
        Ok(computer.clone())
    }

    fn add_membership(&mut self, id: ComputerId, group_id: GroupId) -> Result<()> {
        if !self.computers.contains_key(&id) {
            return Err(ProtocolError::Storage(constants::ERR_UNKNOWN_COMPUTER.into()));
        }
        self.memberships.entry(id).or_default().insert(group_id);
        Ok(())
    }
}

/// Thread-safe in-memory computer store.
#[derive(Debug, Default)]
pub struct MemoryComputerStore {
    inner: RwLock<Inner>,
    fail_writes: AtomicBool,
}

impl MemoryComputerStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent write fail with a storage error.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Inner>> {
        self.inner
            .read()
            .map_err(|_| ProtocolError::Storage(constants::ERR_STORE_LOCK_POISONED.into()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Inner>> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(ProtocolError::Storage("writes disabled".into()));
        }
        self.inner
            .write()
            .map_err(|_| ProtocolError::Storage(constants::ERR_STORE_LOCK_POISONED.into()))
    }

    pub fn get(&self, id: ComputerId) -> Option<Computer> {
        self.read().ok()?.computers.get(&id).cloned()
    }

    pub fn len(&self) -> usize {
        self.read().map(|inner| inner.computers.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn groups_of(&self, id: ComputerId) -> Vec<GroupId> {
        self.read()
            .ok()
            .and_then(|inner| inner.memberships.get(&id).cloned())
            .map(|groups| groups.into_iter().collect())
            .unwrap_or_default()
    }

    /// How many times a disconnect was stamped for `id`.
    pub fn disconnect_count(&self, id: ComputerId) -> u32 {
        self.read()
            .ok()
            .and_then(|inner| inner.disconnect_stamps.get(&id).copied())
            .unwrap_or(0)
    }
}

impl ComputerStore for MemoryComputerStore {
    fn find_by_public_key(&self, public_key: &str) -> Result<Option<Computer>> {
        let inner = self.read()?;
        Ok(inner
            .by_public_key
            .get(public_key)
            .and_then(|id| inner.computers.get(id))
            .cloned())
    }

    fn insert_computer(&self, computer: &NewComputer) -> Result<Computer> {
        self.write()?.insert(computer)
    }

    fn update_computer(&self, update: &ComputerUpdate) -> Result<Computer> {
        self.write()?.update(update)
    }

    fn update_last_disconnect(&self, id: ComputerId, at_ms: u64) -> Result<()> {
        let mut inner = self.write()?;
        let computer = inner
            .computers
            .get_mut(&id)
            .ok_or_else(|| ProtocolError::Storage(constants::ERR_UNKNOWN_COMPUTER.into()))?;
        computer.last_disconnect_ms = at_ms;
        *inner.disconnect_stamps.entry(id).or_insert(0) += 1;
        debug!(computer_id = id, at_ms, "Stamped last disconnect");
        Ok(())
    }

    fn add_group_membership(&self, id: ComputerId, group_id: GroupId) -> Result<()> {
        self.write()?.add_membership(id, group_id)
    }

    fn persist_computer(&self, change: &ComputerChange, group_id: GroupId) -> Result<Computer> {
        let mut inner = self.write()?;
        // Validate before touching anything so a failure leaves no trace.
        if let ComputerChange::Update(update) = change {
            if !inner.computers.contains_key(&update.id) {
                return Err(ProtocolError::Storage(constants::ERR_UNKNOWN_COMPUTER.into()));
            }
        }
        let computer = match change {
            ComputerChange::Create(new) => inner.insert(new)?,
            ComputerChange::Update(update) => inner.update(update)?,
        };
        inner.add_membership(computer.id, group_id)?;
        Ok(computer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_computer(key: &str, name: &str) -> NewComputer {
        NewComputer {
            public_key: key.into(),
            name: name.into(),
            app_version: "1.0".into(),
            os_version: "Linux".into(),
            last_disconnect_ms: 10,
        }
    }

    #[test]
    fn test_insert_assigns_sequential_ids() {
        let store = MemoryComputerStore::new();
        let a = store.insert_computer(&new_computer("ka", "A")).unwrap();
        let b = store.insert_computer(&new_computer("kb", "B")).unwrap();
        assert_eq!(a.id + 1, b.id);
        assert_eq!(store.find_by_public_key("kb").unwrap(), Some(b));
        assert_eq!(store.find_by_public_key("kc").unwrap(), None);
    }

    #[test]
    fn test_duplicate_public_key_rejected() {
        let store = MemoryComputerStore::new();
        store.insert_computer(&new_computer("ka", "A")).unwrap();
        assert!(store.insert_computer(&new_computer("ka", "B")).is_err());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_update_keeps_name() {
        let store = MemoryComputerStore::new();
        let a = store.insert_computer(&new_computer("ka", "A")).unwrap();
        let updated = store
            .update_computer(&ComputerUpdate {
                id: a.id,
                app_version: "2.0".into(),
                os_version: "Windows".into(),
            })
            .unwrap();
        assert_eq!(updated.name, "A");
        assert_eq!(updated.app_version, "2.0");
    }

    #[test]
    fn test_persist_is_all_or_nothing() {
        let store = MemoryComputerStore::new();
        let missing = ComputerChange::Update(ComputerUpdate {
            id: 42,
            app_version: "1".into(),
            os_version: "x".into(),
        });
        assert!(store.persist_computer(&missing, 2).is_err());
        assert!(store.groups_of(42).is_empty());

        store.set_fail_writes(true);
        let create = ComputerChange::Create(new_computer("ka", "A"));
        assert!(store.persist_computer(&create, 2).is_err());
        assert!(store.is_empty());

        store.set_fail_writes(false);
        let created = store.persist_computer(&create, 2).unwrap();
        assert_eq!(store.groups_of(created.id), vec![2]);
    }

    #[test]
    fn test_failed_create_adds_no_membership() {
        let store = MemoryComputerStore::new();
        let existing = store.insert_computer(&new_computer("ka", "A")).unwrap();

        let duplicate = ComputerChange::Create(new_computer("ka", "B"));
        assert!(store.persist_computer(&duplicate, 7).is_err());
        assert_eq!(store.len(), 1);
        assert!(store.groups_of(existing.id).is_empty());
        assert!(store.groups_of(existing.id + 1).is_empty());
    }

    #[test]
    fn test_disconnect_stamps_are_counted() {
        let store = MemoryComputerStore::new();
        let a = store.insert_computer(&new_computer("ka", "A")).unwrap();
        store.update_last_disconnect(a.id, 99).unwrap();
        store.update_last_disconnect(a.id, 100).unwrap();
        assert_eq!(store.disconnect_count(a.id), 2);
        assert_eq!(store.get(a.id).unwrap().last_disconnect_ms, 100);
    }
}
