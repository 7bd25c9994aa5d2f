//! Domain registry
//!
//! The global table of domain descriptors behind a reader/writer lock.
//! Insert and remove take the write lock; lookups and broadcast
//! iteration take only the read lock and may proceed concurrently with
//! each other. Because the map is only ever mutated under the write
//! lock, a reader can never observe a partially-unlinked descriptor.
//!
//! Removal is only legal for a fully quiesced descriptor: not on any
//! run-queue, not holding a CPU, state dying. A violation is a
//! programming error and is reported, not silently honored.

use alloc::collections::BTreeMap;
use alloc::sync::Arc;
use alloc::vec::Vec;

use plinth_primitives::RwSpinLock;

use crate::domain::DomainDescriptor;
use crate::types::{DomainId, DomainState};

/// Why a remove call was refused.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RemoveError {
    /// No descriptor with that identifier
    NotFound,
    /// The descriptor is still on a run-queue
    StillQueued,
    /// A CPU is still executing the descriptor
    StillRunning,
    /// The descriptor is not marked dying
    NotDying,
}

/// The global domain registry.
pub struct Registry {
    domains: RwSpinLock<BTreeMap<DomainId, Arc<DomainDescriptor>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self {
            domains: RwSpinLock::new(BTreeMap::new()),
        }
    }

    /// Link a descriptor. Returns false if the identifier is already
    /// registered (the descriptor is not inserted).
    pub fn insert(&self, d: Arc<DomainDescriptor>) -> bool {
        let mut domains = self.domains.write();
        if domains.contains_key(&d.id) {
            return false;
        }
        domains.insert(d.id, d);
        true
    }

    /// Unlink a quiesced descriptor.
    pub fn remove(&self, id: DomainId) -> Result<Arc<DomainDescriptor>, RemoveError> {
        let mut domains = self.domains.write();
        let d = domains.get(&id).ok_or(RemoveError::NotFound)?;
        if d.is_queued() {
            return Err(RemoveError::StillQueued);
        }
        if d.has_cpu() {
            return Err(RemoveError::StillRunning);
        }
        if d.state() != DomainState::Dying {
            return Err(RemoveError::NotDying);
        }
        Ok(domains.remove(&id).expect("checked above"))
    }

    /// Look up a descriptor by identifier.
    pub fn find(&self, id: DomainId) -> Option<Arc<DomainDescriptor>> {
        self.domains.read().get(&id).cloned()
    }

    /// Visit every registered descriptor under the read lock, in
    /// identifier order. Used for broadcast signaling.
    pub fn for_each(&self, mut f: impl FnMut(&Arc<DomainDescriptor>)) {
        for d in self.domains.read().values() {
            f(d);
        }
    }

    /// Snapshot of (identifier, state) pairs for the `list` command.
    pub fn list(&self) -> Vec<(DomainId, DomainState)> {
        self.domains
            .read()
            .values()
            .map(|d| (d.id, d.state()))
            .collect()
    }

    /// Registered domain count.
    pub fn len(&self) -> usize {
        self.domains.read().len()
    }

    /// Whether no domain is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(id: u32) -> Arc<DomainDescriptor> {
        DomainDescriptor::new(DomainId(id), 2)
    }

    #[test]
    fn insert_find_roundtrip() {
        let reg = Registry::new();
        let d = descriptor(1);
        assert!(reg.insert(d.clone()));
        let found = reg.find(DomainId(1)).unwrap();
        assert!(Arc::ptr_eq(&found, &d));
        assert!(reg.find(DomainId(2)).is_none());
    }

    #[test]
    fn duplicate_insert_refused() {
        let reg = Registry::new();
        assert!(reg.insert(descriptor(1)));
        assert!(!reg.insert(descriptor(1)));
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn remove_requires_quiesced_descriptor() {
        let reg = Registry::new();
        let d = descriptor(1);
        reg.insert(d.clone());

        // Not dying yet.
        assert_eq!(reg.remove(DomainId(1)), Err(RemoveError::NotDying));

        d.set_state(DomainState::Dying);
        d.set_has_cpu(true);
        assert_eq!(reg.remove(DomainId(1)), Err(RemoveError::StillRunning));

        d.set_has_cpu(false);
        d.set_queued(true);
        assert_eq!(reg.remove(DomainId(1)), Err(RemoveError::StillQueued));

        d.set_queued(false);
        assert!(reg.remove(DomainId(1)).is_ok());
        assert!(reg.find(DomainId(1)).is_none());
    }

    #[test]
    fn remove_unknown_id() {
        let reg = Registry::new();
        assert_eq!(reg.remove(DomainId(9)), Err(RemoveError::NotFound));
    }

    #[test]
    fn broadcast_visits_every_domain() {
        let reg = Registry::new();
        for i in 0..3 {
            reg.insert(descriptor(i));
        }
        let mut seen = Vec::new();
        reg.for_each(|d| seen.push(d.id.0));
        assert_eq!(seen, alloc::vec![0, 1, 2]);
    }

    #[test]
    fn list_reports_states() {
        let reg = Registry::new();
        let d = descriptor(4);
        d.set_state(DomainState::Runnable);
        reg.insert(d);
        let list = reg.list();
        assert_eq!(list, alloc::vec![(DomainId(4), DomainState::Runnable)]);
    }
}
