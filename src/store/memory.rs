//! In-memory allocation store
//!
//! Keeps the occupancy behind a mutex. Used by tests and by callers that
//! embed the allocator in a single long-lived process.

use super::occupancy::Occupancy;
use super::AllocationStore;
use crate::error::Result;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::debug;

/// Process-local store; clones share the same state
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<Occupancy>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of occupied slots
    pub fn len(&self) -> usize {
        self.state.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().is_empty()
    }
}

impl AllocationStore for MemoryStore {
    fn snapshot(&self) -> Result<Occupancy> {
        Ok(self.state.lock().clone())
    }

    fn update(&self, op: &mut dyn FnMut(&mut Occupancy) -> Result<()>) -> Result<()> {
        let mut state = self.state.lock();

        // Work on a copy so a failing op leaves nothing behind
        let mut draft = state.clone();
        op(&mut draft)?;

        let journal = draft.take_journal();
        debug!(mutations = journal.len(), "Applied in-memory update");
        *state = draft;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PoolConfig;
    use crate::error::Error;
    use crate::store::SlotIndex;

    #[test]
    fn test_memory_store_basic_ops() -> Result<()> {
        let store = MemoryStore::new();

        store.claim(SlotIndex::new(0), None)?;
        store.claim(SlotIndex::new(1), Some("vm-1"))?;
        assert_eq!(store.count_occupied()?, 2);

        assert!(store.release(SlotIndex::new(0))?);
        assert!(!store.release(SlotIndex::new(0))?);

        let records = store.list_occupied()?;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].index, SlotIndex::new(1));
        assert_eq!(records[0].tag.as_deref(), Some("vm-1"));
        Ok(())
    }

    #[test]
    fn test_failed_update_rolls_back() -> Result<()> {
        let store = MemoryStore::new();
        store.claim(SlotIndex::new(3), None)?;

        let result = store.update(&mut |occ| {
            occ.release(SlotIndex::new(3));
            occ.claim(SlotIndex::new(4), None)?;
            Err(Error::PoolExhausted)
        });

        assert!(matches!(result, Err(Error::PoolExhausted)));
        let indices: Vec<_> = store.snapshot()?.indices().collect();
        assert_eq!(indices, vec![SlotIndex::new(3)]);
        Ok(())
    }

    #[test]
    fn test_clones_share_state() -> Result<()> {
        let store = MemoryStore::new();
        let other = store.clone();

        store.claim(SlotIndex::new(9), None)?;
        assert!(matches!(
            other.claim(SlotIndex::new(9), None),
            Err(Error::AlreadyOccupied(9))
        ));

        other.reset(PoolConfig::new(0, 99, 10)?)?;
        assert!(store.is_empty());
        Ok(())
    }
}
