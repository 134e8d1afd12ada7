//! Allocation store
//!
//! # Architecture
//!
//! The store keeps the sparse set of occupied slots:
//!
//! ```text
//! Occupancy
//!   ├─→ pool: Some(100..=4099 step 50)   (recorded by the last reset)
//!   └─→ slots: {0 → record, 1 → record, 5 → record}
//! ```
//!
//! Implementations only provide two primitives:
//! - `snapshot`: a consistent read of the current state
//! - `update`: run a closure against the current state while holding the
//!   store exclusively, then persist the mutations it made. An error from
//!   the closure persists nothing.
//!
//! Everything else (claim, release, tagging, listing) is built on top of
//! those, so the "read free slots, then claim one" sequence used by the
//! allocator is a single critical section.
//!
//! ## Implementations
//! - `MemoryStore`: process-local, for tests and embedding
//! - `LogStore`: append-only batch log guarded by a file lock, shared
//!   between processes

pub mod lock;
pub mod log;
pub mod memory;
pub mod occupancy;
pub mod slot;

pub use lock::{LockMode, StoreLock};
pub use log::{LogBatch, LogStore};
pub use memory::MemoryStore;
pub use occupancy::{Mutation, Occupancy};
pub use slot::{validate_tag, SlotIndex, SlotRecord};

use crate::config::PoolConfig;
use crate::error::Result;

/// Persistence interface of the allocator
pub trait AllocationStore: Send + Sync {
    /// Read the current state
    fn snapshot(&self) -> Result<Occupancy>;

    /// Atomically read, modify and persist the state
    fn update(&self, op: &mut dyn FnMut(&mut Occupancy) -> Result<()>) -> Result<()>;

    /// Free every slot and record the pool geometry
    fn reset(&self, pool: PoolConfig) -> Result<()> {
        self.update(&mut |occ| {
            occ.reset(pool);
            Ok(())
        })
    }

    /// Claim a free slot
    fn claim(&self, index: SlotIndex, tag: Option<&str>) -> Result<()> {
        self.update(&mut |occ| occ.claim(index, tag.map(str::to_owned)))
    }

    /// Free a slot; `Ok(false)` if it was already free
    fn release(&self, index: SlotIndex) -> Result<bool> {
        let mut released = false;
        self.update(&mut |occ| {
            released = occ.release(index);
            Ok(())
        })?;
        Ok(released)
    }

    /// Tag an occupied slot
    fn set_tag(&self, index: SlotIndex, tag: &str) -> Result<()> {
        self.update(&mut |occ| occ.set_tag(index, tag.to_owned()))
    }

    fn count_occupied(&self) -> Result<u64> {
        Ok(self.snapshot()?.len() as u64)
    }

    /// Occupied records, ascending by index
    fn list_occupied(&self) -> Result<Vec<SlotRecord>> {
        Ok(self.snapshot()?.records().cloned().collect())
    }
}
