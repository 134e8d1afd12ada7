//! In-memory view of the occupied slots
//!
//! Every change made through the public methods is also recorded as a
//! [`Mutation`], so a store can persist exactly what an update did.

use super::slot::{validate_tag, SlotIndex, SlotRecord};
use crate::config::PoolConfig;
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

/// A single persisted state change
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Mutation {
    Reset {
        pool: PoolConfig,
    },
    Claim {
        index: SlotIndex,
        at: DateTime<Utc>,
        tag: Option<String>,
    },
    Release {
        index: SlotIndex,
    },
    Tag {
        index: SlotIndex,
        at: DateTime<Utc>,
        tag: String,
    },
}

impl Mutation {
    pub fn is_reset(&self) -> bool {
        matches!(self, Mutation::Reset { .. })
    }
}

/// Occupied slots keyed by index, plus the pool geometry recorded by the
/// last reset
#[derive(Debug, Clone, Default)]
pub struct Occupancy {
    pool: Option<PoolConfig>,
    slots: BTreeMap<SlotIndex, SlotRecord>,
    journal: Vec<Mutation>,
}

impl Occupancy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Geometry the store was last reset for, if it ever was
    pub fn pool(&self) -> Option<PoolConfig> {
        self.pool
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn contains(&self, index: SlotIndex) -> bool {
        self.slots.contains_key(&index)
    }

    pub fn get(&self, index: SlotIndex) -> Option<&SlotRecord> {
        self.slots.get(&index)
    }

    /// Occupied records, ascending by index
    pub fn records(&self) -> impl Iterator<Item = &SlotRecord> + '_ {
        self.slots.values()
    }

    /// Occupied indices, ascending
    pub fn indices(&self) -> impl Iterator<Item = SlotIndex> + '_ {
        self.slots.keys().copied()
    }

    /// Free every slot and remember the geometry
    pub fn reset(&mut self, pool: PoolConfig) {
        self.record(Mutation::Reset { pool });
    }

    /// Mark a free slot occupied
    pub fn claim(&mut self, index: SlotIndex, tag: Option<String>) -> Result<()> {
        if self.contains(index) {
            return Err(Error::AlreadyOccupied(index.get()));
        }
        if let Some(tag) = &tag {
            validate_tag(tag)?;
        }
        self.record(Mutation::Claim {
            index,
            at: Utc::now(),
            tag,
        });
        Ok(())
    }

    /// Free a slot; returns false when it was not occupied
    pub fn release(&mut self, index: SlotIndex) -> bool {
        if !self.contains(index) {
            return false;
        }
        self.record(Mutation::Release { index });
        true
    }

    /// Replace the tag of an occupied slot and touch its timestamp
    pub fn set_tag(&mut self, index: SlotIndex, tag: String) -> Result<()> {
        if !self.contains(index) {
            return Err(Error::NotOccupied(index.get()));
        }
        validate_tag(&tag)?;
        self.record(Mutation::Tag {
            index,
            at: Utc::now(),
            tag,
        });
        Ok(())
    }

    fn record(&mut self, mutation: Mutation) {
        self.apply(&mutation);
        self.journal.push(mutation);
    }

    /// Apply a mutation read back from storage, without journaling it
    pub(crate) fn apply(&mut self, mutation: &Mutation) {
        match mutation {
            Mutation::Reset { pool } => {
                self.slots.clear();
                self.pool = Some(*pool);
            }
            Mutation::Claim { index, at, tag } => {
                self.slots
                    .insert(*index, SlotRecord::new(*index, *at, tag.clone()));
            }
            Mutation::Release { index } => {
                self.slots.remove(index);
            }
            Mutation::Tag { index, at, tag } => match self.slots.get_mut(index) {
                Some(record) => {
                    record.updated_at = *at;
                    record.tag = Some(tag.clone());
                }
                None => debug!(%index, "Ignoring tag mutation for a free slot"),
            },
        }
    }

    /// Drain the changes made since the last call
    pub(crate) fn take_journal(&mut self) -> Vec<Mutation> {
        std::mem::take(&mut self.journal)
    }

    /// The shortest mutation list that rebuilds this state from scratch
    pub(crate) fn compacted(&self) -> Vec<Mutation> {
        let reset = self.pool.map(|pool| Mutation::Reset { pool });
        let claims = self.slots.values().map(|record| Mutation::Claim {
            index: record.index,
            at: record.updated_at,
            tag: record.tag.clone(),
        });
        reset.into_iter().chain(claims).collect()
    }
}
