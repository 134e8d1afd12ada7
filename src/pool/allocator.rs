//! Interval allocator
//!
//! Always hands out the lowest free slot. The free-slot search and the
//! claim run inside one store update, so concurrent allocators serialize
//! on the store and can never receive the same interval.

use super::initializer::PoolInitializer;
use super::interval::Interval;
use super::partition::RangePartitioner;
use crate::config::PoolConfig;
use crate::error::{Error, Result};
use crate::store::{AllocationStore, Occupancy, SlotIndex};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Base delay between attempts after a lost lock race
const RETRY_BACKOFF: Duration = Duration::from_millis(20);

/// One line of `--list` / `--show` output
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SlotStatus {
    pub low: i64,
    pub high: i64,
    pub reserved: bool,
    pub updated: Option<DateTime<Utc>>,
    pub instance: Option<String>,
}

impl SlotStatus {
    pub fn interval(&self) -> Interval {
        Interval::new(self.low, self.high)
    }
}

impl fmt::Display for SlotStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{} reserved: {} updated: ",
            self.low, self.high, self.reserved
        )?;
        match &self.updated {
            Some(at) => write!(f, "{}", at.format("%Y-%m-%d %H:%M:%S"))?,
            None => f.write_str("None")?,
        }
        write!(f, " instance: {}", self.instance.as_deref().unwrap_or("None"))
    }
}

/// First hole in the run of occupied indices starting at 0, or one past
/// the last index if there is none. `occupied` must be ascending.
pub fn first_gap(occupied: impl IntoIterator<Item = SlotIndex>) -> SlotIndex {
    let mut candidate = 0u64;
    for index in occupied {
        if index.get() != candidate {
            break;
        }
        candidate += 1;
    }
    SlotIndex::new(candidate)
}

/// Run `op`, retrying up to `retries` more times while it loses lock races
pub fn retry_on_conflict<T>(retries: u32, mut op: impl FnMut() -> Result<T>) -> Result<T> {
    let mut attempt = 0;
    loop {
        match op() {
            Err(e) if e.is_retryable() && attempt < retries => {
                attempt += 1;
                warn!(attempt, retries, "Retrying after concurrency conflict: {}", e);
                std::thread::sleep(RETRY_BACKOFF * attempt);
            }
            result => return result,
        }
    }
}

/// Allocates slots of one pool from one store
pub struct Allocator {
    partitioner: RangePartitioner,
    store: Box<dyn AllocationStore>,
}

impl fmt::Debug for Allocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Allocator")
            .field("partitioner", &self.partitioner)
            .finish()
    }
}

impl Allocator {
    pub fn new(pool: PoolConfig, store: Box<dyn AllocationStore>) -> Result<Self> {
        Ok(Self {
            partitioner: RangePartitioner::new(pool)?,
            store,
        })
    }

    pub fn partitioner(&self) -> &RangePartitioner {
        &self.partitioner
    }

    pub fn pool(&self) -> PoolConfig {
        self.partitioner.pool()
    }

    pub fn store(&self) -> &dyn AllocationStore {
        self.store.as_ref()
    }

    /// The store must not hold indices computed for another geometry
    fn check_geometry(&self, occ: &Occupancy) -> Result<()> {
        match occ.pool() {
            Some(recorded) if recorded != self.pool() => Err(Error::PoolMismatch(format!(
                "store was reset for {}, configured pool is {}; reset the pool first",
                recorded,
                self.pool()
            ))),
            _ => Ok(()),
        }
    }

    fn snapshot(&self) -> Result<Occupancy> {
        let occ = self.store.snapshot()?;
        self.check_geometry(&occ)?;
        Ok(occ)
    }

    /// Claim the lowest free slot
    pub fn allocate(&self, tag: Option<&str>) -> Result<Interval> {
        let mut claimed = None;
        self.store.update(&mut |occ| {
            self.check_geometry(occ)?;

            let index = first_gap(occ.indices());
            let interval = self
                .partitioner
                .interval_of(index)
                .filter(|iv| self.partitioner.is_within_bounds(iv))
                .ok_or(Error::PoolExhausted)?;

            occ.claim(index, tag.map(str::to_owned))?;
            claimed = Some((index, interval));
            Ok(())
        })?;

        let (index, interval) = claimed
            .ok_or_else(|| Error::Storage("update committed without a claim".to_string()))?;
        info!(%index, %interval, "Allocated interval");
        Ok(interval)
    }

    /// Release the slot written as `low:high`; false if it was already free
    pub fn release(&self, text: &str) -> Result<bool> {
        let index = self.partitioner.resolve(text)?;
        let mut released = false;
        self.store.update(&mut |occ| {
            self.check_geometry(occ)?;
            released = occ.release(index);
            Ok(())
        })?;

        if released {
            info!(%index, interval = text, "Released interval");
        } else {
            debug!(%index, interval = text, "Interval was already free");
        }
        Ok(released)
    }

    /// Tag the occupied slot written as `low:high`
    pub fn set_tag(&self, text: &str, tag: &str) -> Result<Interval> {
        let index = self.partitioner.resolve(text)?;
        self.store.update(&mut |occ| {
            self.check_geometry(occ)?;
            occ.set_tag(index, tag.to_owned())
        })?;

        info!(%index, tag, "Tagged interval");
        self.partitioner
            .interval_of(index)
            .ok_or_else(|| Error::InvalidInterval(text.to_string()))
    }

    /// Number of occupied slots
    pub fn count(&self) -> Result<u64> {
        Ok(self.snapshot()?.len() as u64)
    }

    /// Occupied slots, ascending
    pub fn list_occupied(&self) -> Result<Vec<SlotStatus>> {
        let occ = self.snapshot()?;
        Ok(occ
            .records()
            .filter_map(|record| {
                let interval = self.partitioner.interval_of(record.index)?;
                Some(SlotStatus {
                    low: interval.low,
                    high: interval.high,
                    reserved: true,
                    updated: Some(record.updated_at),
                    instance: record.tag.clone(),
                })
            })
            .collect())
    }

    /// Every slot of the pool, free or not
    pub fn show(&self) -> Result<Vec<SlotStatus>> {
        let occ = self.snapshot()?;
        Ok(self
            .partitioner
            .slots()
            .map(|(index, interval)| {
                let record = occ.get(index);
                SlotStatus {
                    low: interval.low,
                    high: interval.high,
                    reserved: record.is_some(),
                    updated: record.map(|r| r.updated_at),
                    instance: record.and_then(|r| r.tag.clone()),
                }
            })
            .collect())
    }

    /// Free the whole pool
    pub fn reset(&self) -> Result<()> {
        PoolInitializer::new(self.pool()).reset(self.store.as_ref())
    }
}
