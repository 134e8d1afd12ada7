//! Range partitioning
//!
//! Maps the pool `[start, end]` onto slot indices of fixed width `delta`:
//!
//! ```text
//! start=50, end=249, delta=50
//!
//!   index:   0        1          2          3
//!          50:99   100:149   150:199   200:249
//! ```
//!
//! Arithmetic is done in `i128` so extreme configurations cannot overflow.

use super::interval::{parse_interval, Interval};
use crate::config::PoolConfig;
use crate::error::{Error, Result};
use crate::store::SlotIndex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RangePartitioner {
    pool: PoolConfig,
    slot_count: u64,
}

impl RangePartitioner {
    pub fn new(pool: PoolConfig) -> Result<Self> {
        pool.validate()?;
        let width = pool.end as i128 - pool.start as i128 + 1;
        let slot_count = u64::try_from(width / pool.delta as i128)
            .map_err(|_| Error::Config(format!("pool {} has too many slots", pool)))?;
        Ok(Self { pool, slot_count })
    }

    pub fn pool(&self) -> PoolConfig {
        self.pool
    }

    /// Number of whole slots that fit in the pool
    pub fn slot_count(&self) -> u64 {
        self.slot_count
    }

    pub fn contains_index(&self, index: SlotIndex) -> bool {
        index.get() < self.slot_count
    }

    /// Interval of slot `index`; `None` if it cannot be represented
    ///
    /// Indices past the end of the pool still map to an interval, which
    /// then fails [`is_within_bounds`](Self::is_within_bounds).
    pub fn interval_of(&self, index: SlotIndex) -> Option<Interval> {
        let delta = self.pool.delta as i128;
        let low = (index.get() as i128)
            .checked_mul(delta)?
            .checked_add(self.pool.start as i128)?;
        let high = low + delta - 1;
        Some(Interval::new(
            i64::try_from(low).ok()?,
            i64::try_from(high).ok()?,
        ))
    }

    /// Parse `low:high` notation
    pub fn parse_interval(&self, text: &str) -> Result<Interval> {
        parse_interval(text)
    }

    /// Slot whose interval is exactly `interval`
    pub fn index_of(&self, interval: &Interval) -> Result<SlotIndex> {
        let delta = self.pool.delta as i128;
        let offset = interval.low as i128 - self.pool.start as i128;

        if offset < 0 {
            return Err(Error::InvalidInterval(format!(
                "{} starts below the pool start {}",
                interval, self.pool.start
            )));
        }
        if offset % delta != 0 {
            return Err(Error::InvalidInterval(format!(
                "{} is not aligned to a multiple of {} from {}",
                interval, self.pool.delta, self.pool.start
            )));
        }
        if interval.high as i128 != interval.low as i128 + delta - 1 {
            return Err(Error::InvalidInterval(format!(
                "{} is not {} values wide",
                interval, self.pool.delta
            )));
        }

        u64::try_from(offset / delta)
            .map(SlotIndex::new)
            .map_err(|_| Error::InvalidInterval(format!("{} is out of range", interval)))
    }

    /// True iff the interval lies inside the pool and has the slot width
    pub fn is_within_bounds(&self, interval: &Interval) -> bool {
        interval.low >= self.pool.start
            && interval.high <= self.pool.end
            && interval.high as i128 == interval.low as i128 + self.pool.delta as i128 - 1
    }

    /// Parse, align and bounds-check a user supplied interval
    pub fn resolve(&self, text: &str) -> Result<SlotIndex> {
        let interval = self.parse_interval(text)?;
        let index = self.index_of(&interval)?;
        if !self.is_within_bounds(&interval) {
            return Err(Error::InvalidInterval(format!(
                "{} is outside the pool {}..={}",
                interval, self.pool.start, self.pool.end
            )));
        }
        Ok(index)
    }

    /// Every slot of the pool in ascending order
    pub fn slots(&self) -> impl Iterator<Item = (SlotIndex, Interval)> + '_ {
        (0..self.slot_count)
            .map(SlotIndex::new)
            .filter_map(move |index| self.interval_of(index).map(|iv| (index, iv)))
    }
}
