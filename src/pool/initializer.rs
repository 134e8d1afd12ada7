//! Pool initialization

use crate::config::PoolConfig;
use crate::error::Result;
use crate::store::AllocationStore;
use tracing::info;

/// Brings a store in line with the configured pool
#[derive(Debug, Clone, Copy)]
pub struct PoolInitializer {
    pool: PoolConfig,
}

impl PoolInitializer {
    pub fn new(pool: PoolConfig) -> Self {
        Self { pool }
    }

    /// Free every slot, dropping tags and timestamps
    pub fn reset(&self, store: &dyn AllocationStore) -> Result<()> {
        store.reset(self.pool)?;
        info!(pool = %self.pool, "Reset allocation pool");
        Ok(())
    }

    /// Record the pool geometry in a store that has never been reset.
    ///
    /// Returns true if the store was initialized by this call. Existing
    /// allocations are left alone either way.
    pub fn ensure_initialized(&self, store: &dyn AllocationStore) -> Result<bool> {
        let pool = self.pool;
        let mut initialized = false;
        store.update(&mut |occ| {
            if occ.pool().is_none() && occ.is_empty() {
                occ.reset(pool);
                initialized = true;
            }
            Ok(())
        })?;

        if initialized {
            info!(pool = %pool, "Initialized new allocation pool");
        }
        Ok(initialized)
    }
}
