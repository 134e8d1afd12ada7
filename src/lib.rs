// VLAN range allocator
// Hands out fixed-width intervals from a bounded pool, one process at a time.

#![warn(rust_2018_idioms)]

pub mod config;
pub mod pool;
pub mod store;

// Re-exports for convenience
pub use config::{PoolConfig, Settings, StoreConfig};
pub use pool::{Allocator, Interval, PoolInitializer, RangePartitioner, SlotStatus};
pub use store::{AllocationStore, LogStore, MemoryStore, SlotIndex, SlotRecord};

/// Allocator error types
pub mod error {
    use thiserror::Error;

    #[derive(Error, Debug)]
    pub enum Error {
        #[error("Malformed interval: {0:?}")]
        Parse(String),

        #[error("Invalid interval: {0}")]
        InvalidInterval(String),

        #[error("all intervals are currently in use")]
        PoolExhausted,

        #[error("Slot {0} is not reserved")]
        NotOccupied(u64),

        #[error("Slot {0} is already reserved")]
        AlreadyOccupied(u64),

        #[error("Concurrency conflict: {0}")]
        ConcurrencyConflict(String),

        #[error("Invalid tag: {0}")]
        InvalidTag(String),

        #[error("Pool mismatch: {0}")]
        PoolMismatch(String),

        #[error("Configuration error: {0}")]
        Config(String),

        #[error("Storage error: {0}")]
        Storage(String),
    }

    impl Error {
        /// Only a lost race for the store lock is worth another attempt.
        pub fn is_retryable(&self) -> bool {
            matches!(self, Error::ConcurrencyConflict(_))
        }

        /// The interval given on the command line could not be used.
        pub fn is_bad_interval(&self) -> bool {
            matches!(self, Error::Parse(_) | Error::InvalidInterval(_))
        }
    }

    pub type Result<T> = std::result::Result<T, Error>;
}

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
