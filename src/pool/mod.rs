//! Interval allocation engine
//!
//! ```text
//! Allocator
//!   ├─→ RangePartitioner   slot index ⇄ low:high
//!   ├─→ PoolInitializer    reset / first-run geometry
//!   └─→ Box<dyn AllocationStore>
//! ```

pub mod allocator;
pub mod initializer;
pub mod interval;
pub mod partition;

pub use allocator::{first_gap, retry_on_conflict, Allocator, SlotStatus};
pub use initializer::PoolInitializer;
pub use interval::{parse_interval, Interval};
pub use partition::RangePartitioner;
