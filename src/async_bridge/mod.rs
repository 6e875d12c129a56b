//! Running futures on the coordinator's pools.

pub mod spawn;
pub mod yield_now;

pub use spawn::block_on;
pub use yield_now::{yield_point, YieldNow};
