pub mod backoff;
pub mod backpressure;

pub use backoff::{spin_wait, Backoff};
pub use backpressure::BackpressureController;
