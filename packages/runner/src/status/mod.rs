// packages/runner/src/status/mod.rs
//! Persistent experiment cursor
//!
//! - **Record**: the four-line status record and its range invariant
//! - **Tracker**: load, atomic store, advance, cumulative results log
//! - **Lock**: exclusive lock enforcing a single active runner

pub mod lock;
pub mod record;
pub mod tracker;

// Re-export commonly used types
pub use lock::RunnerLock;
pub use record::{validate, StatusRecord};
pub use tracker::{Advance, StatusTracker};
