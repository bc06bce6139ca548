// packages/runner/src/barrier/mod.rs
//! Start barrier for the containers of one experiment

pub mod gate;
pub mod script;
pub mod synchronizer;

pub use gate::BarrierState;
pub use script::ScriptGenerator;
pub use synchronizer::{container_process_name, count_neighbors, BarrierSynchronizer, BarrierWaits};
