// packages/runner/src/runner/mod.rs
//! Experiment runner state machine
//!
//! - **State**: lifecycle states and invocation outcomes
//! - **Manifest**: per-experiment `manifest.json`
//! - **Experiment**: the runner driving one experiment end to end

pub mod experiment;
pub mod manifest;
pub mod state;

// Re-export commonly used types
pub use experiment::ExperimentRunner;
pub use manifest::{Manifest, MANIFEST_FILE};
pub use state::{RunOutcome, RunnerState};
