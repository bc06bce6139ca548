// packages/runner/src/lib.rs
//! Matrix Runner Library
//!
//! Runs a matrix of network-forwarding experiments, one experiment per host
//! boot, comparing an IP stack against an XIA stack. Progress survives host
//! restarts through a small on-disk status record.
//!
//! # Architecture
//!
//! The runner is structured into several key modules:
//!
//! - **status**: persisted cursor, results log, single-runner lock
//! - **catalog**: the experiment catalog and its descriptors
//! - **provision**: container set layout, creation and teardown
//! - **barrier**: startup scripts, start-gate and readiness markers
//! - **driver**: controller and generator launch
//! - **runner**: the per-experiment state machine
//! - **runtime**: process groups and readiness waits
//! - **tools**: command templates and host collaborators
//! - **observability**: tracing and metrics setup
//! - **utils**: configuration and errors

// Public module exports
pub mod barrier;
pub mod catalog;
pub mod driver;
pub mod observability;
pub mod provision;
pub mod runner;
pub mod runtime;
pub mod status;
pub mod tools;
pub mod utils;

// Re-export commonly used types
pub use runner::{ExperimentRunner, RunOutcome, RunnerState};
pub use utils::config::RunnerConfig;
pub use utils::errors::{Result, RunnerError};

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const GIT_HASH: &str = env!("GIT_HASH");

/// Runner build information
#[derive(Debug, Clone, Copy)]
pub struct BuildInfo {
    pub version: &'static str,
    pub git_hash: &'static str,
    pub build_timestamp: &'static str,
    pub rustc_version: &'static str,
}

impl BuildInfo {
    pub fn current() -> Self {
        Self {
            version: VERSION,
            git_hash: GIT_HASH,
            build_timestamp: env!("BUILD_TIMESTAMP"),
            rustc_version: env!("RUSTC_VERSION"),
        }
    }
}

impl std::fmt::Display for BuildInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} ({}, built {} with {})",
            self.version, self.git_hash, self.build_timestamp, self.rustc_version
        )
    }
}
