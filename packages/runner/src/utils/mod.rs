// packages/runner/src/utils/mod.rs
//! Common utilities: configuration and errors

pub mod config;
pub mod errors;

pub use config::RunnerConfig;
pub use errors::{Result, RunnerError};
