// packages/runner/src/utils/errors.rs
//! Error types for the experiment runner
//!
//! Fatal errors (`Privilege`, `Range`) are raised during `INIT` before any
//! side effect happens. Everything else aborts the current experiment.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Crate-wide result alias
pub type Result<T> = std::result::Result<T, RunnerError>;

/// Errors produced by the runner and its components
#[derive(Debug, Error)]
pub enum RunnerError {
    /// The runner was not started with elevated privilege
    #[error("must run as root (effective uid {euid})")]
    Privilege { euid: u32 },

    /// Status cursor outside `[1, last]`
    #[error("status index out of range: current={current}, last={last}")]
    Range { current: u64, last: u64 },

    /// No status record: nothing is pending
    #[error("no status record at {0}")]
    MissingRecord(PathBuf),

    /// An expected artifact (script, log) is absent
    #[error("missing artifact: {0}")]
    MissingArtifact(String),

    /// An external provisioning or networking command failed
    #[error("`{command}` failed: {reason}")]
    ExternalTool { command: String, reason: String },

    /// Malformed status record or catalog
    #[error("parse error in {source_name}: {reason}")]
    Parse { source_name: String, reason: String },

    /// Invalid or missing configuration
    #[error("configuration error: {0}")]
    ConfigError(String),

    /// Another runner instance holds the lock
    #[error("another runner holds {0}")]
    LockHeld(PathBuf),

    /// A bounded wait elapsed
    #[error("timed out after {elapsed:?} waiting for {what}")]
    Timeout { what: String, elapsed: Duration },

    /// A cancellation request interrupted the experiment
    #[error("experiment cancelled")]
    Cancelled,

    /// Process spawning or signalling failed
    #[error("process error: {0}")]
    ProcessFailed(String),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl RunnerError {
    /// Attach a path to an I/O error
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        RunnerError::Io {
            path: path.into(),
            source,
        }
    }

    pub fn parse(source_name: impl Into<String>, reason: impl Into<String>) -> Self {
        RunnerError::Parse {
            source_name: source_name.into(),
            reason: reason.into(),
        }
    }

    pub fn tool(command: impl Into<String>, reason: impl Into<String>) -> Self {
        RunnerError::ExternalTool {
            command: command.into(),
            reason: reason.into(),
        }
    }

    /// Errors that indicate operator-level corruption or misuse
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            RunnerError::Privilege { .. } | RunnerError::Range { .. } | RunnerError::LockHeld(_)
        )
    }
}

impl From<config::ConfigError> for RunnerError {
    fn from(err: config::ConfigError) -> Self {
        RunnerError::ConfigError(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        assert!(RunnerError::Privilege { euid: 1000 }.is_fatal());
        assert!(RunnerError::Range { current: 0, last: 3 }.is_fatal());
        assert!(!RunnerError::MissingArtifact("script".into()).is_fatal());
        assert!(!RunnerError::tool("lxc-create", "exit 1").is_fatal());
    }

    #[test]
    fn test_display() {
        let err = RunnerError::Range { current: 5, last: 4 };
        assert_eq!(
            err.to_string(),
            "status index out of range: current=5, last=4"
        );
    }
}
