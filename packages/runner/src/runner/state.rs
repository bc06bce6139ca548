// packages/runner/src/runner/state.rs
//! Experiment lifecycle states and outcomes

use serde::Serialize;
use std::fmt;

/// Lifecycle of one runner invocation
///
/// ```text
/// INIT -> PROVISIONED -> SYNCHRONIZED -> RUNNING -> DRAINING -> ADVANCING
///      -> TERMINAL | RESTART
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunnerState {
    Init,
    Provisioned,
    Synchronized,
    Running,
    Draining,
    Advancing,
    Terminal,
    Restart,
}

impl RunnerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunnerState::Init => "INIT",
            RunnerState::Provisioned => "PROVISIONED",
            RunnerState::Synchronized => "SYNCHRONIZED",
            RunnerState::Running => "RUNNING",
            RunnerState::Draining => "DRAINING",
            RunnerState::Advancing => "ADVANCING",
            RunnerState::Terminal => "TERMINAL",
            RunnerState::Restart => "RESTART",
        }
    }

    /// Whether `next` may directly follow this state
    pub fn can_transition_to(&self, next: RunnerState) -> bool {
        use RunnerState::*;
        matches!(
            (self, next),
            (Init, Provisioned)
                | (Provisioned, Synchronized)
                | (Synchronized, Running)
                | (Running, Draining)
                | (Advancing, Terminal)
                | (Advancing, Restart)
                // Failures and cancellation drain from wherever they happen
                | (Provisioned, Draining)
                | (Synchronized, Draining)
                | (Draining, Advancing)
        )
    }
}

impl fmt::Display for RunnerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a runner invocation ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// No status record: nothing to do
    NothingPending,
    /// Experiment finished and a host restart was requested; the cursor
    /// points at `next`
    RestartRequested { next: u64 },
    /// The last experiment finished; record and catalog are gone
    Completed,
    /// Interrupted before advancing; the same experiment runs next time
    Cancelled,
}

impl fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunOutcome::NothingPending => write!(f, "nothing pending"),
            RunOutcome::RestartRequested { next } => {
                write!(f, "restart requested, experiment {} next", next)
            }
            RunOutcome::Completed => write!(f, "matrix complete"),
            RunOutcome::Cancelled => write!(f, "cancelled"),
        }
    }
}
