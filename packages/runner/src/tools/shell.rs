// packages/runner/src/tools/shell.rs
//! Execution of external provisioning and networking commands
//!
//! Every collaborator tool (container pool, `ip`, `sysctl`, `modprobe`,
//! `xip`, ...) is reached through [`HostShell`]. Commands are awaited to
//! completion; a non-zero exit is an `ExternalTool` error.

use crate::utils::errors::{Result, RunnerError};
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, warn};

/// Runs a command to completion and returns its standard output
#[allow(async_fn_in_trait)]
pub trait HostShell {
    async fn run(&self, argv: &[String]) -> Result<String>;

    /// Run and log failures instead of propagating them
    async fn run_tolerant(&self, argv: &[String]) -> Option<String> {
        match self.run(argv).await {
            Ok(out) => Some(out),
            Err(e) => {
                warn!("Ignoring failure: {}", e);
                None
            }
        }
    }
}

/// Shell backed by real processes
#[derive(Debug, Clone, Default)]
pub struct SystemShell;

impl SystemShell {
    pub fn new() -> Self {
        Self
    }
}

impl HostShell for SystemShell {
    async fn run(&self, argv: &[String]) -> Result<String> {
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| RunnerError::tool("<empty>", "empty command line"))?;
        let line = argv.join(" ");

        debug!("Running `{}`", line);

        let output = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| RunnerError::tool(&line, format!("spawn failed: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(RunnerError::tool(
                &line,
                format!("{}: {}", output.status, stderr.trim()),
            ));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}
