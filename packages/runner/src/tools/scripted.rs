// packages/runner/src/tools/scripted.rs
//! In-memory [`HostShell`] and [`HostControl`] fakes for tests
//!
//! Records every command line instead of executing it. Canned output and
//! injected failures are matched by command prefix. [`ScriptedHost`] does
//! the same for host-level operations.

use crate::tools::host::HostControl;
use crate::tools::shell::HostShell;
use crate::utils::errors::{Result, RunnerError};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Default)]
struct Script {
    calls: Vec<String>,
    responses: Vec<(String, String)>,
    failures: Vec<(String, usize)>,
}

/// Recording shell; clones share the same log
#[derive(Debug, Clone, Default)]
pub struct ScriptedShell {
    inner: Arc<Mutex<Script>>,
}

impl ScriptedShell {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return `output` for commands starting with `prefix`
    pub fn respond(&self, prefix: &str, output: &str) {
        self.inner
            .lock()
            .responses
            .push((prefix.to_string(), output.to_string()));
    }

    /// Fail commands starting with `prefix`, after `skip` successful matches
    pub fn fail_after(&self, prefix: &str, skip: usize) {
        self.inner.lock().failures.push((prefix.to_string(), skip));
    }

    pub fn fail(&self, prefix: &str) {
        self.fail_after(prefix, 0);
    }

    /// Every command run so far, space-joined
    pub fn calls(&self) -> Vec<String> {
        self.inner.lock().calls.clone()
    }

    pub fn calls_starting_with(&self, prefix: &str) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|c| c.starts_with(prefix))
            .collect()
    }

    pub fn clear(&self) {
        self.inner.lock().calls.clear();
    }
}

impl HostShell for ScriptedShell {
    async fn run(&self, argv: &[String]) -> Result<String> {
        let line = argv.join(" ");
        let mut script = self.inner.lock();
        script.calls.push(line.clone());

        if let Some(entry) = script
            .failures
            .iter_mut()
            .find(|(prefix, _)| line.starts_with(prefix.as_str()))
        {
            if entry.1 == 0 {
                return Err(RunnerError::tool(&line, "injected failure"));
            }
            entry.1 -= 1;
        }

        debug!(target: "matrix_runner::scripted", "{}", line);

        // Latest registration wins
        let output = script
            .responses
            .iter()
            .rev()
            .find(|(prefix, _)| line.starts_with(prefix.as_str()))
            .map(|(_, out)| out.clone())
            .unwrap_or_default();
        Ok(output)
    }
}

/// Host stand-in recording restart and boot-hook requests
#[derive(Debug, Clone)]
pub struct ScriptedHost {
    euid: u32,
    kernel_log: String,
    events: Arc<Mutex<Vec<String>>>,
}

impl ScriptedHost {
    pub fn new(euid: u32) -> Self {
        Self {
            euid,
            kernel_log: String::new(),
            events: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn with_kernel_log(mut self, text: &str) -> Self {
        self.kernel_log = text.to_string();
        self
    }

    /// `mirror:<msg>`, `kernel_log`, `boot_hook_removed`, `restart`
    pub fn events(&self) -> Vec<String> {
        self.events.lock().clone()
    }

    pub fn restarts(&self) -> usize {
        self.events().iter().filter(|e| *e == "restart").count()
    }

    pub fn boot_hook_removed(&self) -> bool {
        self.events().iter().any(|e| e == "boot_hook_removed")
    }
}

impl HostControl for ScriptedHost {
    fn effective_uid(&self) -> u32 {
        self.euid
    }

    fn mirror(&self, message: &str) {
        self.events.lock().push(format!("mirror:{}", message));
    }

    async fn kernel_log(&self) -> Result<String> {
        self.events.lock().push("kernel_log".into());
        Ok(self.kernel_log.clone())
    }

    async fn remove_boot_hook(&self) -> Result<()> {
        self.events.lock().push("boot_hook_removed".into());
        Ok(())
    }

    async fn restart(&self) -> Result<()> {
        self.events.lock().push("restart".into());
        Ok(())
    }
}
