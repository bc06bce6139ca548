// packages/runner/src/runtime/process_manager.rs
//! Process manager for spawning and signalling experiment processes
//!
//! Every process is started in its own process group so that a shell
//! wrapper and everything it forks can be signalled together. Processes
//! running inside containers are found by name through `/proc`.

use crate::utils::errors::{Result, RunnerError};
use nix::errno::Errno;
use nix::sys::signal::{kill, killpg, Signal};
use nix::unistd::Pid;
use std::fs;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::{Child, Command};
use tracing::{debug, info};

/// Linux truncates `/proc/<pid>/comm` to this many bytes
const COMM_LEN: usize = 15;

/// Configuration for spawning a process
#[derive(Debug, Clone)]
pub struct SpawnConfig {
    /// Supervisor-facing name (unique within a group)
    pub name: String,

    /// Program and arguments
    pub argv: Vec<String>,

    /// Working directory
    pub work_dir: Option<PathBuf>,

    /// File receiving stdout and stderr; discarded when `None`
    pub log_path: Option<PathBuf>,
}

impl SpawnConfig {
    pub fn new(name: impl Into<String>, argv: Vec<String>) -> Self {
        Self {
            name: name.into(),
            argv,
            work_dir: None,
            log_path: None,
        }
    }

    /// Run `line` through `/bin/sh -c`
    pub fn shell(name: impl Into<String>, line: &str) -> Self {
        Self::new(name, vec!["/bin/sh".into(), "-c".into(), line.to_string()])
    }

    pub fn with_log(mut self, path: PathBuf) -> Self {
        self.log_path = Some(path);
        self
    }

    pub fn with_work_dir(mut self, dir: PathBuf) -> Self {
        self.work_dir = Some(dir);
        self
    }
}

/// Process manager for detached experiment processes
#[derive(Debug, Clone)]
pub struct ProcessManager {
    /// Time between SIGTERM and SIGKILL
    grace: Duration,
}

impl ProcessManager {
    /// Create a new process manager
    pub fn new(grace: Duration) -> Self {
        Self { grace }
    }

    pub fn grace(&self) -> Duration {
        self.grace
    }

    /// Spawn a process in a new process group
    pub fn spawn(&self, config: &SpawnConfig) -> Result<Child> {
        let (program, args) = config.argv.split_first().ok_or_else(|| {
            RunnerError::ProcessFailed(format!("empty command for {}", config.name))
        })?;

        debug!("Spawning {}: {:?}", config.name, config.argv);

        let mut command = Command::new(program);
        command.args(args).process_group(0).stdin(Stdio::null());

        if let Some(work_dir) = &config.work_dir {
            command.current_dir(work_dir);
        }

        match &config.log_path {
            Some(path) => {
                if let Some(parent) = path.parent() {
                    fs::create_dir_all(parent).map_err(|e| RunnerError::io(parent, e))?;
                }
                let stdout = fs::File::create(path).map_err(|e| RunnerError::io(path, e))?;
                let stderr = stdout.try_clone().map_err(|e| RunnerError::io(path, e))?;
                command.stdout(Stdio::from(stdout)).stderr(Stdio::from(stderr));
            }
            None => {
                command.stdout(Stdio::null()).stderr(Stdio::null());
            }
        }

        let child = command.spawn().map_err(|e| {
            RunnerError::ProcessFailed(format!("failed to spawn {}: {}", config.name, e))
        })?;

        debug!("{} spawned with PID {:?}", config.name, child.id());
        Ok(child)
    }

    /// Signal a whole process group. A vanished group is not an error.
    pub fn signal_group(&self, pgid: u32, signal: Signal) -> Result<()> {
        match killpg(Pid::from_raw(pgid as i32), signal) {
            Ok(()) | Err(Errno::ESRCH) => Ok(()),
            Err(e) => Err(RunnerError::ProcessFailed(format!(
                "failed to send {} to group {}: {}",
                signal, pgid, e
            ))),
        }
    }

    /// Check if a process is running
    pub fn is_running(&self, pid: u32) -> bool {
        kill(Pid::from_raw(pid as i32), None).is_ok()
    }

    /// PIDs whose command name is `name`
    pub fn pids_named(&self, name: &str) -> Vec<u32> {
        let wanted = comm_of(name);
        let entries = match fs::read_dir("/proc") {
            Ok(entries) => entries,
            Err(_) => return vec![],
        };

        entries
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| entry.file_name().to_str()?.parse::<u32>().ok())
            .filter(|pid| {
                fs::read_to_string(format!("/proc/{}/comm", pid))
                    .map(|comm| comm.trim_end() == wanted)
                    .unwrap_or(false)
            })
            .filter(|pid| !is_zombie(*pid))
            .collect()
    }

    /// Stop every process named `name`: SIGTERM, then SIGKILL after the
    /// grace period. Returns how many processes were signalled.
    pub async fn kill_by_name(&self, name: &str) -> Result<usize> {
        let pids = self.pids_named(name);
        if pids.is_empty() {
            debug!("No {} processes running", name);
            return Ok(0);
        }

        info!("Stopping {} {} process(es)", pids.len(), name);
        for pid in &pids {
            send(*pid, Signal::SIGTERM)?;
        }

        let deadline = tokio::time::Instant::now() + self.grace;
        while tokio::time::Instant::now() < deadline {
            if self.pids_named(name).is_empty() {
                return Ok(pids.len());
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        for pid in self.pids_named(name) {
            debug!("{} ({}) still alive, sending SIGKILL", name, pid);
            send(pid, Signal::SIGKILL)?;
        }
        Ok(pids.len())
    }
}

impl Default for ProcessManager {
    fn default() -> Self {
        Self::new(Duration::from_secs(2))
    }
}

/// Exited but not yet reaped; `/proc/<pid>/stat` reports state `Z`
fn is_zombie(pid: u32) -> bool {
    fs::read_to_string(format!("/proc/{}/stat", pid))
        .ok()
        .and_then(|stat| {
            let (_, rest) = stat.rsplit_once(')')?;
            rest.trim_start().chars().next()
        })
        .map_or(false, |state| state == 'Z')
}

fn send(pid: u32, signal: Signal) -> Result<()> {
    match kill(Pid::from_raw(pid as i32), signal) {
        Ok(()) | Err(Errno::ESRCH) => Ok(()),
        Err(e) => Err(RunnerError::ProcessFailed(format!(
            "failed to send {} to {}: {}",
            signal, pid, e
        ))),
    }
}

fn comm_of(name: &str) -> &str {
    match name.char_indices().nth(COMM_LEN) {
        Some((idx, _)) => &name[..idx],
        None => name,
    }
}
