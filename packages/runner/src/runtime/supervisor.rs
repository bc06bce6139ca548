// packages/runner/src/runtime/supervisor.rs
//! Supervised process group
//!
//! Owns every detached process of one experiment: containers' startup
//! scripts, the controller and the generator. Exit codes are never used for
//! control decisions, but they are collected and logged so failures are
//! visible.

use crate::runtime::process_manager::{ProcessManager, SpawnConfig};
use crate::utils::errors::{Result, RunnerError};
use futures::future::join_all;
use nix::sys::signal::Signal;
use std::process::ExitStatus;
use std::time::Instant;
use tokio::process::Child;
use tracing::{debug, info, warn};

/// Observed state of a supervised process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Health {
    Running,
    Exited(ExitStatus),
}

impl Health {
    pub fn is_running(&self) -> bool {
        matches!(self, Health::Running)
    }
}

struct Member {
    name: String,
    child: Child,
    pgid: Option<u32>,
    started_at: Instant,
}

/// Processes started for one experiment
pub struct ProcessGroup {
    manager: ProcessManager,
    members: Vec<Member>,
}

impl ProcessGroup {
    pub fn new(manager: ProcessManager) -> Self {
        Self {
            manager,
            members: Vec::new(),
        }
    }

    pub fn manager(&self) -> &ProcessManager {
        &self.manager
    }

    /// Start a member; names must be unique within the group
    pub fn start(&mut self, config: &SpawnConfig) -> Result<u32> {
        if self.members.iter().any(|m| m.name == config.name) {
            return Err(RunnerError::ProcessFailed(format!(
                "{} is already supervised",
                config.name
            )));
        }

        let child = self.manager.spawn(config)?;
        let pid = child.id().ok_or_else(|| {
            RunnerError::ProcessFailed(format!("{} exited before it could be tracked", config.name))
        })?;

        info!("Started {} (pid {})", config.name, pid);
        self.members.push(Member {
            name: config.name.clone(),
            child,
            pgid: Some(pid),
            started_at: Instant::now(),
        });
        Ok(pid)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.members.iter().any(|m| m.name == name)
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// External health check of one member
    pub fn health(&mut self, name: &str) -> Result<Health> {
        let member = self
            .members
            .iter_mut()
            .find(|m| m.name == name)
            .ok_or_else(|| RunnerError::ProcessFailed(format!("{} is not supervised", name)))?;
        check(member)
    }

    /// Health of every member, in start order
    pub fn health_report(&mut self) -> Vec<(String, Health)> {
        self.members
            .iter_mut()
            .filter_map(|m| match check(m) {
                Ok(health) => Some((m.name.clone(), health)),
                Err(e) => {
                    warn!("Health check of {} failed: {}", m.name, e);
                    None
                }
            })
            .collect()
    }

    /// Stop one member: SIGTERM to its group, SIGKILL after the grace
    /// period, then reap it
    pub async fn terminate(&mut self, name: &str) -> Result<Option<ExitStatus>> {
        let index = match self.members.iter().position(|m| m.name == name) {
            Some(index) => index,
            None => return Ok(None),
        };
        let member = self.members.remove(index);
        stop(&self.manager, member).await
    }

    /// Stop supervising a member without signalling it. Returns its pid
    /// when it was still running; it is left to exit on its own.
    pub fn release(&mut self, name: &str) -> Option<u32> {
        let index = self.members.iter().position(|m| m.name == name)?;
        let member = self.members.remove(index);
        let pid = member.child.id()?;
        info!("Released {} (pid {})", member.name, pid);
        Some(pid)
    }

    /// Stop every member, most recently started first
    pub async fn terminate_all(&mut self) -> Result<()> {
        let members: Vec<Member> = self.members.drain(..).rev().collect();
        let manager = &self.manager;
        let results = join_all(members.into_iter().map(|m| stop(manager, m))).await;

        let mut first_error = None;
        for result in results {
            if let Err(e) = result {
                warn!("Termination failed: {}", e);
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Drop members that have already exited, returning their statuses
    pub fn reap(&mut self) -> Vec<(String, ExitStatus)> {
        let mut exited = Vec::new();
        self.members.retain_mut(|m| match m.child.try_wait() {
            Ok(Some(status)) => {
                debug!(
                    "{} exited with {} after {:?}",
                    m.name,
                    status,
                    m.started_at.elapsed()
                );
                exited.push((m.name.clone(), status));
                false
            }
            _ => true,
        });
        exited
    }
}

impl Drop for ProcessGroup {
    fn drop(&mut self) {
        // Best-effort: no process outlives its experiment
        for member in &self.members {
            if let Some(pgid) = member.pgid {
                let _ = self.manager.signal_group(pgid, Signal::SIGKILL);
            }
        }
    }
}

fn check(member: &mut Member) -> Result<Health> {
    match member.child.try_wait() {
        Ok(Some(status)) => Ok(Health::Exited(status)),
        Ok(None) => Ok(Health::Running),
        Err(e) => Err(RunnerError::ProcessFailed(format!(
            "wait on {} failed: {}",
            member.name, e
        ))),
    }
}

async fn stop(manager: &ProcessManager, mut member: Member) -> Result<Option<ExitStatus>> {
    if let Ok(Some(status)) = member.child.try_wait() {
        debug!("{} had already exited with {}", member.name, status);
        return Ok(Some(status));
    }

    let pgid = match member.pgid {
        Some(pgid) => pgid,
        None => return Ok(None),
    };

    debug!("Sending SIGTERM to {} (group {})", member.name, pgid);
    manager.signal_group(pgid, Signal::SIGTERM)?;

    let status = match tokio::time::timeout(manager.grace(), member.child.wait()).await {
        Ok(Ok(status)) => status,
        Ok(Err(e)) => {
            return Err(RunnerError::ProcessFailed(format!(
                "wait on {} failed: {}",
                member.name, e
            )))
        }
        Err(_) => {
            debug!("{} still alive, sending SIGKILL", member.name);
            manager.signal_group(pgid, Signal::SIGKILL)?;
            member.child.wait().await.map_err(|e| {
                RunnerError::ProcessFailed(format!("wait on {} failed: {}", member.name, e))
            })?
        }
    };

    // Stragglers that ignored SIGTERM after the leader exited
    manager.signal_group(pgid, Signal::SIGKILL)?;
    info!("Stopped {} ({})", member.name, status);
    Ok(Some(status))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn group() -> ProcessGroup {
        ProcessGroup::new(ProcessManager::new(Duration::from_millis(300)))
    }

    #[tokio::test]
    async fn test_start_and_terminate() {
        let mut group = group();
        group.start(&SpawnConfig::shell("generator", "sleep 30")).unwrap();
        assert!(group.health("generator").unwrap().is_running());

        let status = group.terminate("generator").await.unwrap();
        assert!(status.is_some());
        assert!(!group.contains("generator"));
    }

    #[tokio::test]
    async fn test_duplicate_names_rejected() {
        let mut group = group();
        group.start(&SpawnConfig::shell("controller", "sleep 30")).unwrap();
        assert!(group.start(&SpawnConfig::shell("controller", "true")).is_err());
        group.terminate_all().await.unwrap();
        assert!(group.is_empty());
    }

    #[tokio::test]
    async fn test_exit_is_observable() {
        let mut group = group();
        group.start(&SpawnConfig::shell("short", "exit 3")).unwrap();

        let mut health = Health::Running;
        for _ in 0..200 {
            health = group.health("short").unwrap();
            if !health.is_running() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        match health {
            Health::Exited(status) => assert_eq!(status.code(), Some(3)),
            Health::Running => panic!("process never exited"),
        }

        let reaped = group.reap();
        assert_eq!(reaped.len(), 1);
        assert!(group.is_empty());
    }

    #[tokio::test]
    async fn test_sigterm_ignored_is_killed() {
        let mut group = group();
        group
            .start(&SpawnConfig::shell("stubborn", "trap '' TERM; sleep 30"))
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let started = Instant::now();
        group.terminate("stubborn").await.unwrap();
        assert!(started.elapsed() >= Duration::from_millis(300));
    }

    #[tokio::test]
    async fn test_released_member_is_not_signalled() {
        let mut group = group();
        let pid = group.start(&SpawnConfig::shell("controller", "sleep 30")).unwrap();

        assert_eq!(group.release("controller"), Some(pid));
        assert!(!group.contains("controller"));
        assert!(group.release("controller").is_none());

        group.terminate_all().await.unwrap();
        drop(group);
        assert!(group_alive(pid));
        let _ = nix::sys::signal::killpg(nix::unistd::Pid::from_raw(pid as i32), Signal::SIGKILL);
    }

    fn group_alive(pgid: u32) -> bool {
        nix::sys::signal::killpg(nix::unistd::Pid::from_raw(pgid as i32), None::<Signal>).is_ok()
    }

    #[tokio::test]
    async fn test_terminate_unknown_is_noop() {
        let mut group = group();
        assert!(group.terminate("missing").await.unwrap().is_none());
    }
}
