// packages/runner/src/barrier/synchronizer.rs
//! Two-phase container rendezvous
//!
//! 1. Close the gate and clear the markers.
//! 2. Launch every container's script in index order, waiting for each
//!    script file to exist first.
//! 3. Wait until exactly one marker per container is present.
//! 4. Clear the markers, then open the gate for everyone at once.
//!
//! Start skew across containers is bounded by the in-container gate poll
//! interval, and no container passes the gate before every peer is ready.

use crate::barrier::gate::BarrierState;
use crate::provision::container::ContainerSet;
use crate::runtime::poll::{wait_until, Waiter};
use crate::runtime::process_manager::SpawnConfig;
use crate::runtime::supervisor::{Health, ProcessGroup};
use crate::tools::shell::HostShell;
use crate::tools::template::{CommandTemplate, Vars};
use crate::utils::errors::{Result, RunnerError};
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tokio::fs;
use tracing::{debug, info};

/// Supervisor name of container `index`'s script
pub fn container_process_name(index: usize) -> String {
    format!("container-{}", index)
}

/// Waits that make up one rendezvous
#[derive(Debug, Clone)]
pub struct BarrierWaits {
    /// Script files appearing
    pub artifact: Waiter,
    /// All readiness markers appearing
    pub markers: Waiter,
    /// Neighbor discovery completing
    pub discovery: Waiter,
}

/// Runs the rendezvous for one container set
pub struct BarrierSynchronizer<'a> {
    state: &'a BarrierState,
    exec: &'a CommandTemplate,
    waits: BarrierWaits,
}

impl<'a> BarrierSynchronizer<'a> {
    pub fn new(state: &'a BarrierState, exec: &'a CommandTemplate, waits: BarrierWaits) -> Self {
        Self { state, exec, waits }
    }

    /// Launch every container and release them together once all are ready.
    /// `scripts[i]` is the host path of container `i + 1`'s script.
    pub async fn rendezvous(
        &self,
        set: &ContainerSet,
        scripts: &[PathBuf],
        container_scripts: &[PathBuf],
        group: &mut ProcessGroup,
    ) -> Result<Duration> {
        if scripts.len() != set.len() || container_scripts.len() != set.len() {
            return Err(RunnerError::MissingArtifact(format!(
                "{} scripts for {} containers",
                scripts.len(),
                set.len()
            )));
        }

        let started = Instant::now();
        self.state.prepare().await?;

        for ((container, script), inner) in set.iter().zip(scripts).zip(container_scripts) {
            self.wait_for_script(script).await?;

            let vars = container.vars().with("script", inner.display());
            let argv = self.exec.render(&vars);
            group.start(&SpawnConfig::new(container_process_name(container.index), argv))?;
        }

        let expected = set.len();
        info!("Waiting for {} readiness markers", expected);
        let state = self.state;
        wait_until("readiness markers", &self.waits.markers, || {
            let crashed = first_exited(group, expected);
            async move {
                if let Some((name, health)) = crashed {
                    return Err(RunnerError::tool(
                        name,
                        format!("exited before reaching the barrier ({:?})", health),
                    ));
                }
                let count = state.count_markers().await?;
                debug!("{}/{} containers ready", count, expected);
                Ok::<_, RunnerError>((count == expected).then_some(()))
            }
        })
        .await?;

        self.release().await?;

        let elapsed = started.elapsed();
        metrics::histogram!("runner_barrier_wait_seconds").record(elapsed.as_secs_f64());
        info!("Released {} containers after {:?}", expected, elapsed);
        Ok(elapsed)
    }

    /// Clear the markers, then open the gate
    pub async fn release(&self) -> Result<()> {
        self.state.clear_markers().await?;
        self.state.set_gate(true).await
    }

    /// Poll the neighbor listing until it reports `expected` neighbors
    pub async fn wait_for_neighbors<S: HostShell>(
        &self,
        shell: &S,
        list: &CommandTemplate,
        expected: usize,
    ) -> Result<()> {
        info!("Waiting for {} neighbors to be discovered", expected);
        let argv = list.render(&Vars::new());
        let argv = &argv;
        wait_until("neighbor discovery", &self.waits.discovery, || async move {
            let listing = shell.run(argv).await?;
            let found = count_neighbors(&listing);
            debug!("{}/{} neighbors discovered", found, expected);
            Ok::<_, RunnerError>((found == expected).then_some(()))
        })
        .await?;
        info!("All {} neighbors discovered", expected);
        Ok(())
    }

    async fn wait_for_script(&self, script: &PathBuf) -> Result<()> {
        wait_until(
            &format!("script {}", script.display()),
            &self.waits.artifact,
            || async move {
                let present = fs::try_exists(script)
                    .await
                    .map_err(|e| RunnerError::io(script, e))?;
                Ok::<_, RunnerError>(present.then_some(()))
            },
        )
        .await
    }
}

/// Neighbor listings print one neighbor per line; blank and `#` lines are
/// headers
pub fn count_neighbors(listing: &str) -> usize {
    listing
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .count()
}

fn first_exited(group: &mut ProcessGroup, count: usize) -> Option<(String, Health)> {
    (1..=count)
        .map(container_process_name)
        .find_map(|name| match group.health(&name) {
            Ok(health) if !health.is_running() => Some((name, health)),
            _ => None,
        })
}
