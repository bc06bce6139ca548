// packages/runner/src/runner/experiment.rs
//! The experiment runner
//!
//! One invocation runs exactly one experiment (or, with the `reinvoke`
//! restart policy, keeps going until the matrix is done):
//!
//! - `INIT`: privilege check, runner lock, status record, catalog entry
//! - `PROVISIONED`: containers created, scripts written
//! - `SYNCHRONIZED`: all containers released through the barrier
//! - `RUNNING`: controller, then generator, then the configured duration
//! - `DRAINING`: stop drivers and traffic-writers
//! - `ADVANCING`: destroy containers, record results, move the cursor
//! - `TERMINAL` or `RESTART`
//!
//! Cancellation is honoured up to `DRAINING`. A cancelled experiment is
//! still drained and torn down but the cursor stays where it was.

use crate::barrier::{BarrierState, BarrierSynchronizer, BarrierWaits, ScriptGenerator};
use crate::catalog::{Catalog, ExperimentDescriptor};
use crate::driver::{raise_mtu, TrafficDriverLauncher, CONTROLLER, GENERATOR};
use crate::provision::{ContainerSet, MountMap, Provisioner};
use crate::runner::manifest::Manifest;
use crate::runner::state::{RunOutcome, RunnerState};
use crate::runtime::poll::Waiter;
use crate::runtime::process_manager::ProcessManager;
use crate::runtime::supervisor::ProcessGroup;
use crate::status::{Advance, RunnerLock, StatusRecord, StatusTracker};
use crate::tools::host::HostControl;
use crate::tools::shell::HostShell;
use crate::utils::config::{RestartPolicy, RunnerConfig};
use crate::utils::errors::{Result, RunnerError};
use std::path::Path;
use tokio::fs;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};
use ulid::Ulid;

/// What one experiment ended with, before the restart policy applies
#[derive(Debug)]
enum Step {
    NothingPending,
    Advanced(Advance),
    Cancelled,
}

/// Drives the experiment matrix one experiment at a time
pub struct ExperimentRunner<S, H> {
    config: RunnerConfig,
    shell: S,
    host: H,
    tracker: StatusTracker,
    cancel: CancellationToken,
}

impl<S, H> ExperimentRunner<S, H>
where
    S: HostShell + Clone,
    H: HostControl,
{
    pub fn new(config: RunnerConfig, shell: S, host: H, cancel: CancellationToken) -> Self {
        let tracker = StatusTracker::new(
            config.paths.status_file.clone(),
            config.paths.catalog_file.clone(),
            config.paths.results_log.clone(),
        );
        Self {
            config,
            shell,
            host,
            tracker,
            cancel,
        }
    }

    pub fn tracker(&self) -> &StatusTracker {
        &self.tracker
    }

    /// Run the pending experiment and apply the restart policy. Fatal
    /// errors are mirrored to the kernel log before they are returned.
    pub async fn run(&self) -> Result<RunOutcome> {
        match self.run_inner().await {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                if e.is_fatal() {
                    self.host.mirror(&e.to_string());
                }
                Err(e)
            }
        }
    }

    async fn run_inner(&self) -> Result<RunOutcome> {
        self.check_privilege()?;
        let _lock = RunnerLock::acquire(&self.config.paths.lock_file)?;

        loop {
            let advance = match self.run_once().await? {
                Step::NothingPending => return Ok(RunOutcome::NothingPending),
                Step::Cancelled => return Ok(RunOutcome::Cancelled),
                Step::Advanced(advance) => advance,
            };

            match advance {
                Advance::Terminal => {
                    info!("Experiment matrix finished");
                    return Ok(RunOutcome::Completed);
                }
                Advance::Next(next) => match self.config.runtime.restart_policy {
                    RestartPolicy::Reboot => {
                        info!("Requesting host restart");
                        self.host.restart().await?;
                        return Ok(RunOutcome::RestartRequested { next: next.current });
                    }
                    RestartPolicy::Reinvoke => {
                        info!("Re-invoking for experiment {}/{}", next.current, next.last);
                        if self.cancel.is_cancelled() {
                            return Ok(RunOutcome::Cancelled);
                        }
                    }
                },
            }
        }
    }

    fn check_privilege(&self) -> Result<()> {
        let euid = self.host.effective_uid();
        if euid == 0 {
            return Ok(());
        }
        if self.config.runtime.require_root {
            return Err(RunnerError::Privilege { euid });
        }
        warn!("Running without root (euid {}); host tools may fail", euid);
        Ok(())
    }

    /// INIT for one experiment, then the experiment itself
    async fn run_once(&self) -> Result<Step> {
        let record = match self.tracker.load().await {
            Ok(record) => record,
            Err(RunnerError::MissingRecord(path)) => {
                info!("No status record at {:?}, nothing to do", path);
                return Ok(Step::NothingPending);
            }
            Err(e) => return Err(e),
        };
        record.validate()?;

        let catalog = Catalog::load(&self.config.paths.catalog_file).await?;
        let descriptor = catalog.entry(record.current)?.clone();

        let run_id = Ulid::new();
        let span = info_span!(
            "experiment",
            %run_id,
            seq = descriptor.seq,
            name = %descriptor.name
        );
        self.experiment(run_id, &record, descriptor)
            .instrument(span)
            .await
    }

    async fn experiment(
        &self,
        run_id: Ulid,
        record: &StatusRecord,
        descriptor: ExperimentDescriptor,
    ) -> Result<Step> {
        info!(
            "Experiment {}/{} ({}) for {:?}",
            record.current, record.last, descriptor.params.to_line(), record.duration
        );

        let work_dir = record.work_dir.as_path();
        let log_dir = descriptor.log_dir_in(work_dir);
        fs::create_dir_all(&log_dir)
            .await
            .map_err(|e| RunnerError::io(&log_dir, e))?;

        let mut manifest = Manifest::new(run_id, descriptor.clone(), record.duration);
        let result = self
            .provisioned(record, &descriptor, work_dir, &mut manifest)
            .await;

        let step = match result {
            Ok(()) => {
                self.tracker
                    .advance(record, &descriptor.name, &self.host)
                    .await
                    .map(|advance| {
                        metrics::counter!("runner_experiments_completed_total").increment(1);
                        let (state, outcome) = match &advance {
                            Advance::Next(next) => {
                                (RunnerState::Restart, format!("advanced to {}", next.current))
                            }
                            Advance::Terminal => (RunnerState::Terminal, "matrix complete".into()),
                        };
                        self.enter(&mut manifest, state);
                        manifest.outcome = Some(outcome);
                        Step::Advanced(advance)
                    })
            }
            Err(RunnerError::Cancelled) => {
                warn!("Experiment cancelled; cursor stays at {}", record.current);
                manifest.outcome = Some("cancelled".into());
                Ok(Step::Cancelled)
            }
            Err(e) => Err(e),
        };

        if let Err(e) = &step {
            error!("Experiment failed: {}", e);
            manifest.outcome = Some("failed".into());
            manifest.fail(e);
        }
        if let Err(e) = manifest.write(&log_dir).await {
            warn!("Could not write manifest: {}", e);
        }
        step
    }

    /// Provision, run, then always drain and tear down. Containers are
    /// destroyed before the cursor may move.
    async fn provisioned(
        &self,
        record: &StatusRecord,
        descriptor: &ExperimentDescriptor,
        work_dir: &Path,
        manifest: &mut Manifest,
    ) -> Result<()> {
        let params = &descriptor.params;
        if self.cancel.is_cancelled() {
            return Err(RunnerError::Cancelled);
        }

        let provisioner = Provisioner::new(self.shell.clone(), self.config.clone(), work_dir.to_path_buf());
        let set = provisioner
            .create(params.port_count, params.stack, &params.dest_mode)
            .await?;
        manifest.containers = Some(set.clone());
        self.enter(manifest, RunnerState::Provisioned);

        let mut group =
            ProcessGroup::new(ProcessManager::new(self.config.runtime.terminate_grace()));
        let result = self
            .drive(record, descriptor, work_dir, &set, &mut group, manifest)
            .await;

        self.enter(manifest, RunnerState::Draining);
        self.drain(descriptor, &mut group).await;
        if result.is_ok() {
            self.enter(manifest, RunnerState::Advancing);
        }
        provisioner.destroy(params.port_count, params.stack).await?;
        result
    }

    async fn drive(
        &self,
        record: &StatusRecord,
        descriptor: &ExperimentDescriptor,
        work_dir: &Path,
        set: &ContainerSet,
        group: &mut ProcessGroup,
        manifest: &mut Manifest,
    ) -> Result<()> {
        let config = &self.config;
        let params = &descriptor.params;
        let mounts = MountMap::new(work_dir.to_path_buf(), config.paths.container_mount.clone());
        let state = BarrierState::new(config.paths.barrier_dir_in(work_dir));

        // Gate must read closed before any script can exist
        state.prepare().await?;
        let generator = ScriptGenerator::new(
            &config.tools,
            &config.barrier,
            config.paths.script_dir_in(work_dir),
            mounts.clone(),
        );
        let scripts = generator.write_all(set, descriptor, &state).await?;
        let container_scripts = scripts
            .iter()
            .map(|path| mounts.to_container(path))
            .collect::<Result<Vec<_>>>()?;

        raise_mtu(
            &self.shell,
            &config.tools.link_mtu,
            set,
            params.packet_len,
            config.network.link_mtu,
        )
        .await?;

        let waits = self.barrier_waits();
        let synchronizer = BarrierSynchronizer::new(&state, &config.tools.container_exec, waits);
        let waited = synchronizer
            .rendezvous(set, &scripts, &container_scripts, group)
            .await?;
        manifest.barrier_wait_ms = Some(waited.as_millis());
        if params.stack.needs_discovery() {
            synchronizer
                .wait_for_neighbors(&self.shell, &config.tools.neighbor_list, set.len())
                .await?;
        }
        self.enter(manifest, RunnerState::Synchronized);

        let launcher = TrafficDriverLauncher::new(
            work_dir.to_path_buf(),
            descriptor.log_dir_in(work_dir),
            self.waiter().with_timeout(config.barrier.controller_timeout()),
        );
        let ready = launcher
            .launch_controller(
                group,
                &descriptor.controller_cmd,
                &descriptor.controller_log(work_dir),
            )
            .await?;
        manifest.controller_ready_ms = Some(ready.elapsed().as_millis());
        launcher.launch_generator(
            group,
            &descriptor.generator_cmd,
            &descriptor.generator_log(work_dir),
            &ready,
        )?;
        self.enter(manifest, RunnerState::Running);

        info!("Traffic running for {:?}", record.duration);
        self.waiter().sleep(record.duration).await?;

        for (name, health) in group.health_report() {
            debug!("{}: {:?}", name, health);
        }
        Ok(())
    }

    /// Stop drivers and traffic-writers. Never fails; problems are logged.
    async fn drain(&self, descriptor: &ExperimentDescriptor, group: &mut ProcessGroup) {
        if descriptor.params.update_rate > 0 {
            if let Err(e) = group.terminate(CONTROLLER).await {
                warn!("Stopping the controller failed: {}", e);
            }
        } else if matches!(group.health(CONTROLLER), Ok(health) if health.is_running()) {
            // A static table takes no updates; the controller finishes by itself
            if let Some(pid) = group.release(CONTROLLER) {
                info!("Static-table controller {} left to exit on its own", pid);
            }
        }

        if let Err(e) = group.terminate(GENERATOR).await {
            warn!("Stopping the generator failed: {}", e);
        }

        let writer = &self.config.tools.writer_process_name;
        match group.manager().kill_by_name(writer).await {
            Ok(count) => debug!("Stopped {} {} processes", count, writer),
            Err(e) => warn!("Stopping {} processes failed: {}", writer, e),
        }

        for (name, status) in group.reap() {
            debug!("{} exited with {}", name, status);
        }
        if let Err(e) = group.terminate_all().await {
            warn!("Stopping remaining processes failed: {}", e);
        }
    }

    fn enter(&self, manifest: &mut Manifest, next: RunnerState) {
        let current = manifest.state();
        if !current.can_transition_to(next) {
            debug!("Unusual transition {} -> {}", current, next);
        }
        info!(state = %next, "{} -> {}", current, next);
        manifest.enter(next);
    }

    fn waiter(&self) -> Waiter {
        Waiter::new(self.config.barrier.poll_interval(), self.cancel.clone())
    }

    fn barrier_waits(&self) -> BarrierWaits {
        let barrier = &self.config.barrier;
        BarrierWaits {
            artifact: self.waiter().with_timeout(barrier.artifact_timeout()),
            markers: self.waiter().with_timeout(barrier.marker_timeout()),
            discovery: self.waiter().with_timeout(barrier.discovery_timeout()),
        }
    }
}
