// packages/runner/src/driver/launcher.rs
//! Controller and generator launch
//!
//! The controller reports `DONE` once its initial forwarding table is
//! installed, usually at the end of its progress line
//! (`Loading routing table... DONE`). The generator may only start after
//! that token has appeared in the controller's log; [`ControllerReady`] is the proof that
//! it did, and [`TrafficDriverLauncher::launch_generator`] requires it.

use crate::provision::container::ContainerSet;
use crate::runtime::poll::{wait_until, Waiter};
use crate::runtime::process_manager::SpawnConfig;
use crate::runtime::supervisor::ProcessGroup;
use crate::tools::shell::HostShell;
use crate::tools::template::{CommandTemplate, Vars};
use crate::utils::errors::{Result, RunnerError};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tokio::fs;
use tracing::{debug, info};

/// Supervisor name of the controller
pub const CONTROLLER: &str = "controller";

/// Supervisor name of the generator
pub const GENERATOR: &str = "generator";

/// Readiness token printed by the controller
pub const READY_TOKEN: &str = "DONE";

/// Issued once the controller reported readiness
#[derive(Debug)]
pub struct ControllerReady {
    pid: u32,
    elapsed: Duration,
}

impl ControllerReady {
    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Time from launch until the readiness line was observed
    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }
}

/// Starts the controller and generator of one experiment
pub struct TrafficDriverLauncher {
    work_dir: PathBuf,
    log_dir: PathBuf,
    waiter: Waiter,
}

impl TrafficDriverLauncher {
    /// `waiter` bounds the controller readiness wait
    pub fn new(work_dir: PathBuf, log_dir: PathBuf, waiter: Waiter) -> Self {
        Self {
            work_dir,
            log_dir,
            waiter,
        }
    }

    /// Catalog command lines may refer to `{work_dir}` and `{log_dir}`
    pub fn expand(&self, command: &str) -> String {
        Vars::new()
            .with("work_dir", self.work_dir.display())
            .with("log_dir", self.log_dir.display())
            .quoted()
            .expand(command)
    }

    /// Start the controller with its output in `log`, then wait until the
    /// log holds a ready line. Fails if the controller exits first.
    pub async fn launch_controller(
        &self,
        group: &mut ProcessGroup,
        command: &str,
        log: &Path,
    ) -> Result<ControllerReady> {
        let started = Instant::now();
        let config = SpawnConfig::shell(CONTROLLER, &self.expand(command))
            .with_work_dir(self.work_dir.clone())
            .with_log(log.to_path_buf());
        let pid = group.start(&config)?;

        info!("Waiting for controller readiness in {:?}", log);
        wait_until("controller readiness", &self.waiter, || {
            // Health first: a controller that printed DONE and then exited
            // is still ready
            let exited = group
                .health(CONTROLLER)
                .map(|health| !health.is_running());
            async move {
                let exited = exited?;
                if log_has_ready_line(log).await? {
                    return Ok(Some(()));
                }
                if exited {
                    return Err(RunnerError::ProcessFailed(format!(
                        "controller exited without printing {}",
                        READY_TOKEN
                    )));
                }
                Ok::<_, RunnerError>(None)
            }
        })
        .await?;

        let elapsed = started.elapsed();
        metrics::histogram!("runner_controller_ready_seconds").record(elapsed.as_secs_f64());
        info!("Controller ready after {:?}", elapsed);
        Ok(ControllerReady { pid, elapsed })
    }

    /// Start the generator; only possible once the controller is ready
    pub fn launch_generator(
        &self,
        group: &mut ProcessGroup,
        command: &str,
        log: &Path,
        ready: &ControllerReady,
    ) -> Result<u32> {
        debug!("Controller {} ready, starting generator", ready.pid());
        let config = SpawnConfig::shell(GENERATOR, &self.expand(command))
            .with_work_dir(self.work_dir.clone())
            .with_log(log.to_path_buf());
        group.start(&config)
    }
}

/// Raise the MTU of every container's virtual link when packets would not
/// fit. Returns whether anything changed.
pub async fn raise_mtu<S: HostShell>(
    shell: &S,
    template: &CommandTemplate,
    set: &ContainerSet,
    packet_len: u32,
    link_mtu: u32,
) -> Result<bool> {
    if packet_len <= link_mtu {
        return Ok(false);
    }

    info!(
        "Packet length {} exceeds link MTU {}, raising MTU on {} links",
        packet_len,
        link_mtu,
        set.len()
    );
    for container in set.iter() {
        let vars = container.vars().with("mtu", packet_len);
        shell.run(&template.render(&vars)).await?;
    }
    Ok(true)
}

/// A line carrying [`READY_TOKEN`] as a whitespace-separated token
pub fn is_ready_line(line: &str) -> bool {
    line.split_whitespace().any(|word| word == READY_TOKEN)
}

async fn log_has_ready_line(log: &Path) -> Result<bool> {
    match fs::read_to_string(log).await {
        Ok(text) => Ok(text.lines().any(is_ready_line)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(RunnerError::io(log, e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::StackKind;
    use crate::runtime::process_manager::ProcessManager;
    use crate::tools::scripted::ScriptedShell;
    use crate::utils::config::RunnerConfig;
    use tokio_util::sync::CancellationToken;

    fn launcher(dir: &Path, timeout: Duration) -> TrafficDriverLauncher {
        let waiter = Waiter::new(Duration::from_millis(10), CancellationToken::new())
            .with_timeout(Some(timeout));
        TrafficDriverLauncher::new(dir.to_path_buf(), dir.join("logs"), waiter)
    }

    fn group() -> ProcessGroup {
        ProcessGroup::new(ProcessManager::new(Duration::from_millis(200)))
    }

    #[tokio::test]
    async fn test_controller_then_generator() {
        let dir = tempfile::tempdir().unwrap();
        let launcher = launcher(dir.path(), Duration::from_secs(10));
        let mut group = group();
        let log = dir.path().join("logs/controller.log");

        let ready = launcher
            .launch_controller(&mut group, "sleep 0.1; echo DONE; sleep 30", &log)
            .await
            .unwrap();
        assert!(ready.elapsed() >= Duration::from_millis(100));

        launcher
            .launch_generator(
                &mut group,
                "echo started > {log_dir}/gen.out",
                &dir.path().join("logs/generator.log"),
                &ready,
            )
            .unwrap();
        assert!(group.contains(GENERATOR));
        group.terminate_all().await.unwrap();
    }

    #[tokio::test]
    async fn test_controller_that_exits_after_done_is_ready() {
        let dir = tempfile::tempdir().unwrap();
        let launcher = launcher(dir.path(), Duration::from_secs(10));
        let mut group = group();
        let log = dir.path().join("controller.log");

        launcher
            .launch_controller(&mut group, "echo loading; echo DONE", &log)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_done_after_progress_text_is_ready() {
        let dir = tempfile::tempdir().unwrap();
        let launcher = launcher(dir.path(), Duration::from_secs(10));
        let mut group = group();
        let log = dir.path().join("controller.log");

        launcher
            .launch_controller(
                &mut group,
                "printf 'Loading routing table... '; sleep 0.1; printf 'DONE\\n'; sleep 30",
                &log,
            )
            .await
            .unwrap();
        group.terminate_all().await.unwrap();
    }

    #[tokio::test]
    async fn test_static_controller_exits_after_progress_line() {
        let dir = tempfile::tempdir().unwrap();
        let launcher = launcher(dir.path(), Duration::from_secs(10));
        let mut group = group();
        let log = dir.path().join("controller.log");

        launcher
            .launch_controller(
                &mut group,
                "printf 'Loading routing table... '; printf 'DONE\\n'",
                &log,
            )
            .await
            .unwrap();
    }

    #[test]
    fn test_ready_line_matching() {
        assert!(is_ready_line("DONE"));
        assert!(is_ready_line("  DONE \r"));
        assert!(is_ready_line("Loading routing table... DONE"));
        assert!(!is_ready_line("Loading routing table..."));
        assert!(!is_ready_line("DONE-ish"));
        assert!(!is_ready_line("UNDONE"));
        assert!(!is_ready_line(""));
    }

    #[tokio::test]
    async fn test_no_done_never_launches_generator() {
        let dir = tempfile::tempdir().unwrap();
        let launcher = launcher(dir.path(), Duration::from_millis(300));
        let mut group = group();
        let log = dir.path().join("controller.log");

        let result = launcher
            .launch_controller(&mut group, "echo loading; sleep 30", &log)
            .await;
        assert!(matches!(result, Err(RunnerError::Timeout { .. })));
        // Without a ControllerReady there is no way to call launch_generator
        assert!(!group.contains(GENERATOR));
        group.terminate_all().await.unwrap();
    }

    #[tokio::test]
    async fn test_controller_exit_without_done_fails() {
        let dir = tempfile::tempdir().unwrap();
        let launcher = launcher(dir.path(), Duration::from_secs(10));
        let mut group = group();
        let log = dir.path().join("controller.log");

        let result = launcher
            .launch_controller(&mut group, "echo 'Loading routing table...'; exit 1", &log)
            .await;
        assert!(matches!(result, Err(RunnerError::ProcessFailed(_))));
        assert!(!group.contains(GENERATOR));
    }

    #[test]
    fn test_expand_placeholders() {
        let waiter = Waiter::new(Duration::from_millis(10), CancellationToken::new());
        let launcher = TrafficDriverLauncher::new(
            PathBuf::from("/srv/exp"),
            PathBuf::from("/srv/exp/logs/run 1"),
            waiter,
        );
        assert_eq!(
            launcher.expand("rk ip 0 1 > {log_dir}/rk.out"),
            "rk ip 0 1 > '/srv/exp/logs/run 1'/rk.out"
        );
    }

    #[tokio::test]
    async fn test_raise_mtu_only_when_needed() {
        let config = RunnerConfig::default();
        let set = ContainerSet::plan(2, StackKind::Ip, &config).unwrap();
        let shell = ScriptedShell::new();

        let changed = raise_mtu(&shell, &config.tools.link_mtu, &set, 1400, 1500)
            .await
            .unwrap();
        assert!(!changed);
        assert!(shell.calls().is_empty());

        let changed = raise_mtu(&shell, &config.tools.link_mtu, &set, 9000, 1500)
            .await
            .unwrap();
        assert!(changed);
        assert_eq!(
            shell.calls(),
            vec![
                "ip link set dev veth-ip1 mtu 9000",
                "ip link set dev veth-ip2 mtu 9000"
            ]
        );
    }
}
