// packages/runner/tests/matrix_e2e.rs
//! End-to-end runs of the experiment matrix
//!
//! Host tools go through a recording shell and a fake host. Containers,
//! controller, generator and traffic-writers are real `sh` processes, with
//! the working directory standing in for the container mount.

use matrix_runner::runtime::ProcessManager;
use matrix_runner::status::StatusRecord;
use matrix_runner::tools::{ScriptedHost, ScriptedShell};
use matrix_runner::utils::config::RestartPolicy;
use matrix_runner::{ExperimentRunner, RunOutcome, RunnerConfig};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

const CATALOG: &str = "\
#1#
echo generator-started; sleep 30
printf 'Loading routing table... '; echo DONE; sleep 30
ip dst 10 64 0.5 2 1
exp-1
logs/exp-1
#2#
echo generator-started; sleep 30
printf 'Loading routing table... '; echo DONE
xia via 0 9000 1.0 2 1
exp-2
logs/exp-2
";

struct Fixture {
    dir: TempDir,
    config: RunnerConfig,
    writer: String,
}

impl Fixture {
    /// `writer` must be unique per test: writers are found by process name
    fn new(writer: &str, duration_secs: u64) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let work = dir.path().join("work");
        std::fs::create_dir_all(&work).unwrap();

        let writer_path = dir.path().join(writer);
        std::fs::write(
            &writer_path,
            "#!/bin/sh\necho \"writer $1\" > \"$2\"\nwhile true; do sleep 0.05; done\n",
        )
        .unwrap();
        std::fs::set_permissions(&writer_path, std::fs::Permissions::from_mode(0o755)).unwrap();

        let mut config = RunnerConfig::default();
        config.paths.status_file = dir.path().join("status");
        config.paths.catalog_file = dir.path().join("experiments");
        config.paths.lock_file = dir.path().join("runner.lock");
        config.paths.kmsg = dir.path().join("kmsg");
        config.paths.container_mount = work.clone();
        config.barrier.poll_interval_ms = 10;
        config.barrier.artifact_timeout_secs = Some(20);
        config.barrier.marker_timeout_secs = Some(20);
        config.barrier.discovery_timeout_secs = Some(20);
        config.barrier.controller_timeout_secs = Some(20);
        config.tools.container_exec = "/bin/sh {script}".into();
        config.tools.ip_self_config = vec!["echo configure {addr} via {gateway}".into()];
        config.tools.xia_self_config = vec!["echo configure {hid}".into()];
        config.tools.writer = format!("{} {{index}} {{log}}", writer_path.display());
        config.tools.writer_process_name = writer.to_string();
        config.runtime.terminate_grace_ms = 200;

        std::fs::write(&config.paths.catalog_file, CATALOG).unwrap();
        let record = StatusRecord {
            current: 1,
            last: 2,
            work_dir: work,
            duration: Duration::from_secs(duration_secs),
        };
        std::fs::write(&config.paths.status_file, record.to_text()).unwrap();

        Self {
            dir,
            config,
            writer: writer.to_string(),
        }
    }

    fn work(&self) -> PathBuf {
        self.dir.path().join("work")
    }

    fn runner(
        &self,
        shell: &ScriptedShell,
        host: &ScriptedHost,
        cancel: CancellationToken,
    ) -> ExperimentRunner<ScriptedShell, ScriptedHost> {
        ExperimentRunner::new(self.config.clone(), shell.clone(), host.clone(), cancel)
    }

    fn record(&self) -> Option<StatusRecord> {
        let text = std::fs::read_to_string(&self.config.paths.status_file).ok()?;
        Some(StatusRecord::parse(&text, "status").unwrap())
    }

    fn assert_no_writers(&self) {
        assert!(
            ProcessManager::default().pids_named(&self.writer).is_empty(),
            "traffic-writers survived the experiment"
        );
    }
}

fn recording_shell() -> ScriptedShell {
    let shell = ScriptedShell::new();
    shell.respond("xip hid showneighs", "hid-xia1\nhid-xia2\n");
    shell
}

fn read(path: &Path) -> String {
    std::fs::read_to_string(path).unwrap_or_else(|e| panic!("{:?}: {}", path, e))
}

#[tokio::test]
async fn test_matrix_runs_one_experiment_per_invocation() {
    let fixture = Fixture::new("mr-e2e-w1", 1);
    let work = fixture.work();

    // First boot: experiment 1 (ip)
    let shell = recording_shell();
    let host = ScriptedHost::new(0).with_kernel_log("[ 1.0] forwarding ok\n");
    let outcome = fixture
        .runner(&shell, &host, CancellationToken::new())
        .run()
        .await
        .unwrap();

    assert_eq!(outcome, RunOutcome::RestartRequested { next: 2 });
    assert_eq!(host.restarts(), 1);
    assert!(!host.boot_hook_removed());

    let record = fixture.record().unwrap();
    assert_eq!((record.current, record.last), (2, 2));
    assert_eq!(record.duration, Duration::from_secs(1));
    assert_eq!(record.work_dir, work);

    assert_eq!(shell.calls_starting_with("lxc-pool create"), vec!["lxc-pool create ip 2"]);
    assert_eq!(shell.calls_starting_with("lxc-pool destroy"), vec!["lxc-pool destroy ip 2"]);
    assert!(shell.calls_starting_with("xip hid showneighs").is_empty());
    assert!(shell.calls_starting_with("ip link set dev veth").is_empty());

    let logs = work.join("logs/exp-1");
    assert_eq!(read(&logs.join("controller.log")), "Loading routing table... DONE\n");
    assert!(read(&logs.join("generator.log")).contains("generator-started"));
    assert_eq!(read(&logs.join("writer-1.log")), "writer 1\n");
    assert_eq!(read(&logs.join("writer-2.log")), "writer 2\n");

    let manifest: serde_json::Value =
        serde_json::from_str(&read(&logs.join("manifest.json"))).unwrap();
    assert_eq!(manifest["outcome"], "advanced to 2");
    assert_eq!(manifest["containers"]["members"].as_array().unwrap().len(), 2);

    let results = read(&work.join("results.log"));
    assert!(results.contains("exp-1\n"));
    assert!(results.contains("forwarding ok"));
    fixture.assert_no_writers();

    // Second boot: experiment 2 (xia), the last one
    let shell = recording_shell();
    let host = ScriptedHost::new(0);
    let outcome = fixture
        .runner(&shell, &host, CancellationToken::new())
        .run()
        .await
        .unwrap();

    assert_eq!(outcome, RunOutcome::Completed);
    assert_eq!(host.restarts(), 0);
    assert!(host.boot_hook_removed());
    assert!(!fixture.config.paths.status_file.exists());
    assert!(!fixture.config.paths.catalog_file.exists());

    assert_eq!(
        shell.calls_starting_with("modprobe"),
        vec!["modprobe xia_ppal_ad", "modprobe xia_ppal_hid"]
    );
    assert_eq!(
        shell.calls_starting_with("ip link set dev veth"),
        vec![
            "ip link set dev veth-xia1 mtu 9000",
            "ip link set dev veth-xia2 mtu 9000"
        ]
    );
    assert!(!shell.calls_starting_with("xip hid showneighs").is_empty());
    assert_eq!(shell.calls_starting_with("lxc-pool destroy"), vec!["lxc-pool destroy xia 2"]);

    let results = read(&work.join("results.log"));
    assert!(results.find("exp-1").unwrap() < results.find("exp-2").unwrap());
    fixture.assert_no_writers();

    // Third boot: nothing left to do
    let shell = recording_shell();
    let host = ScriptedHost::new(0);
    let outcome = fixture
        .runner(&shell, &host, CancellationToken::new())
        .run()
        .await
        .unwrap();
    assert_eq!(outcome, RunOutcome::NothingPending);
    assert!(shell.calls().is_empty());
    assert!(host.events().is_empty());
}

#[tokio::test]
async fn test_reinvoke_policy_runs_whole_matrix() {
    let mut fixture = Fixture::new("mr-e2e-w2", 1);
    fixture.config.runtime.restart_policy = RestartPolicy::Reinvoke;

    let shell = recording_shell();
    let host = ScriptedHost::new(0);
    let outcome = fixture
        .runner(&shell, &host, CancellationToken::new())
        .run()
        .await
        .unwrap();

    assert_eq!(outcome, RunOutcome::Completed);
    assert_eq!(host.restarts(), 0);
    assert!(host.boot_hook_removed());
    assert_eq!(shell.calls_starting_with("lxc-pool create").len(), 2);
    assert_eq!(shell.calls_starting_with("lxc-pool destroy").len(), 2);
    assert!(fixture.record().is_none());
    fixture.assert_no_writers();
}

#[tokio::test]
async fn test_cancellation_tears_down_without_advancing() {
    let fixture = Fixture::new("mr-e2e-w3", 30);

    let shell = recording_shell();
    let host = ScriptedHost::new(0);
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(1500)).await;
        trigger.cancel();
    });

    let outcome = tokio::time::timeout(
        Duration::from_secs(20),
        fixture.runner(&shell, &host, cancel).run(),
    )
    .await
    .expect("cancellation was not honoured")
    .unwrap();

    assert_eq!(outcome, RunOutcome::Cancelled);
    assert_eq!(host.restarts(), 0);
    assert_eq!(fixture.record().unwrap().current, 1);
    assert!(fixture.config.paths.catalog_file.exists());

    // Whatever was provisioned was torn down again
    assert_eq!(
        shell.calls_starting_with("lxc-pool create").len(),
        shell.calls_starting_with("lxc-pool destroy").len()
    );
    fixture.assert_no_writers();
}
