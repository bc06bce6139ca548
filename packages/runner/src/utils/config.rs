// packages/runner/src/utils/config.rs
//! Runner configuration
//!
//! Layered with the `config` crate:
//!
//! 1. Built-in defaults (`RunnerConfig::default()`)
//! 2. Optional file (`/etc/matrix-runner/runner.{toml,yaml,json}` or the
//!    path in `MATRIX_RUNNER_CONFIG`)
//! 3. Environment overrides, e.g. `MATRIX_RUNNER__BARRIER__POLL_INTERVAL_MS=5`
//!
//! Every component receives the pieces it needs from this value; nothing in
//! the crate reads fixed paths or the process working directory.

use crate::tools::template::CommandTemplate;
use crate::utils::errors::{Result, RunnerError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default location of the configuration file (extension optional)
pub const DEFAULT_CONFIG_PATH: &str = "/etc/matrix-runner/runner";

/// Environment variable overriding the configuration file location
pub const CONFIG_PATH_ENV: &str = "MATRIX_RUNNER_CONFIG";

/// Top-level runner configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    pub paths: PathsConfig,
    pub barrier: BarrierConfig,
    pub tools: ToolsConfig,
    pub network: NetworkConfig,
    pub runtime: RuntimeConfig,
    pub observability: ObservabilityConfig,
}

impl RunnerConfig {
    /// Load configuration from the default sources
    pub fn load() -> Result<Self> {
        let path = std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        Self::load_from(&path)
    }

    /// Load configuration layering `path` (if present) and the environment
    /// over the defaults
    pub fn load_from(path: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::Config::try_from(&RunnerConfig::default())?)
            .add_source(config::File::with_name(path).required(false))
            .add_source(
                config::Environment::with_prefix("MATRIX_RUNNER")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: RunnerConfig = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.barrier.poll_interval_ms == 0 {
            return Err(RunnerError::ConfigError(
                "barrier.poll_interval_ms must be > 0".into(),
            ));
        }
        if self.network.link_mtu == 0 {
            return Err(RunnerError::ConfigError("network.link_mtu must be > 0".into()));
        }
        if self.tools.xia_modules.len() != 2 {
            return Err(RunnerError::ConfigError(format!(
                "tools.xia_modules must name exactly two principal modules, got {}",
                self.tools.xia_modules.len()
            )));
        }
        if !self.paths.container_mount.is_absolute() {
            return Err(RunnerError::ConfigError(
                "paths.container_mount must be absolute".into(),
            ));
        }
        Ok(())
    }
}

/// Filesystem locations
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Four-line status record
    pub status_file: PathBuf,

    /// Experiment catalog (six-line blocks)
    pub catalog_file: PathBuf,

    /// Advisory lock held by the active runner
    pub lock_file: PathBuf,

    /// Kernel log device diagnostics are mirrored to
    pub kmsg: PathBuf,

    /// Cumulative results log, relative to the working directory
    pub results_log: PathBuf,

    /// Generated per-container scripts, relative to the working directory
    pub script_dir: PathBuf,

    /// Gate file and readiness markers, relative to the working directory
    pub barrier_dir: PathBuf,

    /// Where the working directory is bind-mounted inside each container
    pub container_mount: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            status_file: PathBuf::from("/var/lib/matrix-runner/status"),
            catalog_file: PathBuf::from("/var/lib/matrix-runner/experiments"),
            lock_file: PathBuf::from("/run/matrix-runner.lock"),
            kmsg: PathBuf::from("/dev/kmsg"),
            results_log: PathBuf::from("results.log"),
            script_dir: PathBuf::from("scripts"),
            barrier_dir: PathBuf::from("barrier"),
            container_mount: PathBuf::from("/mnt/experiment"),
        }
    }
}

impl PathsConfig {
    pub fn results_log_in(&self, work_dir: &Path) -> PathBuf {
        work_dir.join(&self.results_log)
    }

    pub fn script_dir_in(&self, work_dir: &Path) -> PathBuf {
        work_dir.join(&self.script_dir)
    }

    pub fn barrier_dir_in(&self, work_dir: &Path) -> PathBuf {
        work_dir.join(&self.barrier_dir)
    }
}

/// Readiness wait tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BarrierConfig {
    /// Runner-side retry interval for every readiness wait
    pub poll_interval_ms: u64,

    /// Sleep between gate reads inside the container script (seconds, as
    /// accepted by `sleep`)
    pub container_poll: String,

    /// Upper bound for waiting on scripts and logs to appear
    pub artifact_timeout_secs: Option<u64>,

    /// Upper bound for all readiness markers to appear
    pub marker_timeout_secs: Option<u64>,

    /// Upper bound for neighbor discovery
    pub discovery_timeout_secs: Option<u64>,

    /// Upper bound for the controller's `DONE` line
    pub controller_timeout_secs: Option<u64>,
}

impl Default for BarrierConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 50,
            container_poll: "0.01".to_string(),
            artifact_timeout_secs: None,
            marker_timeout_secs: None,
            discovery_timeout_secs: None,
            controller_timeout_secs: None,
        }
    }
}

impl BarrierConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn artifact_timeout(&self) -> Option<Duration> {
        self.artifact_timeout_secs.map(Duration::from_secs)
    }

    pub fn marker_timeout(&self) -> Option<Duration> {
        self.marker_timeout_secs.map(Duration::from_secs)
    }

    pub fn discovery_timeout(&self) -> Option<Duration> {
        self.discovery_timeout_secs.map(Duration::from_secs)
    }

    pub fn controller_timeout(&self) -> Option<Duration> {
        self.controller_timeout_secs.map(Duration::from_secs)
    }
}

/// Command templates for every collaborator operation
///
/// Templates are split on whitespace first and placeholders (`{name}`) are
/// substituted per argument afterwards, so substituted values never split.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    pub container_create: CommandTemplate,
    pub container_destroy: CommandTemplate,
    /// Container name for `{stack}` and `{index}`
    pub container_name: String,
    /// Host path of a container's root filesystem
    pub container_rootfs: String,
    /// Runs a generated script inside a container
    pub container_exec: CommandTemplate,

    pub bind_mount: CommandTemplate,
    pub unmount: CommandTemplate,
    pub make_dir: CommandTemplate,
    pub sysctl: CommandTemplate,

    pub addr_add: CommandTemplate,
    pub addr_del: CommandTemplate,
    pub link_up: CommandTemplate,
    pub link_mtu: CommandTemplate,

    pub module_load: CommandTemplate,
    /// The two principal modules the XIA stack depends on
    pub xia_modules: Vec<String>,
    pub hid_register: Vec<CommandTemplate>,
    pub via_register: Vec<CommandTemplate>,
    pub neighbor_list: CommandTemplate,

    /// Address self-configuration lines for IP containers
    pub ip_self_config: Vec<String>,
    /// Address self-configuration lines for XIA containers
    pub xia_self_config: Vec<String>,

    /// Traffic-writer invocation inside a container
    pub writer: String,
    /// Process name used to stop all traffic-writers
    pub writer_process_name: String,

    pub kernel_log: CommandTemplate,
    pub boot_hook_remove: CommandTemplate,
    pub restart: CommandTemplate,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            container_create: "lxc-pool create {stack} {count}".into(),
            container_destroy: "lxc-pool destroy {stack} {count}".into(),
            container_name: "{stack}{index}".into(),
            container_rootfs: "/var/lib/lxc/{name}/rootfs".into(),
            container_exec: "lxc-attach -n {name} -- /bin/sh {script}".into(),
            bind_mount: "mount --bind {source} {target}".into(),
            unmount: "umount -l {target}".into(),
            make_dir: "mkdir -p {path}".into(),
            sysctl: "sysctl -q -w {key}={value}".into(),
            addr_add: "ip addr add {addr} dev {link}".into(),
            addr_del: "ip addr del {addr} dev {link}".into(),
            link_up: "ip link set dev {link} up".into(),
            link_mtu: "ip link set dev {link} mtu {mtu}".into(),
            module_load: "modprobe {module}".into(),
            xia_modules: vec!["xia_ppal_ad".into(), "xia_ppal_hid".into()],
            hid_register: vec!["xip hid new {hid}".into(), "xip hid addlocal {hid}".into()],
            via_register: vec!["xip ad new {ad}".into(), "xip ad addlocal {ad}".into()],
            neighbor_list: "xip hid showneighs".into(),
            ip_self_config: vec![
                "ip addr add {addr}/24 dev eth0".into(),
                "ip link set dev eth0 up".into(),
                "ip route replace default via {gateway}".into(),
            ],
            xia_self_config: vec![
                "ip link set dev eth0 up".into(),
                "xip hid new {hid}".into(),
                "xip hid addlocal {hid}".into(),
            ],
            writer: "tw {stack} {dest_mode} {packet_len} {mac} {zipf} {nodes} {trial} {index} {log}"
                .into(),
            writer_process_name: "tw".into(),
            kernel_log: "dmesg".into(),
            boot_hook_remove: "systemctl disable matrix-runner.service".into(),
            restart: "systemctl reboot".into(),
        }
    }
}

/// Addressing and link settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// First two octets of the per-container /24 subnets
    pub subnet_prefix: String,

    /// Host-side bridge for container `{index}`/`{name}`
    pub bridge_name: String,

    /// Inter-container virtual link for container `{index}`/`{name}`
    pub virtual_link: String,

    /// MTU the links come up with
    pub link_mtu: u32,

    /// Local host identifier registered on XIA hosts
    pub host_hid: String,

    /// Extra address record registered for `via` destination mode
    pub via_ad: String,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            subnet_prefix: "10.0".into(),
            bridge_name: "br{index}".into(),
            virtual_link: "veth-{name}".into(),
            link_mtu: 1500,
            host_hid: "router".into(),
            via_ad: "via".into(),
        }
    }
}

/// What happens after a non-terminal experiment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RestartPolicy {
    /// Restart the host; the boot hook re-invokes the runner
    Reboot,
    /// Loop in-process against the persisted cursor
    Reinvoke,
}

/// Process and lifecycle settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub restart_policy: RestartPolicy,

    /// Refuse to start without an effective uid of 0
    pub require_root: bool,

    /// Time between SIGTERM and SIGKILL when stopping processes
    pub terminate_grace_ms: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            restart_policy: RestartPolicy::Reboot,
            require_root: true,
            terminate_grace_ms: 2000,
        }
    }
}

impl RuntimeConfig {
    pub fn terminate_grace(&self) -> Duration {
        Duration::from_millis(self.terminate_grace_ms)
    }
}

/// Logging and metrics
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Default `EnvFilter` directive when `RUST_LOG` is unset
    pub log_filter: String,

    /// Emit JSON log lines
    pub json: bool,

    /// Prometheus scrape address, e.g. `0.0.0.0:9100`
    pub metrics_addr: Option<String>,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_filter: "info".into(),
            json: false,
            metrics_addr: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = RunnerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.runtime.restart_policy, RestartPolicy::Reboot);
        assert_eq!(config.tools.xia_modules.len(), 2);
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("runner.toml");
        std::fs::write(
            &path,
            r#"
[barrier]
poll_interval_ms = 5

[runtime]
restart_policy = "reinvoke"
"#,
        )
        .unwrap();

        let config = RunnerConfig::load_from(path.to_str().unwrap()).unwrap();
        assert_eq!(config.barrier.poll_interval_ms, 5);
        assert_eq!(config.runtime.restart_policy, RestartPolicy::Reinvoke);
        // Untouched sections keep their defaults
        assert_eq!(config.network.link_mtu, 1500);
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let config = RunnerConfig::load_from("/nonexistent/matrix-runner/runner").unwrap();
        assert_eq!(config.paths.kmsg, PathBuf::from("/dev/kmsg"));
    }

    #[test]
    fn test_validation_rejects_zero_interval() {
        let mut config = RunnerConfig::default();
        config.barrier.poll_interval_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_paths_relative_to_work_dir() {
        let paths = PathsConfig::default();
        let work = Path::new("/srv/exp");
        assert_eq!(paths.results_log_in(work), PathBuf::from("/srv/exp/results.log"));
        assert_eq!(paths.barrier_dir_in(work), PathBuf::from("/srv/exp/barrier"));
    }
}
