// packages/runner/src/provision/provisioner.rs
//! Container provisioner
//!
//! Creation is all-or-nothing: if any step fails, everything done so far is
//! torn down again before the error is returned. Teardown is idempotent and
//! tolerates every individual step failing.

use crate::catalog::{DestMode, StackKind};
use crate::provision::container::ContainerSet;
use crate::tools::shell::HostShell;
use crate::tools::template::Vars;
use crate::utils::config::RunnerConfig;
use crate::utils::errors::{Result, RunnerError};
use std::io::ErrorKind;
use std::path::PathBuf;
use tokio::fs;
use tracing::{debug, info, warn};

const IP_SYSCTLS: &[(&str, &str)] = &[
    ("net.ipv4.conf.all.rp_filter", "0"),
    ("net.ipv4.conf.default.rp_filter", "0"),
    ("net.ipv4.ip_forward", "1"),
];

/// Creates and destroys per-experiment container sets
pub struct Provisioner<S> {
    shell: S,
    config: RunnerConfig,
    work_dir: PathBuf,
}

impl<S: HostShell> Provisioner<S> {
    pub fn new(shell: S, config: RunnerConfig, work_dir: PathBuf) -> Self {
        Self {
            shell,
            config,
            work_dir,
        }
    }

    /// Create `count` containers of kind `stack` and prepare the host.
    /// On failure the partial set is destroyed before returning.
    pub async fn create(
        &self,
        count: usize,
        stack: StackKind,
        dest_mode: &DestMode,
    ) -> Result<ContainerSet> {
        let set = ContainerSet::plan(count, stack, &self.config)?;
        info!("Provisioning {} {} containers", count, stack);

        if let Err(e) = self.provision(&set, dest_mode).await {
            warn!("Provisioning failed, rolling back: {}", e);
            metrics::counter!("runner_provision_rollbacks_total").increment(1);
            self.teardown(&set).await;
            return Err(e);
        }

        info!("Provisioned {} containers", set.len());
        Ok(set)
    }

    /// Tear down the set of `count` containers of kind `stack`.
    /// Safe to call on a set that is already partly or fully gone.
    pub async fn destroy(&self, count: usize, stack: StackKind) -> Result<()> {
        let set = ContainerSet::plan(count, stack, &self.config)?;
        info!("Destroying {} {} containers", count, stack);
        self.teardown(&set).await;
        Ok(())
    }

    async fn provision(&self, set: &ContainerSet, dest_mode: &DestMode) -> Result<()> {
        let tools = &self.config.tools;
        let set_vars = Vars::new()
            .with("count", set.len())
            .with("stack", set.stack);
        self.run(&tools.container_create.render(&set_vars)).await?;

        for container in set.iter() {
            let vars = container
                .vars()
                .with("path", container.mount_target.display())
                .with("source", self.work_dir.display())
                .with("target", container.mount_target.display());
            self.run(&tools.make_dir.render(&vars)).await?;
            self.run(&tools.bind_mount.render(&vars)).await?;
        }

        match set.stack {
            StackKind::Ip => {
                for (key, value) in IP_SYSCTLS {
                    let vars = Vars::new().with("key", key).with("value", value);
                    self.run(&tools.sysctl.render(&vars)).await?;
                }
                for container in set.iter() {
                    if let Some(cidr) = container.bridge_cidr() {
                        let vars = container.vars().with("addr", cidr).with("link", &container.bridge);
                        self.run(&tools.addr_add.render(&vars)).await?;
                        self.run(&tools.link_up.render(&vars)).await?;
                    }
                }
            }
            StackKind::Xia => {
                for module in &tools.xia_modules {
                    let vars = Vars::new().with("module", module);
                    self.run(&tools.module_load.render(&vars)).await?;
                }
                let vars = Vars::new()
                    .with("hid", &self.config.network.host_hid)
                    .with("ad", &self.config.network.via_ad);
                for template in &tools.hid_register {
                    self.run(&template.render(&vars)).await?;
                }
                if dest_mode.is_via() {
                    for template in &tools.via_register {
                        self.run(&template.render(&vars)).await?;
                    }
                }
            }
        }
        Ok(())
    }

    async fn teardown(&self, set: &ContainerSet) {
        let tools = &self.config.tools;
        let script_dir = self.config.paths.script_dir_in(&self.work_dir);

        for container in set.iter() {
            let script = script_dir.join(format!("{}.sh", container.name));
            match fs::remove_file(&script).await {
                Ok(()) => debug!("Removed {:?}", script),
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => warn!("Could not remove {:?}: {}", script, e),
            }
        }

        if set.stack == StackKind::Ip {
            for container in set.iter() {
                if let Some(cidr) = container.bridge_cidr() {
                    let vars = container.vars().with("addr", cidr).with("link", &container.bridge);
                    self.shell.run_tolerant(&tools.addr_del.render(&vars)).await;
                }
            }
        }

        for container in set.iter() {
            let vars = container.vars().with("target", container.mount_target.display());
            self.shell.run_tolerant(&tools.unmount.render(&vars)).await;
        }

        let set_vars = Vars::new()
            .with("count", set.len())
            .with("stack", set.stack);
        self.shell
            .run_tolerant(&tools.container_destroy.render(&set_vars))
            .await;
    }

    async fn run(&self, argv: &[String]) -> Result<String> {
        if argv.is_empty() {
            return Err(RunnerError::ConfigError("empty command template".into()));
        }
        self.shell.run(argv).await
    }
}
