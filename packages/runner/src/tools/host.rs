// packages/runner/src/tools/host.rs
//! Host-level operations: privilege, kernel log, boot hook, restart

use crate::tools::shell::HostShell;
use crate::tools::template::Vars;
use crate::utils::config::ToolsConfig;
use crate::utils::errors::Result;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Prefix for lines written to the kernel ring buffer
pub const KMSG_TAG: &str = "matrix-runner";

/// Host operations the runner depends on
#[allow(async_fn_in_trait)]
pub trait HostControl {
    /// Effective user id of the runner
    fn effective_uid(&self) -> u32;

    /// Mirror a diagnostic into the kernel log so it survives the restart
    fn mirror(&self, message: &str);

    /// Snapshot of the kernel log buffer
    async fn kernel_log(&self) -> Result<String>;

    /// Disable the boot-integration hook that re-invokes the runner
    async fn remove_boot_hook(&self) -> Result<()>;

    /// Request a host restart
    async fn restart(&self) -> Result<()>;
}

/// Write one tagged line to the kernel log device. Failures are only logged.
pub fn mirror_to_kmsg(kmsg: &Path, message: &str) {
    let line = format!("{}: {}\n", KMSG_TAG, message);
    let result = OpenOptions::new()
        .write(true)
        .open(kmsg)
        .and_then(|mut f| f.write_all(line.as_bytes()));
    if let Err(e) = result {
        warn!("Could not mirror diagnostic to {:?}: {}", kmsg, e);
    }
}

/// The real host, reached through a [`HostShell`]
pub struct SystemHost<S> {
    shell: S,
    tools: ToolsConfig,
    kmsg: PathBuf,
}

impl<S: HostShell> SystemHost<S> {
    pub fn new(shell: S, tools: ToolsConfig, kmsg: PathBuf) -> Self {
        Self { shell, tools, kmsg }
    }
}

impl<S: HostShell> HostControl for SystemHost<S> {
    fn effective_uid(&self) -> u32 {
        nix::unistd::geteuid().as_raw()
    }

    fn mirror(&self, message: &str) {
        mirror_to_kmsg(&self.kmsg, message);
    }

    async fn kernel_log(&self) -> Result<String> {
        self.shell.run(&self.tools.kernel_log.render(&Vars::new())).await
    }

    async fn remove_boot_hook(&self) -> Result<()> {
        info!("Removing boot hook");
        self.shell
            .run(&self.tools.boot_hook_remove.render(&Vars::new()))
            .await?;
        Ok(())
    }

    async fn restart(&self) -> Result<()> {
        info!("Requesting host restart");
        self.mirror("restarting host for next experiment");
        self.shell.run(&self.tools.restart.render(&Vars::new())).await?;
        Ok(())
    }
}
