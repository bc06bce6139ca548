// packages/runner/src/barrier/script.rs
//! Per-container startup scripts
//!
//! Each script configures the container's address, announces readiness by
//! creating its marker, waits for the start-gate to read `1`, then `exec`s
//! the traffic-writer so the writer keeps the script's process slot and can
//! be stopped by name.

use crate::barrier::gate::BarrierState;
use crate::catalog::{ExperimentDescriptor, StackKind};
use crate::provision::container::{Container, ContainerSet, MountMap};
use crate::tools::template::{sh_quote, Vars};
use crate::utils::config::{BarrierConfig, ToolsConfig};
use crate::utils::errors::{Result, RunnerError};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;

/// Writes the startup script of every container in a set
pub struct ScriptGenerator<'a> {
    tools: &'a ToolsConfig,
    barrier: &'a BarrierConfig,
    script_dir: PathBuf,
    mounts: MountMap,
}

impl<'a> ScriptGenerator<'a> {
    pub fn new(
        tools: &'a ToolsConfig,
        barrier: &'a BarrierConfig,
        script_dir: PathBuf,
        mounts: MountMap,
    ) -> Self {
        Self {
            tools,
            barrier,
            script_dir,
            mounts,
        }
    }

    /// Host path of `container`'s script
    pub fn script_path(&self, container: &Container) -> PathBuf {
        self.script_dir.join(format!("{}.sh", container.name))
    }

    /// Write all scripts; returns their host paths in container order
    pub async fn write_all(
        &self,
        set: &ContainerSet,
        descriptor: &ExperimentDescriptor,
        state: &BarrierState,
    ) -> Result<Vec<PathBuf>> {
        fs::create_dir_all(&self.script_dir)
            .await
            .map_err(|e| RunnerError::io(&self.script_dir, e))?;

        let mut paths = Vec::with_capacity(set.len());
        for container in set.iter() {
            let text = self.render(container, set, descriptor, state)?;
            let path = self.script_path(container);
            write_executable(&path, &text).await?;
            debug!("Wrote {:?}", path);
            paths.push(path);
        }
        Ok(paths)
    }

    /// Script text for one container
    pub fn render(
        &self,
        container: &Container,
        set: &ContainerSet,
        descriptor: &ExperimentDescriptor,
        state: &BarrierState,
    ) -> Result<String> {
        let params = &descriptor.params;
        let work_dir = self.mounts.work_dir();
        let marker = self
            .mounts
            .to_container(&state.markers_dir().join(&container.marker))?;
        let gate = self.mounts.to_container(&state.gate_path())?;
        let log = self
            .mounts
            .to_container(&descriptor.writer_log(work_dir, container.index))?;

        let vars = container
            .vars()
            .with("stack", params.stack)
            .with("dest_mode", &params.dest_mode)
            .with("packet_len", params.packet_len)
            .with("zipf", params.zipf)
            // Ports plus the router itself
            .with("nodes", set.len() + 1)
            .with("trial", params.trial)
            .with("log", log.display())
            .quoted();

        let self_config = match set.stack {
            StackKind::Ip => &self.tools.ip_self_config,
            StackKind::Xia => &self.tools.xia_self_config,
        };

        let mut text = String::new();
        text.push_str("#!/bin/sh\n");
        text.push_str(&format!(
            "# {} container {} of {}\n",
            descriptor.name,
            container.index,
            set.len()
        ));
        for line in self_config {
            text.push_str(&vars.expand(line));
            text.push('\n');
        }
        text.push_str(&format!("touch {}\n", sh_quote(&marker.to_string_lossy())));
        text.push_str(&format!(
            "while [ \"$(cat {} 2>/dev/null)\" != \"1\" ]; do sleep {}; done\n",
            sh_quote(&gate.to_string_lossy()),
            sh_quote(&self.barrier.container_poll)
        ));
        text.push_str(&format!("exec {}\n", vars.expand(&self.tools.writer)));
        Ok(text)
    }
}

async fn write_executable(path: &Path, text: &str) -> Result<()> {
    let tmp = path.with_extension("sh.tmp");
    fs::write(&tmp, text)
        .await
        .map_err(|e| RunnerError::io(&tmp, e))?;
    fs::set_permissions(&tmp, std::fs::Permissions::from_mode(0o755))
        .await
        .map_err(|e| RunnerError::io(&tmp, e))?;
    fs::rename(&tmp, path)
        .await
        .map_err(|e| RunnerError::io(path, e))
}
