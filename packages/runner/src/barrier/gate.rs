// packages/runner/src/barrier/gate.rs
//! On-disk barrier state shared with the containers
//!
//! ```text
//! <work>/barrier/gate          "0" or "1"
//! <work>/barrier/ready/<marker> one empty file per ready container
//! ```
//!
//! The working directory is bind-mounted into every container, so the
//! containers see the same files. The gate is replaced by rename, never
//! rewritten in place, so a reader never observes a partial value.

use crate::utils::errors::{Result, RunnerError};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;

/// Shared start-gate plus readiness markers
#[derive(Debug, Clone)]
pub struct BarrierState {
    dir: PathBuf,
}

impl BarrierState {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    pub fn gate_path(&self) -> PathBuf {
        self.dir.join("gate")
    }

    pub fn markers_dir(&self) -> PathBuf {
        self.dir.join("ready")
    }

    /// Close the gate and start from an empty marker set
    pub async fn prepare(&self) -> Result<()> {
        let markers = self.markers_dir();
        fs::create_dir_all(&markers)
            .await
            .map_err(|e| RunnerError::io(&markers, e))?;
        self.clear_markers().await?;
        self.set_gate(false).await
    }

    pub async fn set_gate(&self, open: bool) -> Result<()> {
        let gate = self.gate_path();
        let tmp = self.dir.join("gate.tmp");
        fs::write(&tmp, if open { "1\n" } else { "0\n" })
            .await
            .map_err(|e| RunnerError::io(&tmp, e))?;
        fs::rename(&tmp, &gate)
            .await
            .map_err(|e| RunnerError::io(&gate, e))?;
        debug!("Gate set to {}", open as u8);
        Ok(())
    }

    /// Whether the gate currently reads `1`. A missing gate is closed.
    pub async fn gate_open(&self) -> Result<bool> {
        let gate = self.gate_path();
        match fs::read_to_string(&gate).await {
            Ok(value) => Ok(value.trim() == "1"),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(RunnerError::io(&gate, e)),
        }
    }

    pub async fn count_markers(&self) -> Result<usize> {
        let markers = self.markers_dir();
        let mut entries = match fs::read_dir(&markers).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(RunnerError::io(&markers, e)),
        };

        let mut count = 0;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| RunnerError::io(&markers, e))?
        {
            if !entry.file_name().to_string_lossy().starts_with('.') {
                count += 1;
            }
        }
        Ok(count)
    }

    pub async fn clear_markers(&self) -> Result<()> {
        let markers = self.markers_dir();
        let mut entries = match fs::read_dir(&markers).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(RunnerError::io(&markers, e)),
        };

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| RunnerError::io(&markers, e))?
        {
            remove(&entry.path()).await?;
        }
        Ok(())
    }
}

async fn remove(path: &Path) -> Result<()> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(RunnerError::io(path, e)),
    }
}
