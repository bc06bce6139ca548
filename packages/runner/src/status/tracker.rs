// packages/runner/src/status/tracker.rs
//! Status tracker: loads, validates and advances the persisted cursor
//!
//! The record is replaced atomically (temp file, fsync, rename) so a crash
//! or power cut mid-write leaves either the old or the new cursor.

use crate::status::record::StatusRecord;
use crate::tools::host::HostControl;
use crate::utils::errors::{Result, RunnerError};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

const RESULTS_DELIMITER: &str =
    "========================================================================";

/// Result of advancing the cursor
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Advance {
    /// More experiments remain; the new record was written
    Next(StatusRecord),
    /// The matrix is complete; record and catalog were deleted
    Terminal,
}

/// Owner of the status record, catalog lifetime and results log
#[derive(Debug, Clone)]
pub struct StatusTracker {
    status_path: PathBuf,
    catalog_path: PathBuf,
    results_log: PathBuf,
}

impl StatusTracker {
    /// `results_log` is relative to each record's working directory
    pub fn new(status_path: PathBuf, catalog_path: PathBuf, results_log: PathBuf) -> Self {
        Self {
            status_path,
            catalog_path,
            results_log,
        }
    }

    pub fn status_path(&self) -> &Path {
        &self.status_path
    }

    pub fn results_log_for(&self, record: &StatusRecord) -> PathBuf {
        record.work_dir.join(&self.results_log)
    }

    /// Read the record; `MissingRecord` means nothing is pending
    pub async fn load(&self) -> Result<StatusRecord> {
        let text = match fs::read_to_string(&self.status_path).await {
            Ok(text) => text,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(RunnerError::MissingRecord(self.status_path.clone()))
            }
            Err(e) => return Err(RunnerError::io(&self.status_path, e)),
        };
        StatusRecord::parse(&text, &self.status_path.display().to_string())
    }

    /// Persist `record` atomically
    pub async fn store(&self, record: &StatusRecord) -> Result<()> {
        let tmp = self.status_path.with_extension("tmp");
        let mut file = fs::File::create(&tmp)
            .await
            .map_err(|e| RunnerError::io(&tmp, e))?;
        file.write_all(record.to_text().as_bytes())
            .await
            .map_err(|e| RunnerError::io(&tmp, e))?;
        file.sync_all().await.map_err(|e| RunnerError::io(&tmp, e))?;
        drop(file);

        fs::rename(&tmp, &self.status_path)
            .await
            .map_err(|e| RunnerError::io(&self.status_path, e))?;

        if let Some(dir) = self.status_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            match fs::File::open(dir).await {
                Ok(dir) => {
                    if let Err(e) = dir.sync_all().await {
                        warn!("fsync of {:?} failed: {}", self.status_path.parent(), e);
                    }
                }
                Err(e) => warn!("Could not open {:?} for fsync: {}", self.status_path.parent(), e),
            }
        }

        debug!("Status record now at {}/{}", record.current, record.last);
        Ok(())
    }

    /// Record the completed experiment and move the cursor forward.
    ///
    /// The results log section is written first; the cursor moves last.
    pub async fn advance<H: HostControl>(
        &self,
        record: &StatusRecord,
        name: &str,
        host: &H,
    ) -> Result<Advance> {
        record.validate()?;
        self.append_results(record, name, host).await?;

        match record.next() {
            Some(next) => {
                self.store(&next).await?;
                info!("Advanced to experiment {}/{}", next.current, next.last);
                Ok(Advance::Next(next))
            }
            None => {
                self.finish(host).await?;
                info!("Experiment matrix complete ({} experiments)", record.last);
                Ok(Advance::Terminal)
            }
        }
    }

    /// Delete the record and catalog and disable the boot hook
    async fn finish<H: HostControl>(&self, host: &H) -> Result<()> {
        remove_if_exists(&self.status_path).await?;
        remove_if_exists(&self.catalog_path).await?;
        host.remove_boot_hook().await
    }

    async fn append_results<H: HostControl>(
        &self,
        record: &StatusRecord,
        name: &str,
        host: &H,
    ) -> Result<()> {
        let snapshot = match host.kernel_log().await {
            Ok(text) => text,
            Err(e) => {
                warn!("Kernel log snapshot failed: {}", e);
                format!("<kernel log unavailable: {}>\n", e)
            }
        };

        let mut section = format!(
            "{}\n{}\n# captured {}\n{}",
            RESULTS_DELIMITER,
            name,
            chrono::Utc::now().to_rfc3339(),
            snapshot
        );
        if !section.ends_with('\n') {
            section.push('\n');
        }

        let path = self.results_log_for(record);
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(|e| RunnerError::io(&path, e))?;
        file.write_all(section.as_bytes())
            .await
            .map_err(|e| RunnerError::io(&path, e))?;
        file.sync_all().await.map_err(|e| RunnerError::io(&path, e))?;
        Ok(())
    }
}

async fn remove_if_exists(path: &Path) -> Result<()> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(RunnerError::io(path, e)),
    }
}
