// packages/runner/src/runner/manifest.rs
//! Per-experiment manifest written next to the experiment's logs

use crate::catalog::ExperimentDescriptor;
use crate::provision::container::ContainerSet;
use crate::runner::state::RunnerState;
use crate::utils::errors::{Result, RunnerError};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::Path;
use std::time::Duration;
use tokio::fs;
use ulid::Ulid;

pub const MANIFEST_FILE: &str = "manifest.json";

#[derive(Debug, Clone, Serialize)]
pub struct Transition {
    pub state: RunnerState,
    pub at: DateTime<Utc>,
}

/// Everything needed to tell later what one run did
#[derive(Debug, Clone, Serialize)]
pub struct Manifest {
    pub run_id: Ulid,
    pub runner_version: String,
    pub host: Option<String>,
    pub experiment: ExperimentDescriptor,
    pub duration_secs: u64,
    pub containers: Option<ContainerSet>,
    pub transitions: Vec<Transition>,
    pub barrier_wait_ms: Option<u128>,
    pub controller_ready_ms: Option<u128>,
    pub outcome: Option<String>,
    pub error: Option<String>,
}

impl Manifest {
    pub fn new(run_id: Ulid, experiment: ExperimentDescriptor, duration: Duration) -> Self {
        let host = nix::unistd::gethostname()
            .ok()
            .and_then(|name| name.into_string().ok());
        Self {
            run_id,
            runner_version: crate::VERSION.to_string(),
            host,
            experiment,
            duration_secs: duration.as_secs(),
            containers: None,
            transitions: vec![Transition {
                state: RunnerState::Init,
                at: Utc::now(),
            }],
            barrier_wait_ms: None,
            controller_ready_ms: None,
            outcome: None,
            error: None,
        }
    }

    pub fn state(&self) -> RunnerState {
        self.transitions
            .last()
            .map_or(RunnerState::Init, |t| t.state)
    }

    pub fn enter(&mut self, state: RunnerState) {
        self.transitions.push(Transition {
            state,
            at: Utc::now(),
        });
    }

    pub fn fail(&mut self, error: &RunnerError) {
        self.error = Some(error.to_string());
    }

    /// Write `manifest.json` into `log_dir`
    pub async fn write(&self, log_dir: &Path) -> Result<()> {
        fs::create_dir_all(log_dir)
            .await
            .map_err(|e| RunnerError::io(log_dir, e))?;
        let path = log_dir.join(MANIFEST_FILE);
        let tmp = log_dir.join(format!("{}.tmp", MANIFEST_FILE));
        let json = serde_json::to_vec_pretty(self)
            .map_err(|e| RunnerError::parse(MANIFEST_FILE, e.to_string()))?;
        fs::write(&tmp, json)
            .await
            .map_err(|e| RunnerError::io(&tmp, e))?;
        fs::rename(&tmp, &path)
            .await
            .map_err(|e| RunnerError::io(&path, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Parameters;
    use std::path::PathBuf;

    fn descriptor() -> ExperimentDescriptor {
        ExperimentDescriptor {
            seq: 2,
            generator_cmd: "gen".into(),
            controller_cmd: "rk ip 0 2".into(),
            params: Parameters::parse_line("ip dst 0 64 0.5 2 2").unwrap(),
            name: "ip-dst-64".into(),
            log_dir: PathBuf::from("logs/ip-dst-64"),
        }
    }

    #[tokio::test]
    async fn test_write_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let mut manifest = Manifest::new(Ulid::new(), descriptor(), Duration::from_secs(5));
        manifest.enter(RunnerState::Provisioned);
        manifest.outcome = Some("advanced".into());
        assert_eq!(manifest.state(), RunnerState::Provisioned);

        let log_dir = dir.path().join("logs");
        manifest.write(&log_dir).await.unwrap();

        let text = std::fs::read_to_string(log_dir.join(MANIFEST_FILE)).unwrap();
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["experiment"]["seq"], 2);
        assert_eq!(value["duration_secs"], 5);
        assert_eq!(value["transitions"][1]["state"], "PROVISIONED");
        assert_eq!(value["outcome"], "advanced");
        assert!(value["error"].is_null());
    }
}
