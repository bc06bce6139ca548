// packages/runner/src/main.rs
//! Matrix Runner
//!
//! Invoked once per host boot. Runs the pending experiment of the matrix,
//! advances the persisted cursor and requests the next restart.

use anyhow::{Context, Result};
use matrix_runner::observability::{init_metrics, init_tracing};
use matrix_runner::tools::host::mirror_to_kmsg;
use matrix_runner::tools::{SystemHost, SystemShell};
use matrix_runner::utils::config::{ObservabilityConfig, PathsConfig};
use matrix_runner::{BuildInfo, ExperimentRunner, RunnerConfig};
use std::process::ExitCode;
use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<ExitCode> {
    let config = match RunnerConfig::load() {
        Ok(config) => config,
        Err(e) => {
            // Tracing is not configured yet; fall back to defaults to report
            let _ = init_tracing(&ObservabilityConfig::default());
            mirror_to_kmsg(&PathsConfig::default().kmsg, &e.to_string());
            return Err(e).context("Failed to load configuration");
        }
    };

    init_tracing(&config.observability).context("Failed to initialize tracing")?;
    init_metrics(&config.observability).context("Failed to initialize metrics")?;

    info!("Starting Matrix Runner {}", BuildInfo::current());

    let cancel = CancellationToken::new();
    spawn_signal_handler(cancel.clone()).context("Failed to install signal handlers")?;

    let shell = SystemShell::new();
    let host = SystemHost::new(shell.clone(), config.tools.clone(), config.paths.kmsg.clone());
    let runner = ExperimentRunner::new(config, shell, host, cancel);

    match runner.run().await {
        Ok(outcome) => {
            info!("Runner finished: {}", outcome);
            Ok(ExitCode::SUCCESS)
        }
        Err(e) if e.is_fatal() => {
            error!("Fatal: {}", e);
            Ok(ExitCode::FAILURE)
        }
        Err(e) => {
            error!("Experiment failed: {}", e);
            Ok(ExitCode::FAILURE)
        }
    }
}

/// Cancel the running experiment on SIGINT or SIGTERM
fn spawn_signal_handler(cancel: CancellationToken) -> Result<()> {
    let mut terminate = signal(SignalKind::terminate())?;
    let mut interrupt = signal(SignalKind::interrupt())?;

    tokio::spawn(async move {
        let name = tokio::select! {
            _ = terminate.recv() => "SIGTERM",
            _ = interrupt.recv() => "SIGINT",
        };
        warn!("Received {}, draining the current experiment", name);
        cancel.cancel();
    });
    Ok(())
}
