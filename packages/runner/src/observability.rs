// packages/runner/src/observability.rs
//! Logging and metrics setup

use crate::utils::config::ObservabilityConfig;
use crate::utils::errors::{Result, RunnerError};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

/// Install the global tracing subscriber. `RUST_LOG` wins over the
/// configured filter.
pub fn init_tracing(config: &ObservabilityConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_filter))
        .map_err(|e| RunnerError::ConfigError(format!("invalid log filter: {}", e)))?;

    let builder = fmt().with_env_filter(filter).with_target(true);
    let result = if config.json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    result.map_err(|e| RunnerError::ConfigError(format!("tracing init failed: {}", e)))
}

/// Install the Prometheus exporter when a scrape address is configured.
/// Without one, metric macros are no-ops.
pub fn init_metrics(config: &ObservabilityConfig) -> Result<()> {
    let addr = match &config.metrics_addr {
        Some(addr) => addr,
        None => return Ok(()),
    };
    let addr: SocketAddr = addr.parse().map_err(|_| {
        RunnerError::ConfigError(format!("invalid observability.metrics_addr '{}'", addr))
    })?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| RunnerError::ConfigError(format!("metrics exporter failed: {}", e)))?;
    info!("Serving metrics on {}", addr);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_disabled_by_default() {
        assert!(init_metrics(&ObservabilityConfig::default()).is_ok());
    }

    #[test]
    fn test_bad_metrics_addr() {
        let config = ObservabilityConfig {
            metrics_addr: Some("not an address".into()),
            ..Default::default()
        };
        assert!(matches!(
            init_metrics(&config),
            Err(RunnerError::ConfigError(_))
        ));
    }
}
