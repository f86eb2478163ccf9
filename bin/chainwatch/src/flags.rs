//! CLI flags and telemetry bootstrap.

use anyhow::Result;
use chainwatch_core::MetricsConfig;
use clap::{ArgAction, Args};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Logging flags.
#[derive(Args, Debug, Clone)]
pub struct LogArgs {
    /// Increases log verbosity (-v debug, -vv trace).
    #[arg(long = "verbose", short = 'v', action = ArgAction::Count)]
    pub verbosity: u8,
}

impl LogArgs {
    /// Initializes the tracing subscriber. `RUST_LOG` still takes
    /// precedence over the verbosity flags.
    pub fn init_tracing(&self) -> Result<()> {
        let level = match self.verbosity {
            0 => tracing::Level::INFO,
            1 => tracing::Level::DEBUG,
            _ => tracing::Level::TRACE,
        };
        let filter = EnvFilter::from_default_env().add_directive(level.into());
        tracing_subscriber::fmt().with_env_filter(filter).try_init().map_err(|err| {
            anyhow::anyhow!("failed to initialize tracing subscriber: {err}")
        })?;
        Ok(())
    }
}

/// Starts the Prometheus exporter when enabled in the configuration.
///
/// Installed once per process; configuration reloads do not move the
/// exporter.
pub fn init_metrics(config: &MetricsConfig) -> Result<()> {
    if !config.enabled {
        return Ok(());
    }
    let addr: SocketAddr = config.endpoint.parse()?;
    let mut builder = PrometheusBuilder::new().with_http_listener(addr);
    if !config.namespace.is_empty() {
        builder = builder.add_global_label("namespace", config.namespace.clone());
    }
    builder.install()?;
    info!(target: "monitor::metrics", %addr, "Prometheus exporter listening");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser, Debug)]
    struct MockCommand {
        #[command(flatten)]
        log: LogArgs,
    }

    #[test]
    fn verbosity_accumulates() {
        let cmd = MockCommand::parse_from(["test"]);
        assert_eq!(cmd.log.verbosity, 0);

        let cmd = MockCommand::parse_from(["test", "-vv"]);
        assert_eq!(cmd.log.verbosity, 2);
    }

    #[test]
    fn disabled_metrics_are_a_no_op() {
        init_metrics(&MetricsConfig::default()).unwrap();
    }
}
