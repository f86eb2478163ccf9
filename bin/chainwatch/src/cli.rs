//! Contains the chainwatch CLI and the instance supervision loop.

use crate::{
    flags::{self, LogArgs},
    server,
};
use anyhow::{Context, Result};
use chainwatch_core::{Config, Metrics, Monitor, VulnCatalogue};
use chainwatch_store::RocksHeaderStore;
use clap::Parser;
use std::{
    future::Future,
    path::{Path, PathBuf},
    sync::Arc,
    time::{Duration, SystemTime},
};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// How often the configuration file is polled for changes.
const CONFIG_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Monitors a fleet of full-node endpoints for chain consensus.
#[derive(Parser, Debug)]
#[command(name = "chainwatch", about = "Fleet monitor for Ethereum full nodes")]
pub struct Cli {
    /// Path to the TOML configuration file.
    pub config: PathBuf,

    /// Logging flags.
    #[command(flatten)]
    pub log: LogArgs,
}

/// Why a running instance wound down.
enum Outcome {
    /// The configuration file changed; restart with the new one.
    Reload(Config),
    /// SIGINT; exit cleanly.
    Shutdown,
}

impl Cli {
    /// Runs the CLI.
    pub fn run(self) -> Result<()> {
        self.log.init_tracing()?;
        let config = Config::from_file(&self.config).context("loading configuration")?;

        Self::block_on(async move {
            // The exporter binds once per process; reloads keep it in place.
            flags::init_metrics(&config.metrics)?;

            let mut current = config;
            loop {
                match self.run_instance(&current).await? {
                    Outcome::Reload(next) => {
                        info!(target: "monitor", "Configuration changed, restarting");
                        current = next;
                    }
                    Outcome::Shutdown => break,
                }
            }
            info!(target: "monitor", "Shut down cleanly");
            Ok(())
        })
    }

    /// Drives `fut` on a fresh multi-threaded runtime.
    fn block_on<F>(fut: F) -> Result<()>
    where
        F: Future<Output = Result<()>>,
    {
        tokio::runtime::Builder::new_multi_thread().enable_all().build()?.block_on(fut)
    }

    /// Runs one monitor + dashboard instance until SIGINT or a config
    /// change, then winds it down and waits for the round in progress.
    async fn run_instance(&self, config: &Config) -> Result<Outcome> {
        let store = Arc::new(
            RocksHeaderStore::open(&config.datadir.join("headers"))
                .context("opening header store")?,
        );
        let nodes = config.build_nodes(store.clone())?;
        Metrics::init(nodes.iter().map(|node| node.name()));

        let catalogue = Arc::new(
            config
                .vuln_feed
                .as_ref()
                .map_or_else(VulnCatalogue::new, |feed| VulnCatalogue::with_feed(feed.as_str())),
        );

        let mut monitor = Monitor::new(
            nodes,
            store,
            catalogue,
            config.chain_name.clone(),
            config.reload_interval,
            config.datadir.clone(),
        )
        .context("preparing artifact directories")?;

        let cancel = CancellationToken::new();
        let mut tasks: JoinSet<Result<()>> = JoinSet::new();

        {
            let cancel = cancel.clone();
            tasks.spawn(async move { monitor.run(cancel).await.map_err(Into::into) });
        }
        if !config.server_address.is_empty() {
            let addr =
                config.server_address.parse().context("parsing server_address")?;
            let webroot = config.datadir.clone();
            let cancel = cancel.clone();
            tasks.spawn(async move { server::serve(addr, webroot, cancel).await });
        }

        let mut outcome = tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!(target: "monitor", "SIGINT received, stopping");
                Ok(Outcome::Shutdown)
            }
            next = watch_config(&self.config) => Ok(Outcome::Reload(next)),
            finished = tasks.join_next() => match finished {
                Some(Ok(Err(err))) => Err(err),
                Some(Err(err)) => Err(anyhow::anyhow!("task panicked: {err}")),
                _ => {
                    warn!(target: "monitor", "Task exited unexpectedly, shutting down");
                    Ok(Outcome::Shutdown)
                }
            },
        };

        cancel.cancel();
        while let Some(finished) = tasks.join_next().await {
            match finished {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    error!(target: "monitor", %err, "Task failed during shutdown");
                    if outcome.is_ok() {
                        outcome = Err(err);
                    }
                }
                Err(err) => warn!(target: "monitor", %err, "Task join failed"),
            }
        }
        outcome
    }
}

/// Resolves once the configuration file changes to a new, valid
/// configuration. A change that fails to load is logged and ignored.
async fn watch_config(path: &Path) -> Config {
    let mut fingerprint = config_fingerprint(path);
    loop {
        tokio::time::sleep(CONFIG_POLL_INTERVAL).await;
        let next = config_fingerprint(path);
        if next == fingerprint {
            continue;
        }
        fingerprint = next;
        match Config::from_file(path) {
            Ok(config) => return config,
            Err(err) => {
                error!(target: "monitor", %err, "Rejecting changed configuration, keeping current");
            }
        }
    }
}

/// `(size, mtime)` of the config file; `None` while it is unreadable.
fn config_fingerprint(path: &Path) -> Option<(u64, SystemTime)> {
    let meta = std::fs::metadata(path).ok()?;
    Some((meta.len(), meta.modified().ok()?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_tracks_size_and_mtime() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");

        assert!(config_fingerprint(&path).is_none());

        std::fs::write(&path, "chain_name = \"a\"\n").unwrap();
        let first = config_fingerprint(&path).unwrap();

        std::fs::write(&path, "chain_name = \"ab\"\n").unwrap();
        let second = config_fingerprint(&path).unwrap();
        assert_ne!(first, second);
    }

    #[test]
    fn cli_parses_config_path() {
        let cli = Cli::parse_from(["chainwatch", "/etc/chainwatch.toml", "-v"]);
        assert_eq!(cli.config, PathBuf::from("/etc/chainwatch.toml"));
        assert_eq!(cli.log.verbosity, 1);
    }
}
