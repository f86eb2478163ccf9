//! Monitor configuration: the TOML file handed to the binary.

use crate::NodeView;
use chainwatch_sources::{
    BrokenSource, EtherscanSource, HeaderSource, RpcSource, SourceError, TestChainSource,
};
use chainwatch_store::HeaderStore;
use serde::Deserialize;
use std::{collections::BTreeMap, fs, path::{Path, PathBuf}, sync::Arc, time::Duration};
use url::Url;

/// Errors raised while loading or applying configuration. All of these are
/// fatal at startup.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    /// The file is not valid TOML for this schema.
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// The file parsed but describes an unusable setup.
    #[error("invalid config: {0}")]
    Invalid(String),

    /// A client URL failed to parse.
    #[error("invalid url for client {client}: {source}")]
    Url {
        /// Offending client name.
        client: String,
        /// Parser error.
        source: url::ParseError,
    },

    /// A source could not be constructed.
    #[error(transparent)]
    Source(#[from] SourceError),
}

/// Top-level configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Interval between monitoring rounds.
    #[serde(with = "humantime_serde", default = "default_reload_interval")]
    pub reload_interval: Duration,

    /// Listen address of the dashboard; empty disables it.
    #[serde(default)]
    pub server_address: String,

    /// Chain label used in the report.
    #[serde(default = "default_chain_name")]
    pub chain_name: String,

    /// Root directory for artifacts and the header store.
    #[serde(default = "default_datadir")]
    pub datadir: PathBuf,

    /// Infura project key.
    #[serde(default)]
    pub infura_key: String,
    /// Infura endpoint the key is appended to.
    #[serde(default = "default_infura_endpoint")]
    pub infura_endpoint: String,

    /// Alchemy API key.
    #[serde(default)]
    pub alchemy_key: String,
    /// Alchemy endpoint the key is appended to.
    #[serde(default = "default_alchemy_endpoint")]
    pub alchemy_endpoint: String,

    /// Etherscan API key.
    #[serde(default)]
    pub etherscan_key: String,
    /// Etherscan REST endpoint.
    #[serde(default = "default_etherscan_endpoint")]
    pub etherscan_endpoint: String,

    /// Overrides the vulnerability feed URL.
    #[serde(default)]
    pub vuln_feed: Option<String>,

    /// Metrics exporter settings.
    #[serde(default)]
    pub metrics: MetricsConfig,

    /// The monitored fleet.
    #[serde(default)]
    pub clients: Vec<ClientEntry>,
}

/// Metrics exporter settings.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Whether the exporter is started.
    pub enabled: bool,
    /// Listen address of the exporter.
    pub endpoint: String,
    /// Accepted for compatibility with push-style sinks; unused.
    pub database: String,
    /// Accepted for compatibility with push-style sinks; unused.
    pub username: String,
    /// Accepted for compatibility with push-style sinks; unused.
    pub password: String,
    /// Metric name prefix.
    pub namespace: String,
}

/// One monitored endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientEntry {
    /// Unique display name.
    pub name: String,
    /// Endpoint flavour.
    pub kind: ClientKind,
    /// Endpoint URL; required for `rpc`, optional override elsewhere.
    #[serde(default)]
    pub url: String,
    /// Outbound operations per second; zero means unlimited.
    #[serde(default)]
    pub ratelimit: u32,
    /// Static headers attached to every request.
    #[serde(default)]
    pub auth_headers: BTreeMap<String, String>,
}

/// Endpoint flavours.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ClientKind {
    /// Plain JSON-RPC endpoint.
    Rpc,
    /// Infura, addressed by project key.
    Infura,
    /// Alchemy, addressed by API key.
    Alchemy,
    /// Etherscan REST proxy.
    Etherscan,
    /// Deterministic canonical test chain.
    TestnodeCanon,
    /// Test chain stuck long ago on an old fork.
    TestnodeForkOld,
    /// Test chain stuck shortly after a recent fork.
    TestnodeForkRecent,
    /// Endpoint that always fails; for exercising unreachable handling.
    Broken,
}

impl Config {
    /// Loads and validates the configuration at `path`.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path)?;
        let config: Self = toml::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.clients.is_empty() {
            return Err(ConfigError::Invalid("no clients configured".to_string()));
        }
        let mut names = std::collections::HashSet::new();
        for client in &self.clients {
            if client.name.is_empty() {
                return Err(ConfigError::Invalid("client with empty name".to_string()));
            }
            if !names.insert(client.name.as_str()) {
                return Err(ConfigError::Invalid(format!("duplicate client name {}", client.name)));
            }
            if client.kind == ClientKind::Rpc && client.url.is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "client {} of kind rpc needs a url",
                    client.name
                )));
            }
        }
        Ok(())
    }

    /// Builds one [`NodeView`] per configured client, all sharing `store`.
    pub fn build_nodes(
        &self,
        store: Arc<dyn HeaderStore>,
    ) -> Result<Vec<Arc<NodeView>>, ConfigError> {
        self.clients
            .iter()
            .map(|client| {
                let source = self.build_source(client)?;
                Ok(Arc::new(NodeView::new(&client.name, source, store.clone(), client.ratelimit)))
            })
            .collect()
    }

    fn build_source(&self, client: &ClientEntry) -> Result<Arc<dyn HeaderSource>, ConfigError> {
        let headers: Vec<(String, String)> = client
            .auth_headers
            .iter()
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect();

        let source: Arc<dyn HeaderSource> = match client.kind {
            ClientKind::Rpc => {
                Arc::new(RpcSource::new(parse_url(&client.name, &client.url)?, &headers)?)
            }
            ClientKind::Infura => {
                let url = keyed_url(&client.url, &self.infura_endpoint, &self.infura_key);
                Arc::new(RpcSource::new(parse_url(&client.name, &url)?, &headers)?)
            }
            ClientKind::Alchemy => {
                let url = keyed_url(&client.url, &self.alchemy_endpoint, &self.alchemy_key);
                Arc::new(RpcSource::new(parse_url(&client.name, &url)?, &headers)?)
            }
            ClientKind::Etherscan => {
                let endpoint = if client.url.is_empty() {
                    self.etherscan_endpoint.clone()
                } else {
                    client.url.clone()
                };
                Arc::new(EtherscanSource::new(
                    parse_url(&client.name, &endpoint)?,
                    self.etherscan_key.clone(),
                )?)
            }
            ClientKind::TestnodeCanon => Arc::new(TestChainSource::canon()),
            ClientKind::TestnodeForkOld => Arc::new(TestChainSource::fork_old()),
            ClientKind::TestnodeForkRecent => Arc::new(TestChainSource::fork_recent()),
            ClientKind::Broken => Arc::new(BrokenSource),
        };
        Ok(source)
    }
}

fn parse_url(client: &str, raw: &str) -> Result<Url, ConfigError> {
    Url::parse(raw).map_err(|source| ConfigError::Url { client: client.to_string(), source })
}

fn keyed_url(override_url: &str, endpoint: &str, key: &str) -> String {
    if override_url.is_empty() { format!("{endpoint}{key}") } else { override_url.to_string() }
}

const fn default_reload_interval() -> Duration {
    Duration::from_secs(10)
}

fn default_chain_name() -> String {
    "mainnet".to_string()
}

fn default_datadir() -> PathBuf {
    PathBuf::from("./chainwatch-data")
}

fn default_infura_endpoint() -> String {
    "https://mainnet.infura.io/v3/".to_string()
}

fn default_alchemy_endpoint() -> String {
    "https://eth-mainnet.g.alchemy.com/v2/".to_string()
}

fn default_etherscan_endpoint() -> String {
    "https://api.etherscan.io/api".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chainwatch_store::MemoryHeaderStore;

    const SAMPLE: &str = r#"
reload_interval = "15s"
server_address = "127.0.0.1:8080"
chain_name = "ropsten"
etherscan_key = "SOMEKEY"

[metrics]
enabled = true
endpoint = "127.0.0.1:9300"
namespace = "chainwatch"

[[clients]]
name = "mainnet-geth"
kind = "rpc"
url = "http://127.0.0.1:8545"
ratelimit = 10

[[clients]]
name = "scan"
kind = "etherscan"

[[clients]]
name = "testnode"
kind = "testnode-fork-old"

[clients.auth_headers]
x-api-token = "secret"
"#;

    #[test]
    fn parses_recognized_keys() {
        let config: Config = toml::from_str(SAMPLE).unwrap();
        assert_eq!(config.reload_interval, Duration::from_secs(15));
        assert_eq!(config.server_address, "127.0.0.1:8080");
        assert_eq!(config.chain_name, "ropsten");
        assert!(config.metrics.enabled);
        assert_eq!(config.clients.len(), 3);
        assert_eq!(config.clients[0].kind, ClientKind::Rpc);
        assert_eq!(config.clients[0].ratelimit, 10);
        assert_eq!(config.clients[1].kind, ClientKind::Etherscan);
        assert_eq!(config.clients[2].kind, ClientKind::TestnodeForkOld);
        assert_eq!(
            config.clients[2].auth_headers.get("x-api-token").map(String::as_str),
            Some("secret")
        );
        config.validate().unwrap();
    }

    #[test]
    fn defaults_apply() {
        let config: Config = toml::from_str("clients = []").unwrap();
        assert_eq!(config.reload_interval, Duration::from_secs(10));
        assert_eq!(config.chain_name, "mainnet");
        assert_eq!(config.etherscan_endpoint, "https://api.etherscan.io/api");
    }

    #[test]
    fn rejects_duplicate_names() {
        let raw = r#"
[[clients]]
name = "a"
kind = "testnode-canon"

[[clients]]
name = "a"
kind = "broken"
"#;
        let config: Config = toml::from_str(raw).unwrap();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn rejects_rpc_without_url() {
        let raw = r#"
[[clients]]
name = "a"
kind = "rpc"
"#;
        let config: Config = toml::from_str(raw).unwrap();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn builds_test_fleet() {
        let raw = r#"
[[clients]]
name = "canon"
kind = "testnode-canon"

[[clients]]
name = "dead"
kind = "broken"
"#;
        let config: Config = toml::from_str(raw).unwrap();
        let nodes = config.build_nodes(Arc::new(MemoryHeaderStore::new())).unwrap();
        assert_eq!(nodes.len(), 2);
        assert_eq!(nodes[0].name(), "canon");
    }
}
