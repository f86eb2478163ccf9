//! Etherscan-style REST [`HeaderSource`].

use crate::{BadBlockArgs, HeaderSource, SourceError, traits::check_number};
use alloy_eips::BlockNumberOrTag;
use alloy_rpc_types_eth::Header;
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use url::Url;

const CALL_TIMEOUT: Duration = Duration::from_secs(3);

/// The REST envelope Etherscan wraps around proxied RPC results.
#[derive(Debug, Deserialize)]
struct ProxyEnvelope {
    #[serde(default)]
    result: Option<Header>,
}

/// An Etherscan-like REST endpoint encapsulating `eth_getBlockByNumber`.
///
/// The proxy exposes no client version and no debug namespace.
#[derive(Debug)]
pub struct EtherscanSource {
    client: reqwest::Client,
    endpoint: Url,
    api_key: String,
}

impl EtherscanSource {
    /// Creates a source against `endpoint` (e.g. `https://api.etherscan.io/api`).
    pub fn new(endpoint: Url, api_key: String) -> Result<Self, SourceError> {
        let client = reqwest::Client::builder().timeout(CALL_TIMEOUT).build()?;
        Ok(Self { client, endpoint, api_key })
    }

    fn tag(number: BlockNumberOrTag) -> String {
        match number {
            BlockNumberOrTag::Number(n) => format!("{n:#x}"),
            other => other.to_string(),
        }
    }
}

#[async_trait]
impl HeaderSource for EtherscanSource {
    async fn version(&self) -> Result<String, SourceError> {
        Ok("Etherscan".to_string())
    }

    async fn header_by_number(&self, number: BlockNumberOrTag) -> Result<Header, SourceError> {
        let tag = Self::tag(number);
        let response = self
            .client
            .get(self.endpoint.clone())
            .query(&[
                ("module", "proxy"),
                ("action", "eth_getBlockByNumber"),
                ("tag", tag.as_str()),
                ("boolean", "false"),
                ("apikey", self.api_key.as_str()),
            ])
            .send()
            .await?
            .error_for_status()?;

        let envelope: ProxyEnvelope = response.json().await?;
        let header = envelope.result.ok_or_else(|| SourceError::MissingHeader(number.to_string()))?;
        check_number(number, header)
    }

    async fn bad_blocks(&self) -> Result<Vec<BadBlockArgs>, SourceError> {
        Ok(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_tags_are_hex_encoded() {
        assert_eq!(EtherscanSource::tag(BlockNumberOrTag::Number(13_000_000)), "0xc65d40");
        assert_eq!(EtherscanSource::tag(BlockNumberOrTag::Latest), "latest");
    }
}
