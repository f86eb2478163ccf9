//! JSON-RPC [`HeaderSource`] over HTTP.

use crate::{BadBlockArgs, HeaderSource, SourceError, traits::check_number};
use alloy_eips::BlockNumberOrTag;
use alloy_rpc_client::RpcClient;
use alloy_rpc_types_eth::Header;
use alloy_transport::RpcError;
use alloy_transport_http::Http;
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use std::time::Duration;
use tracing::debug;
use url::Url;

/// Per-call timeout. The monitor relies on sources owning their deadlines.
const CALL_TIMEOUT: Duration = Duration::from_secs(3);

/// A plain Ethereum JSON-RPC endpoint.
///
/// Speaks `web3_clientVersion`, `eth_getBlockByNumber` and
/// `debug_getBadBlocks`. Endpoints without the debug namespace simply report
/// an empty bad block set.
#[derive(Debug)]
pub struct RpcSource {
    client: RpcClient,
    url: Url,
}

impl RpcSource {
    /// Connects to `url`, attaching `auth_headers` to every request.
    pub fn new(url: Url, auth_headers: &[(String, String)]) -> Result<Self, SourceError> {
        let mut headers = HeaderMap::new();
        for (name, value) in auth_headers {
            let name = name
                .parse::<HeaderName>()
                .map_err(|err| SourceError::Malformed(format!("auth header name: {err}")))?;
            let value = HeaderValue::from_str(value)
                .map_err(|err| SourceError::Malformed(format!("auth header value: {err}")))?;
            headers.insert(name, value);
        }

        let http_client = reqwest::Client::builder()
            .timeout(CALL_TIMEOUT)
            .default_headers(headers)
            .build()?;
        let transport = Http::with_client(http_client, url.clone());
        let client = RpcClient::new(transport, false);

        Ok(Self { client, url })
    }

    /// The endpoint this source talks to.
    pub const fn url(&self) -> &Url {
        &self.url
    }
}

#[async_trait]
impl HeaderSource for RpcSource {
    async fn version(&self) -> Result<String, SourceError> {
        let version: String = self.client.request_noparams("web3_clientVersion").await?;
        Ok(version)
    }

    async fn header_by_number(&self, number: BlockNumberOrTag) -> Result<Header, SourceError> {
        let header: Option<Header> =
            self.client.request("eth_getBlockByNumber", (number, false)).await?;
        let header = header.ok_or_else(|| SourceError::MissingHeader(number.to_string()))?;
        check_number(number, header)
    }

    async fn bad_blocks(&self) -> Result<Vec<BadBlockArgs>, SourceError> {
        match self.client.request_noparams::<Vec<BadBlockArgs>>("debug_getBadBlocks").await {
            Ok(blocks) => Ok(blocks),
            // Endpoints without the debug namespace answer with an RPC error,
            // not a transport failure.
            Err(RpcError::ErrorResp(payload)) => {
                debug!(target: "monitor::source", url = %self.url, code = payload.code, "debug_getBadBlocks unavailable");
                Ok(Vec::new())
            }
            Err(err) => Err(err.into()),
        }
    }
}
