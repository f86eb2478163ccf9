//! Catalogue of known client vulnerabilities, matched by version regex.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::{sync::RwLock, time::Instant};
use tracing::{debug, warn};

/// How long a fetched catalogue stays fresh.
const REFRESH_INTERVAL: Duration = Duration::from_secs(10 * 60);
/// Per-refresh HTTP deadline; there is no retry within a round.
const FETCH_TIMEOUT: Duration = Duration::from_secs(1);
/// Default vulnerability feed.
const DEFAULT_FEED: &str = "https://geth.ethereum.org/docs/vulnerabilities/vulnerabilities.json";

/// One disclosed vulnerability. The `check` field is a regular expression
/// matched against a node's raw version string.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Vulnerability {
    /// Stable identifier of the advisory.
    pub uid: String,
    /// Advisory name.
    pub name: String,
    /// Short summary.
    pub summary: String,
    /// Long-form description.
    pub description: String,
    /// Severity label.
    pub severity: String,
    /// CVE identifier, when assigned.
    #[serde(rename = "CVE")]
    pub cve: String,
    /// Publication date.
    pub published: String,
    /// First affected version.
    pub introduced: String,
    /// First fixed version.
    pub fixed: String,
    /// Related links.
    pub links: Vec<String>,
    /// Version-matching regular expression.
    pub check: String,
}

/// Errors from catalogue refresh.
#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    /// The feed could not be fetched.
    #[error("vulnerability feed fetch failed: {0}")]
    Fetch(#[from] reqwest::Error),

    /// An entry's `check` field failed to compile; the refresh is aborted.
    #[error("invalid check regex in entry {uid}: {source}")]
    InvalidCheck {
        /// Entry whose pattern failed.
        uid: String,
        /// Compiler error.
        source: regex::Error,
    },
}

#[derive(Debug)]
struct CatalogState {
    entries: Vec<(Vulnerability, Regex)>,
    last_refresh: Option<Instant>,
}

/// Periodically refreshed vulnerability list.
///
/// An explicit instance rather than a hidden global; the monitor owns one and
/// shares it. Refresh failures keep serving the previous snapshot.
#[derive(Debug)]
pub struct VulnCatalogue {
    client: Option<reqwest::Client>,
    feed: String,
    disable_fetch: bool,
    state: RwLock<CatalogState>,
}

impl VulnCatalogue {
    /// A catalogue refreshing from the default feed.
    pub fn new() -> Self {
        Self::with_feed(DEFAULT_FEED)
    }

    /// A catalogue refreshing from `feed`.
    pub fn with_feed(feed: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::builder().timeout(FETCH_TIMEOUT).build().ok(),
            feed: feed.into(),
            disable_fetch: false,
            state: RwLock::new(CatalogState { entries: Vec::new(), last_refresh: None }),
        }
    }

    /// A catalogue that never fetches; for tests.
    pub fn disabled() -> Self {
        Self {
            client: None,
            feed: String::new(),
            disable_fetch: true,
            state: RwLock::new(CatalogState { entries: Vec::new(), last_refresh: None }),
        }
    }

    /// Seeds entries directly, bypassing the fetch; for tests.
    pub async fn seed(&self, entries: Vec<Vulnerability>) -> Result<(), CatalogError> {
        let compiled = compile(entries)?;
        let mut state = self.state.write().await;
        state.entries = compiled;
        state.last_refresh = Some(Instant::now());
        Ok(())
    }

    /// Every catalogue entry whose regex matches `version`.
    ///
    /// Triggers a refresh when the cache is older than ten minutes; a failed
    /// refresh logs and falls back to the stale snapshot.
    pub async fn check(&self, version: &str) -> Vec<Vulnerability> {
        self.refresh_if_stale().await;
        let state = self.state.read().await;
        state
            .entries
            .iter()
            .filter(|(_, regex)| regex.is_match(version))
            .map(|(entry, _)| entry.clone())
            .collect()
    }

    /// Looks up a single entry by uid.
    pub async fn get(&self, uid: &str) -> Option<Vulnerability> {
        let state = self.state.read().await;
        state.entries.iter().find(|(entry, _)| entry.uid == uid).map(|(entry, _)| entry.clone())
    }

    async fn refresh_if_stale(&self) {
        if self.disable_fetch {
            return;
        }
        {
            let state = self.state.read().await;
            if state.last_refresh.is_some_and(|at| at.elapsed() < REFRESH_INTERVAL) {
                return;
            }
        }
        let mut state = self.state.write().await;
        if state.last_refresh.is_some_and(|at| at.elapsed() < REFRESH_INTERVAL) {
            return;
        }
        // Stamp before fetching so a failing feed is retried at most once per
        // interval, not once per check.
        state.last_refresh = Some(Instant::now());
        match self.fetch().await {
            Ok(entries) => {
                debug!(target: "monitor::vulns", count = entries.len(), "Vulnerability catalogue refreshed");
                state.entries = entries;
            }
            Err(err) => {
                warn!(target: "monitor::vulns", %err, "Catalogue refresh failed, keeping previous snapshot");
            }
        }
    }

    async fn fetch(&self) -> Result<Vec<(Vulnerability, Regex)>, CatalogError> {
        let Some(client) = &self.client else {
            return Ok(Vec::new());
        };
        let entries: Vec<Vulnerability> =
            client.get(&self.feed).send().await?.error_for_status()?.json().await?;
        compile(entries)
    }
}

impl Default for VulnCatalogue {
    fn default() -> Self {
        Self::new()
    }
}

fn compile(entries: Vec<Vulnerability>) -> Result<Vec<(Vulnerability, Regex)>, CatalogError> {
    entries
        .into_iter()
        .map(|entry| {
            let regex = Regex::new(&entry.check)
                .map_err(|source| CatalogError::InvalidCheck { uid: entry.uid.clone(), source })?;
            Ok((entry, regex))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn advisory(uid: &str, check: &str) -> Vulnerability {
        Vulnerability { uid: uid.to_string(), check: check.to_string(), ..Default::default() }
    }

    #[tokio::test]
    async fn matches_by_version_regex() {
        let catalogue = VulnCatalogue::disabled();
        catalogue
            .seed(vec![
                advisory("GETH-2021-01", r"Geth/v1\.10\.[0-7]-"),
                advisory("GETH-2020-99", r"Geth/v1\.9\..*"),
            ])
            .await
            .unwrap();

        let hits = catalogue.check("Geth/v1.10.3-stable/linux-amd64/go1.16").await;
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].uid, "GETH-2021-01");

        assert!(catalogue.check("Nethermind/v1.12.4").await.is_empty());
    }

    #[tokio::test]
    async fn invalid_regex_aborts_the_seed() {
        let catalogue = VulnCatalogue::disabled();
        let err = catalogue.seed(vec![advisory("BAD-1", "(unclosed")]).await.unwrap_err();
        assert!(matches!(err, CatalogError::InvalidCheck { uid, .. } if uid == "BAD-1"));
    }

    #[test]
    fn entries_decode_from_feed_shape() {
        let raw = r#"[{
            "name": "CorruptedDAG",
            "uid": "GETH-2020-01",
            "summary": "Mining nodes will generate erroneous PoW.",
            "description": "Affected versions suffer from a vulnerability.",
            "links": ["https://example.invalid/advisory"],
            "introduced": "v1.6.0",
            "fixed": "v1.9.24",
            "published": "2020-11-12",
            "severity": "Medium",
            "CVE": "CVE-2020-26240",
            "check": "Geth\\/v1\\.(6|7|8)\\..*"
        }]"#;
        let entries: Vec<Vulnerability> = serde_json::from_str(raw).unwrap();
        assert_eq!(entries[0].uid, "GETH-2020-01");
        assert_eq!(entries[0].cve, "CVE-2020-26240");
    }
}
