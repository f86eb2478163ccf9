//! Per-node chain view: a rate-limited cache of recent heights with
//! reorg-aware parent chain maintenance.

use crate::{BlockInfo, Metrics};
use alloy_eips::BlockNumberOrTag;
use alloy_primitives::B256;
use chainwatch_sources::{BadBlockArgs, HeaderSource, SourceError};
use chainwatch_store::HeaderStore;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use std::{
    collections::BTreeMap,
    num::NonZeroU32,
    sync::Arc,
    time::{Duration, SystemTime, UNIX_EPOCH},
};
use tokio::{sync::RwLock, time::Instant};
use tracing::{debug, info, warn};

/// Minimum interval between version re-checks against the same node.
const VERSION_CHECK_INTERVAL: Duration = Duration::from_secs(30);

/// Placeholder while a node's version is unknown.
const VERSION_UNKNOWN: &str = "n/a";

/// Reachability of a node, decided once per round by the head refresh.
///
/// There is no hysteresis: a node can be unreachable in one round and OK in
/// the next without losing its cached history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum NodeStatus {
    /// Last head refresh succeeded.
    #[serde(rename = "OK")]
    Ok,
    /// Last head refresh failed.
    Unreachable,
}

/// Errors surfaced by a [`NodeView`].
#[derive(Debug, thiserror::Error)]
pub enum NodeError {
    /// The underlying source failed.
    #[error(transparent)]
    Source(#[from] SourceError),
}

#[derive(Debug)]
struct NodeState {
    status: NodeStatus,
    version: String,
    version_checked: Option<Instant>,
    latest: Option<BlockInfo>,
    chain_history: BTreeMap<u64, BlockInfo>,
    last_progress: u64,
    bad_block_count: usize,
}

/// One monitored endpoint and everything we have learned from it.
///
/// All mutation happens under the interior write lock; read-only accessors
/// take the shared lock. Fetches deliberately block the write lock: each node
/// is a self-contained serial resource, and caller parallelism is across
/// nodes, never within one.
pub struct NodeView {
    name: String,
    source: Arc<dyn HeaderSource>,
    store: Arc<dyn HeaderStore>,
    limiter: Option<DefaultDirectRateLimiter>,
    state: RwLock<NodeState>,
}

impl std::fmt::Debug for NodeView {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeView")
            .field("name", &self.name)
            .field("source", &self.source)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl NodeView {
    /// Creates a view over `source`, persisting fetched headers into `store`.
    ///
    /// `ratelimit` is in operations per second; zero means unlimited.
    pub fn new(
        name: impl Into<String>,
        source: Arc<dyn HeaderSource>,
        store: Arc<dyn HeaderStore>,
        ratelimit: u32,
    ) -> Self {
        let limiter =
            NonZeroU32::new(ratelimit).map(|rate| RateLimiter::direct(Quota::per_second(rate)));
        Self {
            name: name.into(),
            source,
            store,
            limiter,
            state: RwLock::new(NodeState {
                status: NodeStatus::Unreachable,
                version: VERSION_UNKNOWN.to_string(),
                version_checked: None,
                latest: None,
                chain_history: BTreeMap::new(),
                last_progress: 0,
                bad_block_count: 0,
            }),
        }
    }

    /// The node's unique configured name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current reachability.
    pub async fn status(&self) -> NodeStatus {
        self.state.read().await.status
    }

    /// Updates reachability; called by the monitor after each head refresh.
    pub async fn set_status(&self, status: NodeStatus) {
        self.state.write().await.status = status;
    }

    /// Height of the most recently observed head, if any.
    pub async fn head_num(&self) -> Option<u64> {
        self.state.read().await.latest.map(|info| info.number)
    }

    /// The most recently observed head.
    pub async fn latest(&self) -> Option<BlockInfo> {
        self.state.read().await.latest
    }

    /// Unix seconds of the last observed head change.
    pub async fn last_progress(&self) -> u64 {
        self.state.read().await.last_progress
    }

    /// Number of bad blocks the node reported in the last sweep.
    pub async fn bad_block_count(&self) -> usize {
        self.state.read().await.bad_block_count
    }

    /// Records the size of the node's self-reported bad block set.
    pub async fn set_bad_block_count(&self, count: usize) {
        self.state.write().await.bad_block_count = count;
    }

    /// The node's self-reported version string, re-checked at most every 30s.
    ///
    /// Returns the cached value (initially `"n/a"`) when the node cannot be
    /// reached.
    pub async fn version(&self) -> String {
        {
            let state = self.state.read().await;
            if state
                .version_checked
                .is_some_and(|checked| checked.elapsed() < VERSION_CHECK_INTERVAL)
            {
                return state.version.clone();
            }
        }

        let mut state = self.state.write().await;
        // Another task may have refreshed while we waited for the lock.
        if state.version_checked.is_some_and(|checked| checked.elapsed() < VERSION_CHECK_INTERVAL)
        {
            return state.version.clone();
        }
        state.version_checked = Some(Instant::now());
        match self.source.version().await {
            Ok(version) => state.version = version,
            Err(err) => {
                debug!(target: "monitor::node", node = %self.name, %err, "Version check failed");
            }
        }
        state.version.clone()
    }

    /// Fetches the node's current head and folds it into the chain view.
    ///
    /// On a head change, `last_progress` moves to now and the per-node head
    /// gauge is updated. Transport failures bubble up; the caller decides the
    /// node's status for the round.
    pub async fn update_latest(&self) -> Result<BlockInfo, NodeError> {
        self.take_token().await;
        let header = self.fetch(BlockNumberOrTag::Latest).await?;
        let info = BlockInfo::from(&header);

        let mut state = self.state.write().await;
        if state.latest.map(|latest| latest.hash) != Some(info.hash) {
            state.last_progress = unix_now();
            state.latest = Some(info);
            self.persist(&header);
            state.chain_history.insert(info.number, info);
            self.reconcile_parents(&mut state, info).await?;
            metrics::gauge!(Metrics::NODE_HEAD, "node" => self.name.clone())
                .set(info.number as f64);
            debug!(target: "monitor::node", node = %self.name, head = %info, "New head");
        }
        Ok(info)
    }

    /// The node's view of height `number`.
    ///
    /// Returns `None` without querying when the height is above the known
    /// head. A cache hit short-circuits unless `force` is set; a miss fetches
    /// through the rate limiter and repairs the parent chain.
    pub async fn block_at(&self, number: u64, force: bool) -> Option<BlockInfo> {
        let mut state = self.state.write().await;
        if state.latest.is_some_and(|latest| number > latest.number) {
            return None;
        }
        if !force && let Some(info) = state.chain_history.get(&number) {
            return Some(*info);
        }
        match self.throttled_get_header(&mut state, number).await {
            Ok(info) => Some(info),
            Err(err) => {
                debug!(target: "monitor::node", node = %self.name, number, %err, "Header fetch failed");
                None
            }
        }
    }

    /// The hash the node reports at `number`, or zero when unavailable.
    ///
    /// A cache hit at `number` returns its hash; a hit at `number + 1`
    /// returns that entry's parent hash, which the adjacency invariant makes
    /// exact. Only a true miss falls through to a fetch.
    pub async fn hash_at(&self, number: u64, force: bool) -> B256 {
        if !force {
            let state = self.state.read().await;
            if let Some(info) = state.chain_history.get(&number) {
                return info.hash;
            }
            if let Some(child) = state.chain_history.get(&(number + 1)) {
                return child.parent_hash;
            }
        }
        match self.block_at(number, force).await {
            Some(info) => info.hash,
            None => B256::ZERO,
        }
    }

    /// The node's current self-reported bad block set.
    pub async fn bad_blocks(&self) -> Result<Vec<BadBlockArgs>, NodeError> {
        self.take_token().await;
        Ok(self.source.bad_blocks().await?)
    }

    async fn take_token(&self) {
        if let Some(limiter) = &self.limiter {
            limiter.until_ready().await;
        }
    }

    async fn fetch(&self, number: BlockNumberOrTag) -> Result<alloy_rpc_types_eth::Header, NodeError> {
        metrics::counter!(Metrics::NODE_FETCHES_TOTAL, "node" => self.name.clone()).increment(1);
        match self.source.header_by_number(number).await {
            Ok(header) => Ok(header),
            Err(err) => {
                metrics::counter!(Metrics::NODE_FETCH_ERRORS_TOTAL, "node" => self.name.clone())
                    .increment(1);
                if let SourceError::NumberMismatch { requested, got } = &err {
                    warn!(
                        target: "monitor::node",
                        node = %self.name,
                        requested,
                        got,
                        "Remote returned header for the wrong height"
                    );
                }
                Err(err.into())
            }
        }
    }

    fn persist(&self, header: &alloy_rpc_types_eth::Header) {
        if let Err(err) = self.store.add(header.hash, &header.inner) {
            warn!(target: "monitor::node", node = %self.name, hash = %header.hash, %err, "Failed to persist header");
        }
    }

    /// Fetches `number`, caches it, and walks backwards repairing any stale
    /// entries whose hash no longer matches the child's parent hash.
    async fn throttled_get_header(
        &self,
        state: &mut NodeState,
        number: u64,
    ) -> Result<BlockInfo, NodeError> {
        self.take_token().await;
        let header = self.fetch(BlockNumberOrTag::Number(number)).await?;
        let info = BlockInfo::from(&header);
        self.persist(&header);
        state.chain_history.insert(number, info);
        self.reconcile_parents(state, info).await?;
        Ok(info)
    }

    /// Parent-chain reconciliation: while the entry below `child` exists and
    /// disagrees with `child.parent_hash`, evict it and refetch.
    async fn reconcile_parents(
        &self,
        state: &mut NodeState,
        mut child: BlockInfo,
    ) -> Result<(), NodeError> {
        let mut depth = 0u64;
        while child.number > 0 {
            let parent_number = child.number - 1;
            match state.chain_history.get(&parent_number) {
                Some(parent) if parent.hash == child.parent_hash => break,
                Some(stale) => {
                    debug!(
                        target: "monitor::node",
                        node = %self.name,
                        number = parent_number,
                        stale = %stale.hash,
                        expected = %child.parent_hash,
                        "Evicting reorged entry"
                    );
                    state.chain_history.remove(&parent_number);
                    depth += 1;

                    self.take_token().await;
                    let header = self.fetch(BlockNumberOrTag::Number(parent_number)).await?;
                    let refreshed = BlockInfo::from(&header);
                    self.persist(&header);
                    state.chain_history.insert(parent_number, refreshed);
                    child = refreshed;
                }
                None => break,
            }
        }
        if depth > 0 {
            metrics::counter!(Metrics::NODE_REORGS_TOTAL, "node" => self.name.clone())
                .increment(depth);
            if depth > 1 {
                info!(target: "monitor::node", node = %self.name, depth, "Reorg repaired");
            }
        }
        Ok(())
    }

    /// Number of heights currently held in the chain view.
    pub async fn history_len(&self) -> usize {
        self.state.read().await.chain_history.len()
    }

    /// Checks the chain view invariants: entry numbering and parent chaining
    /// across adjacent entries.
    #[cfg(any(test, feature = "test-util"))]
    pub async fn assert_history_consistent(&self) {
        let state = self.state.read().await;
        for (number, info) in &state.chain_history {
            assert_eq!(info.number, *number, "entry number mismatch at {number}");
            if let Some(next) = state.chain_history.get(&(number + 1)) {
                assert_eq!(
                    next.parent_hash,
                    info.hash,
                    "parent chain broken between {number} and {}",
                    number + 1
                );
            }
        }
        if let Some(latest) = state.latest {
            assert_eq!(state.chain_history.get(&latest.number), Some(&latest));
        }
    }
}

fn unix_now() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chainwatch_sources::{BrokenSource, TestChainSource};
    use chainwatch_store::MemoryHeaderStore;

    fn view(source: Arc<TestChainSource>) -> NodeView {
        NodeView::new("node00", source, Arc::new(MemoryHeaderStore::new()), 0)
    }

    #[tokio::test]
    async fn update_latest_tracks_head_changes() {
        let chain = Arc::new(TestChainSource::with_head(100));
        let node = view(chain.clone());

        let first = node.update_latest().await.unwrap();
        assert_eq!(first.number, 100);
        assert_eq!(node.head_num().await, Some(100));
        let progress = node.last_progress().await;
        assert!(progress > 0);

        // Unchanged head leaves last_progress alone.
        node.update_latest().await.unwrap();
        assert_eq!(node.last_progress().await, progress);

        chain.advance(1);
        node.update_latest().await.unwrap();
        assert_eq!(node.head_num().await, Some(101));
    }

    #[tokio::test]
    async fn block_at_beyond_head_returns_none_without_querying() {
        let chain = Arc::new(TestChainSource::with_head(50));
        let node = view(chain.clone());
        node.update_latest().await.unwrap();

        assert!(node.block_at(51, false).await.is_none());
        assert_eq!(chain.header_query_count(), 0);
    }

    #[tokio::test]
    async fn block_at_caches() {
        let chain = Arc::new(TestChainSource::with_head(50));
        let node = view(chain.clone());
        node.update_latest().await.unwrap();

        let a = node.block_at(40, false).await.unwrap();
        let b = node.block_at(40, false).await.unwrap();
        assert_eq!(a, b);
        assert_eq!(chain.header_query_count(), 1);

        node.block_at(40, true).await.unwrap();
        assert_eq!(chain.header_query_count(), 2);
        node.assert_history_consistent().await;
    }

    #[tokio::test]
    async fn hash_at_uses_parent_implied_lookup() {
        let chain = Arc::new(TestChainSource::with_head(50));
        let node = view(chain.clone());
        node.update_latest().await.unwrap();

        node.block_at(40, false).await.unwrap();
        let implied = node.hash_at(39, false).await;
        assert_ne!(implied, B256::ZERO);
        // Served from the entry at 40; no extra fetch.
        assert_eq!(chain.header_query_count(), 1);

        let direct = node.block_at(39, false).await.unwrap();
        assert_eq!(direct.hash, implied);
    }

    #[tokio::test]
    async fn hash_at_is_zero_when_unreachable() {
        let node =
            NodeView::new("broken", Arc::new(BrokenSource), Arc::new(MemoryHeaderStore::new()), 0);
        assert_eq!(node.hash_at(5, false).await, B256::ZERO);
    }

    #[tokio::test]
    async fn reorg_is_repaired_by_parent_chaining() {
        let chain = Arc::new(TestChainSource::with_head(100));
        let node = view(chain.clone());
        node.update_latest().await.unwrap();
        for number in 96..100 {
            node.block_at(number, false).await.unwrap();
        }
        node.assert_history_consistent().await;

        // The node switches to a different chain above height 98.
        chain.fork_at(98, 0xee);
        chain.advance(1);
        node.update_latest().await.unwrap();

        node.assert_history_consistent().await;
        let head = node.latest().await.unwrap();
        assert_eq!(head.number, 101);
        // 98, 99 and 100 were evicted and refetched onto the new chain; 97
        // still matches and stops the walk.
        let repaired = node.block_at(98, false).await.unwrap();
        let kept = node.block_at(97, false).await.unwrap();
        assert_eq!(repaired.parent_hash, kept.hash);
    }

    #[tokio::test]
    async fn version_is_cached() {
        let chain = Arc::new(TestChainSource::with_head(10));
        let node = view(chain.clone());

        assert_eq!(node.version().await, "test-node/v0.1.0");
        chain.set_version("other/v9");
        // Within the re-check interval the cached value wins.
        assert_eq!(node.version().await, "test-node/v0.1.0");
    }
}
