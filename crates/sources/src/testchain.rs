//! Deterministic in-process chains for tests and `testnode-*` client kinds.

use crate::{BadBlockArgs, HeaderSource, SourceError};
use alloy_consensus::Header as ConsensusHeader;
use alloy_eips::BlockNumberOrTag;
use alloy_primitives::{B256, Bytes, keccak256};
use alloy_rpc_types_eth::Header;
use async_trait::async_trait;
use std::sync::{
    Mutex, MutexGuard,
    atomic::{AtomicU64, Ordering},
};

/// Seed shared by every canonical test node, so their hashes agree.
const CANON_SEED: B256 = B256::repeat_byte(0xaa);
/// Seed of the long-stuck fork variant.
const FORK_OLD_SEED: B256 = B256::repeat_byte(0xbb);
/// Seed of the recently-diverged fork variant.
const FORK_RECENT_SEED: B256 = B256::repeat_byte(0xcc);

const CANON_HEAD: u64 = 13_000_000;
const FORK_RECENT_HEAD: u64 = 12_999_900;
const FORK_RECENT_HEIGHT: u64 = 12_999_800;
const FORK_OLD_HEAD: u64 = 12_800_000;
const FORK_OLD_HEIGHT: u64 = 12_799_998;

const GENESIS_TIME: u64 = 1_600_000_000;
const BLOCK_TIME: u64 = 13;

#[derive(Debug, Clone, Copy)]
struct Fork {
    height: u64,
    seed: B256,
}

#[derive(Debug)]
struct Inner {
    head: u64,
    fork: Option<Fork>,
    version: String,
    bad_blocks: Vec<BadBlockArgs>,
}

/// A seeded synthetic chain.
///
/// The hash at height `n` is a pure function of `(seed, n)`; forked variants
/// switch seeds at their fork height, so they share the canonical prefix and
/// first disagree exactly at that height. Heads are mutable and numeric
/// header queries are counted, which is what the round-idempotence tests key
/// off.
#[derive(Debug)]
pub struct TestChainSource {
    inner: Mutex<Inner>,
    header_queries: AtomicU64,
    latest_queries: AtomicU64,
}

impl TestChainSource {
    /// A canonical node at the standard test head.
    pub fn canon() -> Self {
        Self::with_head(CANON_HEAD)
    }

    /// A canonical node at `head`.
    pub fn with_head(head: u64) -> Self {
        Self::build(head, None)
    }

    /// The variant stuck shortly after a recent divergence.
    pub fn fork_recent() -> Self {
        Self::build(FORK_RECENT_HEAD, Some(Fork { height: FORK_RECENT_HEIGHT, seed: FORK_RECENT_SEED }))
    }

    /// The variant stuck long ago on an old fork.
    pub fn fork_old() -> Self {
        Self::build(FORK_OLD_HEAD, Some(Fork { height: FORK_OLD_HEIGHT, seed: FORK_OLD_SEED }))
    }

    fn build(head: u64, fork: Option<Fork>) -> Self {
        Self {
            inner: Mutex::new(Inner {
                head,
                fork,
                version: "test-node/v0.1.0".to_string(),
                bad_blocks: Vec::new(),
            }),
            header_queries: AtomicU64::new(0),
            latest_queries: AtomicU64::new(0),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Advances the head by `blocks`.
    pub fn advance(&self, blocks: u64) {
        self.lock().head += blocks;
    }

    /// Current head height.
    pub fn head(&self) -> u64 {
        self.lock().head
    }

    /// Switches this node onto a fresh fork starting at `height`.
    pub fn fork_at(&self, height: u64, seed_byte: u8) {
        self.lock().fork = Some(Fork { height, seed: B256::repeat_byte(seed_byte) });
    }

    /// Overrides the reported client version string.
    pub fn set_version(&self, version: impl Into<String>) {
        self.lock().version = version.into();
    }

    /// Replaces the reported bad block set.
    pub fn set_bad_blocks(&self, bad_blocks: Vec<BadBlockArgs>) {
        self.lock().bad_blocks = bad_blocks;
    }

    /// Number of numeric-height header queries served so far.
    pub fn header_query_count(&self) -> u64 {
        self.header_queries.load(Ordering::Relaxed)
    }

    /// Number of "latest" queries served so far.
    pub fn latest_query_count(&self) -> u64 {
        self.latest_queries.load(Ordering::Relaxed)
    }

    fn seed_for(inner: &Inner, number: u64) -> B256 {
        match inner.fork {
            Some(fork) if number >= fork.height => fork.seed,
            _ => CANON_SEED,
        }
    }

    fn hash_at(inner: &Inner, number: u64) -> B256 {
        let mut buf = [0u8; 40];
        buf[..32].copy_from_slice(Self::seed_for(inner, number).as_slice());
        buf[32..].copy_from_slice(&number.to_be_bytes());
        keccak256(buf)
    }

    fn consensus_header_at(inner: &Inner, number: u64) -> ConsensusHeader {
        let parent_hash = if number == 0 { B256::ZERO } else { Self::hash_at(inner, number - 1) };
        ConsensusHeader {
            number,
            parent_hash,
            timestamp: GENESIS_TIME + number * BLOCK_TIME,
            extra_data: Bytes::from_static(b"testchain"),
            ..Default::default()
        }
    }

    fn header_at(inner: &Inner, number: u64) -> Header {
        Header {
            hash: Self::hash_at(inner, number),
            inner: Self::consensus_header_at(inner, number),
            total_difficulty: None,
            size: None,
        }
    }

    /// A [`BadBlockArgs`] whose RLP payload decodes to this chain's block at
    /// `number`, with its hash perturbed so it never collides with a good one.
    pub fn bad_block_at(&self, number: u64) -> BadBlockArgs {
        let inner = self.lock();
        let header = Self::consensus_header_at(&inner, number);
        let mut hash = Self::hash_at(&inner, number);
        hash.0[0] ^= 0xff;
        BadBlockArgs { hash, rlp: encode_block_rlp(&header), block: serde_json::Value::Null }
    }
}

/// Encodes an empty-body block envelope `[header, [], []]`.
pub fn encode_block_rlp(header: &ConsensusHeader) -> Bytes {
    use alloy_rlp::Encodable;

    let mut payload = Vec::new();
    header.encode(&mut payload);
    payload.push(alloy_rlp::EMPTY_LIST_CODE);
    payload.push(alloy_rlp::EMPTY_LIST_CODE);

    let mut out = Vec::new();
    alloy_rlp::Header { list: true, payload_length: payload.len() }.encode(&mut out);
    out.extend_from_slice(&payload);
    out.into()
}

#[async_trait]
impl HeaderSource for TestChainSource {
    async fn version(&self) -> Result<String, SourceError> {
        Ok(self.lock().version.clone())
    }

    async fn header_by_number(&self, number: BlockNumberOrTag) -> Result<Header, SourceError> {
        match number {
            BlockNumberOrTag::Latest => {
                self.latest_queries.fetch_add(1, Ordering::Relaxed);
                let inner = self.lock();
                let head = inner.head;
                Ok(Self::header_at(&inner, head))
            }
            BlockNumberOrTag::Number(n) => {
                self.header_queries.fetch_add(1, Ordering::Relaxed);
                let inner = self.lock();
                if n > inner.head {
                    return Err(SourceError::MissingHeader(n.to_string()));
                }
                Ok(Self::header_at(&inner, n))
            }
            other => Err(SourceError::MissingHeader(other.to_string())),
        }
    }

    async fn bad_blocks(&self) -> Result<Vec<BadBlockArgs>, SourceError> {
        Ok(self.lock().bad_blocks.clone())
    }
}

/// A source that fails every call, standing in for an unreachable endpoint.
#[derive(Debug, Default, Clone, Copy)]
pub struct BrokenSource;

#[async_trait]
impl HeaderSource for BrokenSource {
    async fn version(&self) -> Result<String, SourceError> {
        Err(SourceError::Transport("broken test node".to_string()))
    }

    async fn header_by_number(&self, _number: BlockNumberOrTag) -> Result<Header, SourceError> {
        Err(SourceError::Transport("broken test node".to_string()))
    }

    async fn bad_blocks(&self) -> Result<Vec<BadBlockArgs>, SourceError> {
        Err(SourceError::Transport("broken test node".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn canon_nodes_agree() {
        let a = TestChainSource::canon();
        let b = TestChainSource::canon();
        let ha = a.header_by_number(BlockNumberOrTag::Number(1_000)).await.unwrap();
        let hb = b.header_by_number(BlockNumberOrTag::Number(1_000)).await.unwrap();
        assert_eq!(ha.hash, hb.hash);
    }

    #[tokio::test]
    async fn headers_parent_chain() {
        let chain = TestChainSource::canon();
        let parent = chain.header_by_number(BlockNumberOrTag::Number(99)).await.unwrap();
        let child = chain.header_by_number(BlockNumberOrTag::Number(100)).await.unwrap();
        assert_eq!(child.parent_hash, parent.hash);
        assert_eq!(child.number, 100);
    }

    #[tokio::test]
    async fn fork_shares_prefix_and_diverges_at_fork_height() {
        let canon = TestChainSource::canon();
        let fork = TestChainSource::fork_recent();

        let below_c = canon.header_by_number(BlockNumberOrTag::Number(12_999_799)).await.unwrap();
        let below_f = fork.header_by_number(BlockNumberOrTag::Number(12_999_799)).await.unwrap();
        assert_eq!(below_c.hash, below_f.hash);

        let at_c = canon.header_by_number(BlockNumberOrTag::Number(12_999_800)).await.unwrap();
        let at_f = fork.header_by_number(BlockNumberOrTag::Number(12_999_800)).await.unwrap();
        assert_ne!(at_c.hash, at_f.hash);
        // Both forks build on the same parent.
        assert_eq!(at_c.parent_hash, at_f.parent_hash);
    }

    #[tokio::test]
    async fn beyond_head_is_missing() {
        let chain = TestChainSource::with_head(10);
        let err = chain.header_by_number(BlockNumberOrTag::Number(11)).await.unwrap_err();
        assert!(matches!(err, SourceError::MissingHeader(_)));
        assert_eq!(chain.header_query_count(), 1);
    }

    #[tokio::test]
    async fn advance_moves_latest() {
        let chain = TestChainSource::with_head(10);
        let before = chain.header_by_number(BlockNumberOrTag::Latest).await.unwrap();
        chain.advance(2);
        let after = chain.header_by_number(BlockNumberOrTag::Latest).await.unwrap();
        assert_eq!(before.number, 10);
        assert_eq!(after.number, 12);
        assert_eq!(chain.latest_query_count(), 2);
        assert_eq!(chain.header_query_count(), 0);
    }
}
