//! Locating the first height at which two node views diverge.
//!
//! Steady state is cheap: once a split has been established it rarely moves,
//! so replaying the previous round's fork heights answers most pairs from
//! cache alone. Only first-time finds and healed splits pay for a bounded
//! binary search.

use crate::NodeView;
use tracing::trace;

/// Returns the smallest height in `[0, min(heads)]` at which `a` and `b`
/// report different hashes, or `None` when they agree (or either head is
/// unknown).
///
/// `fork_heights` is the previous round's interesting-height list, sorted
/// ascending. The postcondition for a returned `h`: the views differ at `h`
/// and, unless `h == 0`, agree at `h - 1`.
pub async fn find_split(a: &NodeView, b: &NodeView, fork_heights: &[u64]) -> Option<u64> {
    let (Some(head_a), Some(head_b)) = (a.head_num().await, b.head_num().await) else {
        return None;
    };
    let highest = head_a.min(head_b);

    // Replay known fork heights, newest first. A height qualifies when the
    // views differ there but agree on the parent: the split preserved from a
    // previous round.
    for &height in fork_heights.iter().rev().filter(|&&height| height <= highest) {
        if a.hash_at(height, false).await == b.hash_at(height, false).await {
            continue;
        }
        if height == 0 || a.hash_at(height - 1, false).await == b.hash_at(height - 1, false).await
        {
            trace!(target: "monitor::fork", a = a.name(), b = b.name(), height, "Split replayed from cache");
            return Some(height);
        }
    }

    // Bounded binary search above the smallest known fork height. The
    // divergence predicate is monotone over a pair with a single fork point.
    let left = fork_heights.first().copied().unwrap_or(0);
    let span = (highest + 1).saturating_sub(left);
    let mut lo = 0u64;
    let mut hi = span;
    while lo < hi {
        let mid = lo + (hi - lo) / 2;
        if a.hash_at(left + mid, false).await != b.hash_at(left + mid, false).await {
            hi = mid;
        } else {
            lo = mid + 1;
        }
    }
    if lo == span {
        return None;
    }
    let split = left + lo;
    trace!(target: "monitor::fork", a = a.name(), b = b.name(), height = split, "Split located by search");
    Some(split)
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::B256;
    use chainwatch_sources::TestChainSource;
    use chainwatch_store::MemoryHeaderStore;
    use std::sync::Arc;

    async fn node(name: &str, source: TestChainSource) -> NodeView {
        let node = NodeView::new(name, Arc::new(source), Arc::new(MemoryHeaderStore::new()), 0);
        node.update_latest().await.unwrap();
        node
    }

    #[tokio::test]
    async fn agreeing_views_have_no_split() {
        let a = node("a", TestChainSource::with_head(1_000)).await;
        let b = node("b", TestChainSource::with_head(1_000)).await;
        assert_eq!(find_split(&a, &b, &[]).await, None);
    }

    #[tokio::test]
    async fn lagging_view_on_the_same_chain_is_not_a_split() {
        let a = node("a", TestChainSource::with_head(1_000)).await;
        let b = node("b", TestChainSource::with_head(900)).await;
        assert_eq!(find_split(&a, &b, &[]).await, None);
    }

    #[tokio::test]
    async fn finds_split_without_cache() {
        let a = node("a", TestChainSource::canon()).await;
        let b = node("b", TestChainSource::fork_recent()).await;

        let split = find_split(&a, &b, &[]).await.unwrap();
        assert_eq!(split, 12_999_800);

        // Postcondition: differ at the split, agree below it.
        assert_ne!(a.hash_at(split, false).await, b.hash_at(split, false).await);
        assert_eq!(a.hash_at(split - 1, false).await, b.hash_at(split - 1, false).await);
        assert_ne!(a.hash_at(split - 1, false).await, B256::ZERO);
    }

    #[tokio::test]
    async fn replays_cached_split_without_searching() {
        let a = node("a", TestChainSource::canon()).await;
        let b = node("b", TestChainSource::fork_recent()).await;

        let first = find_split(&a, &b, &[]).await.unwrap();
        let cache = vec![first - 1, first];
        let second = find_split(&a, &b, &cache).await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn detects_divergence_at_the_shared_head() {
        let forked = TestChainSource::with_head(500);
        forked.fork_at(500, 0xdd);
        let a = node("a", TestChainSource::with_head(500)).await;
        let b = node("b", forked).await;

        assert_eq!(find_split(&a, &b, &[]).await, Some(500));
    }

    #[tokio::test]
    async fn head_seeds_in_the_cache_are_not_mistaken_for_splits() {
        // A node that is merely behind shares every hash it has; replaying a
        // cache that contains the taller node's head must not invent a split.
        let a = node("a", TestChainSource::with_head(1_000)).await;
        let b = node("b", TestChainSource::with_head(900)).await;

        let cache = vec![900, 901, 1_000];
        assert_eq!(find_split(&a, &b, &cache).await, None);
    }
}
