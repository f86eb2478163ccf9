//! The [`HeaderSource`] abstraction.

use crate::SourceError;
use alloy_eips::BlockNumberOrTag;
use alloy_primitives::{B256, Bytes};
use alloy_rpc_types_eth::Header;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;

/// One bad block as reported by `debug_getBadBlocks`.
///
/// Mirrors the geth wire shape: the `rlp` payload carries the full block, the
/// `block` field is the remote's own JSON rendering and is kept opaque.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BadBlockArgs {
    /// Hash of the rejected block.
    pub hash: B256,
    /// RLP encoding of the full rejected block.
    pub rlp: Bytes,
    /// The remote's JSON rendering of the block, passed through untouched.
    #[serde(default)]
    pub block: serde_json::Value,
}

/// Abstract fetcher for one remote endpoint.
///
/// Implementations own their per-call timeouts; callers never wrap calls in
/// an additional deadline.
#[async_trait]
pub trait HeaderSource: Send + Sync + Debug {
    /// The remote's self-reported client/version string, unmodified.
    async fn version(&self) -> Result<String, SourceError>;

    /// Returns the full header at `number`, including its hash.
    ///
    /// A response whose number differs from a requested numeric height fails
    /// with [`SourceError::NumberMismatch`] and must not be cached.
    async fn header_by_number(&self, number: BlockNumberOrTag) -> Result<Header, SourceError>;

    /// The node's current self-reported bad block set.
    ///
    /// Sources that do not expose `debug_getBadBlocks` return an empty list.
    async fn bad_blocks(&self) -> Result<Vec<BadBlockArgs>, SourceError>;
}

/// Rejects a header whose number differs from the requested height.
pub(crate) fn check_number(requested: BlockNumberOrTag, header: Header) -> Result<Header, SourceError> {
    if let BlockNumberOrTag::Number(requested) = requested
        && header.number != requested
    {
        return Err(SourceError::NumberMismatch { requested, got: header.number });
    }
    Ok(header)
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_consensus::Header as ConsensusHeader;

    fn header_at(number: u64) -> Header {
        Header {
            hash: B256::with_last_byte(1),
            inner: ConsensusHeader { number, ..Default::default() },
            total_difficulty: None,
            size: None,
        }
    }

    #[test]
    fn number_mismatch_is_rejected() {
        let err = check_number(BlockNumberOrTag::Number(5), header_at(6)).unwrap_err();
        assert!(matches!(err, SourceError::NumberMismatch { requested: 5, got: 6 }));
    }

    #[test]
    fn latest_tag_skips_the_check() {
        assert!(check_number(BlockNumberOrTag::Latest, header_at(6)).is_ok());
    }

    #[test]
    fn bad_block_args_decode_from_geth_shape() {
        let raw = r#"{
            "hash": "0x1111111111111111111111111111111111111111111111111111111111111111",
            "rlp": "0xc0",
            "block": {"number": "0x1"}
        }"#;
        let args: BadBlockArgs = serde_json::from_str(raw).unwrap();
        assert_eq!(args.hash, B256::repeat_byte(0x11));
        assert_eq!(args.rlp.as_ref(), &[0xc0]);
    }
}
