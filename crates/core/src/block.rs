//! Compact block identity.

use alloy_primitives::B256;
use alloy_rpc_types_eth::Header;
use serde::{Deserialize, Serialize};

/// What one node claims about one height: the block's number, hash and
/// parent hash. Immutable once constructed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockInfo {
    /// Block height.
    pub number: u64,
    /// Block hash as reported by the node.
    pub hash: B256,
    /// Hash of the parent block.
    pub parent_hash: B256,
}

impl BlockInfo {
    /// Creates a new [`BlockInfo`].
    pub const fn new(number: u64, hash: B256, parent_hash: B256) -> Self {
        Self { number, hash, parent_hash }
    }
}

impl From<&Header> for BlockInfo {
    fn from(header: &Header) -> Self {
        Self { number: header.number, hash: header.hash, parent_hash: header.parent_hash }
    }
}

impl std::fmt::Display for BlockInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.number, self.hash)
    }
}
