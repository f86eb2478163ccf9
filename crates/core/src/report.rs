//! The cross-node report snapshot produced by each round.

use crate::{BadBlock, NodeStatus};
use alloy_primitives::B256;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One column of the report: everything known about a single node.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientSummary {
    /// Configured node name.
    pub name: String,
    /// Self-reported version string.
    pub version: String,
    /// Reachability in the round that produced the report.
    pub status: NodeStatus,
    /// Unix seconds of the last observed head change.
    pub last_progress: u64,
    /// Size of the node's self-reported bad block set.
    pub bad_blocks: usize,
    /// Uids of catalogue entries matching the node's version.
    pub vulnerabilities: Vec<String>,
}

/// Snapshot of the fleet's state after one round. Replaces the previous one.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Report {
    /// One column per configured node, in name order.
    pub cols: Vec<ClientSummary>,
    /// Per-height rows; the i-th cell is node i's hex hash or empty.
    pub rows: BTreeMap<u64, Vec<String>>,
    /// The interesting heights, strictly descending.
    pub numbers: Vec<u64>,
    /// Every distinct hash appearing in the rows.
    pub hashes: Vec<B256>,
    /// Most recent bad blocks, descending by number, capped at 20.
    pub bad_blocks: Vec<BadBlock>,
    /// Chain label from the configuration.
    pub chain: String,
}

impl Report {
    /// The row cell for `node_index` at `height`, if the report has that row.
    pub fn cell(&self, height: u64, node_index: usize) -> Option<&str> {
        self.rows.get(&height).and_then(|row| row.get(node_index)).map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_with_the_published_schema() {
        let report = Report {
            cols: vec![ClientSummary {
                name: "node01".to_string(),
                version: "Geth/v1.10.8".to_string(),
                status: NodeStatus::Ok,
                last_progress: 1_700_000_000,
                bad_blocks: 0,
                vulnerabilities: vec![],
            }],
            rows: BTreeMap::from([(5u64, vec![format!("{:#x}", B256::repeat_byte(1))])]),
            numbers: vec![5],
            hashes: vec![B256::repeat_byte(1)],
            bad_blocks: vec![],
            chain: "mainnet".to_string(),
        };

        let value = serde_json::to_value(&report).unwrap();
        for key in ["Cols", "Rows", "Numbers", "Hashes", "BadBlocks", "Chain"] {
            assert!(value.get(key).is_some(), "missing key {key}");
        }
        assert_eq!(value["Cols"][0]["status"], "OK");

        let back: Report = serde_json::from_value(value).unwrap();
        assert_eq!(back.numbers, vec![5]);
    }
}
