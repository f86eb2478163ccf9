//! Bad blocks: blocks a node rejected as invalid and retained for
//! diagnostics.

use alloy_consensus::Header;
use alloy_primitives::{Address, B256, Bytes, U256};
use alloy_rlp::Decodable;
use chainwatch_sources::BadBlockArgs;
use serde::{Deserialize, Serialize};

/// A rejected block, merged across every node that reported it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BadBlock {
    /// Hash of the rejected block.
    pub hash: B256,
    /// RLP encoding of the full block, as received.
    pub rlp: Bytes,
    /// Block height.
    pub number: U256,
    /// Parent hash.
    pub parent_hash: B256,
    /// Block timestamp.
    pub timestamp: u64,
    /// Extra-data field.
    pub extra: Bytes,
    /// Block beneficiary.
    pub coinbase: Address,
    /// State root the block claimed.
    pub state_root: B256,
    /// Names of the nodes that have reported this block. Grows over time;
    /// exact-string deduplication.
    pub clients: Vec<String>,
}

/// Errors decoding a reported bad block.
#[derive(Debug, thiserror::Error)]
pub enum BadBlockError {
    /// The RLP payload did not decode as a block envelope.
    #[error("bad block rlp: {0}")]
    Rlp(#[from] alloy_rlp::Error),
}

impl BadBlock {
    /// Decodes the RLP envelope of `args` into a record credited to
    /// `client`.
    ///
    /// Only the header part of the block payload is consumed; transactions
    /// and ommers stay opaque inside `rlp`.
    pub fn from_args(args: &BadBlockArgs, client: &str) -> Result<Self, BadBlockError> {
        let header = decode_envelope_header(&args.rlp)?;
        Ok(Self {
            hash: args.hash,
            rlp: args.rlp.clone(),
            number: U256::from(header.number),
            parent_hash: header.parent_hash,
            timestamp: header.timestamp,
            extra: header.extra_data,
            coinbase: header.beneficiary,
            state_root: header.state_root,
            clients: vec![client.to_string()],
        })
    }

    /// Adds `client` to the reporter set if not already listed.
    pub fn add_client(&mut self, client: &str) {
        if !self.clients.iter().any(|existing| existing == client) {
            self.clients.push(client.to_string());
        }
    }
}

/// Decodes the header out of a block envelope `[header, transactions, ommers]`.
fn decode_envelope_header(rlp: &[u8]) -> Result<Header, alloy_rlp::Error> {
    let mut buf = rlp;
    let envelope = alloy_rlp::Header::decode(&mut buf)?;
    if !envelope.list {
        return Err(alloy_rlp::Error::UnexpectedString);
    }
    Header::decode(&mut buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chainwatch_sources::encode_block_rlp;

    fn sample_header() -> Header {
        Header {
            number: 1234,
            parent_hash: B256::repeat_byte(0x11),
            timestamp: 1_700_000_000,
            extra_data: Bytes::from_static(b"evil"),
            beneficiary: Address::repeat_byte(0x22),
            state_root: B256::repeat_byte(0x33),
            ..Default::default()
        }
    }

    #[test]
    fn decodes_header_fields_from_envelope() {
        let header = sample_header();
        let args = BadBlockArgs {
            hash: B256::repeat_byte(0xbd),
            rlp: encode_block_rlp(&header),
            block: serde_json::Value::Null,
        };

        let bad = BadBlock::from_args(&args, "node01").unwrap();
        assert_eq!(bad.number, U256::from(1234u64));
        assert_eq!(bad.parent_hash, header.parent_hash);
        assert_eq!(bad.timestamp, header.timestamp);
        assert_eq!(bad.extra, header.extra_data);
        assert_eq!(bad.coinbase, header.beneficiary);
        assert_eq!(bad.state_root, header.state_root);
        assert_eq!(bad.clients, vec!["node01".to_string()]);
    }

    #[test]
    fn add_client_deduplicates_exactly() {
        let header = sample_header();
        let args = BadBlockArgs {
            hash: B256::repeat_byte(0xbd),
            rlp: encode_block_rlp(&header),
            block: serde_json::Value::Null,
        };
        let mut bad = BadBlock::from_args(&args, "node01").unwrap();

        bad.add_client("node01");
        bad.add_client("Node01");
        bad.add_client("node02");
        assert_eq!(bad.clients, vec!["node01", "Node01", "node02"]);
    }

    #[test]
    fn garbage_rlp_is_rejected() {
        let args = BadBlockArgs {
            hash: B256::ZERO,
            rlp: Bytes::from_static(b"\x01\x02\x03"),
            block: serde_json::Value::Null,
        };
        assert!(BadBlock::from_args(&args, "x").is_err());
    }
}
