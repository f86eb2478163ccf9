//! In-memory [`HeaderStore`], used in tests and short-lived tooling.

use crate::{HeaderStore, StoreError};
use alloy_consensus::Header;
use alloy_primitives::B256;
use alloy_rlp::Decodable;
use std::{collections::HashMap, sync::RwLock};

/// Volatile header store backed by a hash map.
///
/// Values still pass through the RLP codec so encode/decode behavior matches
/// the persistent store exactly.
#[derive(Debug, Default)]
pub struct MemoryHeaderStore {
    entries: RwLock<HashMap<B256, Vec<u8>>>,
}

impl MemoryHeaderStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored headers.
    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl HeaderStore for MemoryHeaderStore {
    fn add(&self, hash: B256, header: &Header) -> Result<(), StoreError> {
        let mut entries = self.entries.write().map_err(|_| StoreError::LockPoisoned)?;
        entries.entry(hash).or_insert_with(|| alloy_rlp::encode(header));
        Ok(())
    }

    fn get(&self, hash: B256) -> Result<Option<Header>, StoreError> {
        let entries = self.entries.read().map_err(|_| StoreError::LockPoisoned)?;
        let Some(raw) = entries.get(&hash) else {
            return Ok(None);
        };
        let header = Header::decode(&mut raw.as_slice())
            .map_err(|err| StoreError::Corrupt { hash, reason: err.to_string() })?;
        Ok(Some(header))
    }

    fn contains(&self, hash: B256) -> Result<bool, StoreError> {
        let entries = self.entries.read().map_err(|_| StoreError::LockPoisoned)?;
        Ok(entries.contains_key(&hash))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_is_idempotent() {
        let store = MemoryHeaderStore::new();
        let header = Header { number: 7, ..Default::default() };
        let hash = header.hash_slow();

        store.add(hash, &header).unwrap();
        store.add(hash, &header).unwrap();

        assert_eq!(store.len(), 1);
        assert_eq!(store.get(hash).unwrap(), Some(header));
    }
}
