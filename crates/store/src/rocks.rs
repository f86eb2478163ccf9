//! RocksDB-backed [`HeaderStore`].

use crate::{HeaderStore, StoreError};
use alloy_consensus::Header;
use alloy_primitives::B256;
use alloy_rlp::Decodable;
use rocksdb::{DB, Options};
use std::path::Path;
use tracing::trace;

/// Persistent header store. Survives process restarts.
#[derive(Debug)]
pub struct RocksHeaderStore {
    db: DB,
}

impl RocksHeaderStore {
    /// Opens (or creates) the store at `path`.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        let db = DB::open(&opts, path)?;
        Ok(Self { db })
    }
}

impl HeaderStore for RocksHeaderStore {
    fn add(&self, hash: B256, header: &Header) -> Result<(), StoreError> {
        if self.db.get_pinned(hash)?.is_some() {
            return Ok(());
        }
        let encoded = alloy_rlp::encode(header);
        self.db.put(hash, encoded)?;
        trace!(target: "monitor::store", %hash, number = header.number, "Persisted header");
        Ok(())
    }

    fn get(&self, hash: B256) -> Result<Option<Header>, StoreError> {
        let Some(raw) = self.db.get_pinned(hash)? else {
            return Ok(None);
        };
        let header = Header::decode(&mut raw.as_ref())
            .map_err(|err| StoreError::Corrupt { hash, reason: err.to_string() })?;
        Ok(Some(header))
    }

    fn contains(&self, hash: B256) -> Result<bool, StoreError> {
        Ok(self.db.get_pinned(hash)?.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::B256;

    #[test]
    fn roundtrips_and_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let header = Header { number: 42, ..Default::default() };
        let hash = header.hash_slow();

        {
            let store = RocksHeaderStore::open(dir.path()).unwrap();
            store.add(hash, &header).unwrap();
            // Idempotent re-add.
            store.add(hash, &header).unwrap();
            assert_eq!(store.get(hash).unwrap(), Some(header.clone()));
        }

        let store = RocksHeaderStore::open(dir.path()).unwrap();
        assert_eq!(store.get(hash).unwrap(), Some(header));
        assert!(!store.contains(B256::with_last_byte(9)).unwrap());
    }

    #[test]
    fn corrupt_value_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let store = RocksHeaderStore::open(dir.path()).unwrap();
        let hash = B256::with_last_byte(1);
        store.db.put(hash, b"not rlp").unwrap();

        let err = store.get(hash).unwrap_err();
        assert!(err.is_fatal());
    }
}
