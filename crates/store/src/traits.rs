//! Storage abstraction for block headers.

use crate::StoreError;
use alloy_consensus::Header;
use alloy_primitives::B256;
use std::fmt::Debug;

/// Key-value persistence of full block headers, keyed by block hash.
///
/// Implementations are internally thread-safe and `add` is idempotent:
/// inserting a hash that is already present is a no-op.
pub trait HeaderStore: Send + Sync + Debug {
    /// Persists `header` under `hash`, skipping the write if the key exists.
    fn add(&self, hash: B256, header: &Header) -> Result<(), StoreError>;

    /// Returns the header stored under `hash`, if any.
    fn get(&self, hash: B256) -> Result<Option<Header>, StoreError>;

    /// Whether `hash` is present in the store.
    fn contains(&self, hash: B256) -> Result<bool, StoreError> {
        Ok(self.get(hash)?.is_some())
    }
}
