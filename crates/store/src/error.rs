//! [`HeaderStore`](crate::HeaderStore) errors.

use alloy_primitives::B256;
use thiserror::Error;

/// Errors returned by header store implementations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The underlying database rejected the operation.
    #[error("database error: {0}")]
    Database(String),

    /// A stored value failed to decode.
    ///
    /// Store contents are self-written, so corruption is unrecoverable;
    /// callers must treat this as fatal.
    #[error("corrupt header entry for {hash}: {reason}")]
    Corrupt {
        /// Key of the corrupt entry.
        hash: B256,
        /// Decoder error text.
        reason: String,
    },

    /// An interior lock was poisoned.
    #[error("store lock poisoned")]
    LockPoisoned,
}

impl StoreError {
    /// Whether the error leaves the store unusable.
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::Corrupt { .. })
    }
}

impl From<rocksdb::Error> for StoreError {
    fn from(err: rocksdb::Error) -> Self {
        Self::Database(err.to_string())
    }
}
