//! [`HeaderSource`](crate::HeaderSource) errors.

use thiserror::Error;

/// Errors surfaced by header sources.
///
/// The monitor treats all of these as transient for the round, but
/// [`SourceError::NumberMismatch`] must additionally never be cached: the
/// remote returned data for a height we did not ask for.
#[derive(Debug, Error)]
pub enum SourceError {
    /// The endpoint could not be reached or timed out.
    #[error("transport failure: {0}")]
    Transport(String),

    /// The endpoint answered, but with no header.
    #[error("no header returned for block {0}")]
    MissingHeader(String),

    /// The endpoint returned a header for a different height than requested.
    #[error("header number mismatch: requested {requested}, got {got}")]
    NumberMismatch {
        /// Height that was requested.
        requested: u64,
        /// Height the remote actually returned.
        got: u64,
    },

    /// A response failed to deserialize.
    #[error("malformed response: {0}")]
    Malformed(String),
}

impl From<alloy_transport::RpcError<alloy_transport::TransportErrorKind>> for SourceError {
    fn from(err: alloy_transport::RpcError<alloy_transport::TransportErrorKind>) -> Self {
        match err {
            alloy_transport::RpcError::DeserError { err, .. } => Self::Malformed(err.to_string()),
            other => Self::Transport(other.to_string()),
        }
    }
}

impl From<reqwest::Error> for SourceError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            Self::Malformed(err.to_string())
        } else {
            Self::Transport(err.to_string())
        }
    }
}
