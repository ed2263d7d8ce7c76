//! Caller-visible error taxonomy
//!
//! Fanout-side failures are never errors: once the source append commits,
//! publish returns a receipt and callers inspect its counters and mode.

use thiserror::Error;

use super::keys::InvalidId;
use crate::data::state::StateError;
use crate::data::store::StoreError;

/// Errors surfaced to callers of the publish and lifecycle operations
#[derive(Error, Debug)]
pub enum FanoutError {
    /// Subscribe referenced a source stream that does not exist
    #[error("source stream not found: {0}")]
    SourceNotFound(String),

    /// Estuary pre-existed with a different content-type than the source
    #[error("estuary {estuary_id} has content-type {estuary_content_type:?}, source has {source_content_type:?}")]
    ContentTypeMismatch {
        estuary_id: String,
        estuary_content_type: Option<String>,
        source_content_type: String,
    },

    /// Malformed id or payload framing
    #[error("validation failed: {0}")]
    Validation(String),

    /// The stream core rejected the source append; publish aborts, no fanout
    #[error("source append failed with status {status}")]
    UpstreamWriteFailed { status: u16 },

    /// Unexpected internal failure, logged with context
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<InvalidId> for FanoutError {
    fn from(err: InvalidId) -> Self {
        FanoutError::Validation(err.to_string())
    }
}

impl From<StoreError> for FanoutError {
    fn from(err: StoreError) -> Self {
        FanoutError::Internal(err.to_string())
    }
}

impl From<StateError> for FanoutError {
    fn from(err: StateError) -> Self {
        FanoutError::Internal(err.to_string())
    }
}
