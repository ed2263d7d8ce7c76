//! Stream store error types

use thiserror::Error;

/// Error type for stream store operations
///
/// Only transport-level problems are errors; domain-meaningful HTTP statuses
/// (404 stale, 409 conflict, ...) travel in the response types.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("request timed out")]
    Timeout,

    #[error("unexpected status {0}")]
    UnexpectedStatus(u16),

    #[error("store configuration error: {0}")]
    Config(String),
}

impl From<reqwest::Error> for StoreError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            StoreError::Timeout
        } else {
            StoreError::Transport(err.to_string())
        }
    }
}
