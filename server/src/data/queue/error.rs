//! Fanout queue error types

use thiserror::Error;

/// Error type for queue operations
#[derive(Error, Debug)]
pub enum QueueError {
    #[error("queue closed")]
    Closed,

    #[error("message decode error: {0}")]
    Decode(String),

    #[error("message encode error: {0}")]
    Encode(String),

    #[error("unknown message id: {0}")]
    UnknownMessage(String),

    #[error("queue backend error: {0}")]
    Backend(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        assert_eq!(QueueError::Closed.to_string(), "queue closed");
        assert_eq!(
            QueueError::UnknownMessage("9".into()).to_string(),
            "unknown message id: 9"
        );
    }
}
