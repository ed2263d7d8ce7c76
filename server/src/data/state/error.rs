//! State store error types

use thiserror::Error;

/// Error type for durable state operations
#[derive(Error, Debug)]
pub enum StateError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(String),

    #[error("State configuration error: {0}")]
    Config(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let err = StateError::Config("bad backend".into());
        assert_eq!(err.to_string(), "State configuration error: bad backend");
    }
}
