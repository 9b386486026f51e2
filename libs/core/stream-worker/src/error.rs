//! Error types for stream operations.

use thiserror::Error;

/// Errors that can occur during stream operations.
#[derive(Error, Debug)]
pub enum StreamError {
    /// Redis connection or command error.
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// JSON serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Record processing error from the business hook.
    #[error("Processing error: {0}")]
    Processing(String),

    /// Consumer group error.
    #[error("Consumer group error: {0}")]
    ConsumerGroup(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl StreamError {
    /// Check if this is a connection-related error that might be recoverable.
    ///
    /// A BLOCK timeout on an idle stream never gets here: the consumer
    /// reports it as an empty read, not an error.
    pub fn is_connection_error(&self) -> bool {
        match self {
            Self::Redis(e) => {
                let err_str = e.to_string().to_lowercase();
                err_str.contains("connection")
                    || err_str.contains("disconnected")
                    || err_str.contains("broken pipe")
                    || err_str.contains("reset by peer")
                    || err_str.contains("refused")
                    || err_str.contains("eof")
                    || err_str.contains("io error")
            }
            _ => false,
        }
    }

    /// Check if this is a consumer group missing error (NOGROUP).
    pub fn is_nogroup_error(&self) -> bool {
        match self {
            Self::Redis(e) => e.to_string().contains("NOGROUP"),
            Self::ConsumerGroup(s) => s.contains("NOGROUP"),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = StreamError::Processing("hook rejected note".to_string());
        assert_eq!(err.to_string(), "Processing error: hook rejected note");
    }

    #[test]
    fn test_processing_error_is_not_connection_error() {
        let err = StreamError::Processing("invalid data".to_string());
        assert!(!err.is_connection_error());
    }

    #[test]
    fn test_nogroup_detection() {
        let err = StreamError::ConsumerGroup("NOGROUP No such consumer group".to_string());
        assert!(err.is_nogroup_error());

        let err = StreamError::ConsumerGroup("BUSYGROUP already exists".to_string());
        assert!(!err.is_nogroup_error());
    }
}
