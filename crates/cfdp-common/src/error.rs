//! Error types for CFDP

use thiserror::Error;

/// Result type alias for CFDP operations
pub type Result<T> = std::result::Result<T, CfdpError>;

/// Main error type for CFDP
#[derive(Error, Debug)]
pub enum CfdpError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The embedded store reported SQLITE_BUSY/SQLITE_LOCKED. Produced by the
    /// storage layer itself so callers never match on message strings.
    #[error("Storage busy: {0}")]
    StorageBusy(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Source unavailable: {0}")]
    SourceUnavailable(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error("Invalid job transition: {0}")]
    InvalidTransition(String),

    #[error("Too many concurrent operations (limit {limit})")]
    TooManyOperations { limit: usize },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Unknown error: {0}")]
    Unknown(String),
}

impl CfdpError {
    /// Whether a retry with backoff is worthwhile.
    pub fn is_retryable(&self) -> bool {
        matches!(self, CfdpError::StorageBusy(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_busy_is_retryable() {
        assert!(CfdpError::StorageBusy("busy".into()).is_retryable());
        assert!(!CfdpError::Storage("corrupt".into()).is_retryable());
        assert!(!CfdpError::Parse("bad row".into()).is_retryable());
    }

    #[test]
    fn test_too_many_operations_message() {
        let err = CfdpError::TooManyOperations { limit: 5 };
        assert_eq!(err.to_string(), "Too many concurrent operations (limit 5)");
    }
}
