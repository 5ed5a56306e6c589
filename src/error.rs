//! Error types for mnemon

use thiserror::Error;

/// Result type alias for mnemon operations
pub type Result<T> = std::result::Result<T, MemoryError>;

/// Main error type for mnemon
#[derive(Error, Debug)]
pub enum MemoryError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Embedding error: {0}")]
    Embedding(String),

    #[error("Provider error: {0}")]
    Provider(String),

    #[error("Timed out after {0}s: {1}")]
    Timeout(u64, String),

    #[error("Rate limited: retry after {0} seconds")]
    RateLimited(u64),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl MemoryError {
    /// Check if error is transient and safe to retry
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            MemoryError::Provider(_)
                | MemoryError::Timeout(_, _)
                | MemoryError::RateLimited(_)
                | MemoryError::Http(_)
        )
    }

    /// HTTP status code for synchronous handlers
    pub fn status(&self) -> u16 {
        match self {
            MemoryError::NotFound(_) => 404,
            MemoryError::InvalidInput(_) | MemoryError::Serialization(_) => 400,
            MemoryError::Config(_) => 400,
            MemoryError::Conflict(_) => 409,
            MemoryError::RateLimited(_) => 429,
            MemoryError::Provider(_) | MemoryError::Timeout(_, _) | MemoryError::Http(_) => 503,
            _ => 500,
        }
    }

    /// Get error code for the tool-call (JSON-RPC) protocol
    pub fn code(&self) -> i64 {
        match self {
            MemoryError::NotFound(_) => -32001,
            MemoryError::InvalidInput(_) | MemoryError::Serialization(_) => -32602,
            MemoryError::Conflict(_) => -32005,
            MemoryError::RateLimited(_) => -32004,
            _ => -32000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(MemoryError::Provider("upstream 502".into()).is_retryable());
        assert!(MemoryError::RateLimited(30).is_retryable());
        assert!(MemoryError::Timeout(30, "chat completion".into()).is_retryable());
        assert!(!MemoryError::InvalidInput("bad filter".into()).is_retryable());
        assert!(!MemoryError::NotFound("session abc".into()).is_retryable());
        assert!(!MemoryError::Storage("corrupt record".into()).is_retryable());
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(MemoryError::NotFound("x".into()).status(), 404);
        assert_eq!(MemoryError::InvalidInput("x".into()).status(), 400);
        assert_eq!(MemoryError::Conflict("x".into()).status(), 409);
        assert_eq!(MemoryError::RateLimited(1).status(), 429);
        assert_eq!(MemoryError::Provider("x".into()).status(), 503);
        assert_eq!(MemoryError::Internal("x".into()).status(), 500);
    }
}
