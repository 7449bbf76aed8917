//! Error types for the Pixiv cache subsystem

use thiserror::Error;

use crate::download::FetchError;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the cache and download subsystem
#[derive(Error, Debug)]
pub enum Error {
    /// Remote store unreachable or rejected the command
    #[error("Cache backend unavailable: {0}")]
    BackendUnavailable(String),

    /// Value could not be encoded for storage
    #[error("Failed to encode value for key {key}: {reason}")]
    Encode { key: String, reason: String },

    /// Content acquisition failed
    #[error(transparent)]
    Fetch(#[from] FetchError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// True when the error means "cache unavailable right now" rather than
    /// "definitely not cached".
    pub fn is_backend_unavailable(&self) -> bool {
        matches!(self, Error::BackendUnavailable(_))
    }
}

impl From<deadpool_redis::redis::RedisError> for Error {
    fn from(err: deadpool_redis::redis::RedisError) -> Self {
        Error::BackendUnavailable(err.to_string())
    }
}

impl From<deadpool_redis::PoolError> for Error {
    fn from(err: deadpool_redis::PoolError) -> Self {
        Error::BackendUnavailable(format!("connection pool: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_unavailable_is_not_a_miss() {
        let err = Error::BackendUnavailable("connection refused".to_string());
        assert!(err.is_backend_unavailable());
        assert!(err.to_string().contains("connection refused"));
        assert!(!Error::Config("bad".to_string()).is_backend_unavailable());
    }

    #[test]
    fn test_fetch_error_converts() {
        let err: Error = FetchError::InvalidRequest("no name".to_string()).into();
        assert!(matches!(err, Error::Fetch(FetchError::InvalidRequest(_))));
        assert_eq!(err.to_string(), "Invalid fetch request: no name");
    }
}
