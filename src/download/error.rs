//! Fetch outcome errors
//!
//! Clonable so a single failed fetch can be handed to every waiter.

use std::time::Duration;

use thiserror::Error;

/// Errors produced while acquiring a remote resource
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    /// Upstream answered with a non-success status
    #[error("HTTP {status} fetching {url}: {reason}")]
    HttpStatus {
        url: String,
        status: u16,
        reason: String,
    },

    /// Connection or body transfer failed
    #[error("Transport error fetching {url}: {reason}")]
    Transport { url: String, reason: String },

    /// The destination file could not be created
    #[error("Cannot create destination file {path}: {reason}")]
    FileCreate { path: String, reason: String },

    /// Writing or reading the destination failed
    #[error("I/O error on {path}: {reason}")]
    Io { path: String, reason: String },

    /// The request itself is unusable
    #[error("Invalid fetch request: {0}")]
    InvalidRequest(String),

    /// Checksum records could not be read
    #[error("Checksum store error for {resource_key}: {reason}")]
    ChecksumStore {
        resource_key: String,
        reason: String,
    },

    /// The in-flight fetch ended without publishing an outcome
    #[error("In-flight fetch of {resource_key} ended without an outcome")]
    Abandoned { resource_key: String },

    /// Caller-imposed wait limit exceeded; the fetch itself keeps running
    #[error("Timed out after {waited:?} waiting for in-flight fetch of {resource_key}")]
    Timeout {
        resource_key: String,
        waited: Duration,
    },
}

impl FetchError {
    /// True for the caller-side wait timeout
    pub fn is_timeout(&self) -> bool {
        matches!(self, FetchError::Timeout { .. })
    }

    /// True when the fetch attempt itself failed
    pub fn is_fetch_failed(&self) -> bool {
        !self.is_timeout()
    }

    pub(crate) fn io(path: &std::path::Path, err: &std::io::Error) -> Self {
        FetchError::Io {
            path: path.display().to_string(),
            reason: err.to_string(),
        }
    }
}
