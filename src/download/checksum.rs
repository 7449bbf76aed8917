//! Checksum Registry
//!
//! Remembers the SHA-256 digest and length of every downloaded page so a file
//! left on disk by an interrupted process is not trusted on existence alone.
//!
//! Records are kept in memory and, when a durable store is attached, written
//! through to it. A registry built after a restart over the same store still
//! knows every page's fingerprint.

use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use super::error::FetchError;
use crate::cache::CacheStore;
use crate::error::Result;

/// Lowercase hex SHA-256 of a byte slice
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Fingerprint of one downloaded page
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChecksumRecord {
    pub resource_key: String,
    pub page_index: u32,
    pub digest: String,
    pub byte_length: u64,
    pub recorded_at: DateTime<Utc>,
}

impl ChecksumRecord {
    /// Whether content with this digest and length is the recorded content
    pub fn matches(&self, digest: &str, byte_length: u64) -> bool {
        self.byte_length == byte_length && self.digest.eq_ignore_ascii_case(digest)
    }
}

/// Result of checking a file against its recorded fingerprint
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verification {
    /// Content matches the record
    Valid(ChecksumRecord),
    /// Content differs from the record
    Mismatch {
        expected: ChecksumRecord,
        actual_digest: String,
        actual_length: u64,
    },
    /// Nothing recorded for this page
    Unknown,
}

/// Durable key of a record: `<resource_key>:p<page>`
fn store_key(resource_key: &str, page_index: u32) -> String {
    format!("{}:p{}", resource_key, page_index)
}

/// Registry of content fingerprints keyed by `(resource_key, page_index)`
#[derive(Default)]
pub struct ChecksumRegistry {
    records: DashMap<(String, u32), ChecksumRecord>,
    store: Option<Arc<dyn CacheStore<ChecksumRecord>>>,
}

impl ChecksumRegistry {
    /// Registry that lives only as long as the process
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry writing through to a durable store
    pub fn with_store(store: Arc<dyn CacheStore<ChecksumRecord>>) -> Self {
        Self {
            records: DashMap::new(),
            store: Some(store),
        }
    }

    pub fn is_durable(&self) -> bool {
        self.store.is_some()
    }

    /// Record (or replace) the fingerprint of a page.
    ///
    /// A failed durable write is logged; the record stays usable in memory.
    pub async fn record(
        &self,
        resource_key: &str,
        page_index: u32,
        digest: impl Into<String>,
        byte_length: u64,
    ) -> ChecksumRecord {
        let record = ChecksumRecord {
            resource_key: resource_key.to_string(),
            page_index,
            digest: digest.into(),
            byte_length,
            recorded_at: Utc::now(),
        };
        self.records
            .insert((resource_key.to_string(), page_index), record.clone());

        if let Some(store) = &self.store {
            let key = store_key(resource_key, page_index);
            if let Err(e) = store.put(&key, record.clone(), None).await {
                warn!(key = %key, error = %e, "Failed to persist checksum record");
            }
        }
        record
    }

    /// Recorded fingerprint of a page, loading it from the durable store
    /// when this process has not seen it yet
    pub async fn lookup(
        &self,
        resource_key: &str,
        page_index: u32,
    ) -> Result<Option<ChecksumRecord>> {
        if let Some(record) = self.records.get(&(resource_key.to_string(), page_index)) {
            return Ok(Some(record.value().clone()));
        }
        let Some(store) = &self.store else {
            return Ok(None);
        };

        let loaded = store.get(&store_key(resource_key, page_index)).await?;
        if let Some(record) = &loaded {
            debug!(resource_key, page_index, "Checksum record loaded from store");
            self.records
                .insert((resource_key.to_string(), page_index), record.clone());
        }
        Ok(loaded)
    }

    /// Compare in-memory content against the recorded fingerprint
    pub async fn verify_bytes(
        &self,
        resource_key: &str,
        page_index: u32,
        bytes: &[u8],
    ) -> Result<Verification> {
        let Some(expected) = self.lookup(resource_key, page_index).await? else {
            return Ok(Verification::Unknown);
        };
        let actual_digest = sha256_hex(bytes);
        let actual_length = bytes.len() as u64;
        if expected.matches(&actual_digest, actual_length) {
            Ok(Verification::Valid(expected))
        } else {
            Ok(Verification::Mismatch {
                expected,
                actual_digest,
                actual_length,
            })
        }
    }

    /// Read a file and compare it against the recorded fingerprint
    pub async fn verify_file(
        &self,
        resource_key: &str,
        page_index: u32,
        path: &Path,
    ) -> Result<Verification> {
        if self.lookup(resource_key, page_index).await?.is_none() {
            return Ok(Verification::Unknown);
        }
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| FetchError::io(path, &e))?;
        self.verify_bytes(resource_key, page_index, &bytes).await
    }

    pub async fn remove(&self, resource_key: &str, page_index: u32) -> Result<bool> {
        let in_memory = self
            .records
            .remove(&(resource_key.to_string(), page_index))
            .is_some();
        let durable = match &self.store {
            Some(store) => store.remove(&store_key(resource_key, page_index)).await?,
            None => false,
        };
        Ok(in_memory || durable)
    }

    /// Forget every record, durable ones included. Returns how many records
    /// were dropped.
    pub async fn clear(&self) -> Result<usize> {
        let mut cleared = self.records.len();
        self.records.clear();

        // Key by key: the durable store shares its database with other data.
        if let Some(store) = &self.store {
            let keys = store.keys().await?;
            cleared = cleared.max(keys.len());
            for key in keys {
                store.remove(&key).await?;
            }
        }
        Ok(cleared)
    }

    /// Records known to this process
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl std::fmt::Debug for ChecksumRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChecksumRegistry")
            .field("records", &self.records.len())
            .field("durable", &self.is_durable())
            .finish()
    }
}
