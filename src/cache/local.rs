//! Local Cache Store - In-Process Hot Tier
//!
//! Memory-resident key-value map with per-entry absolute expiry.
//!
//! # Design
//!
//! - DashMap for concurrent access without a global lock
//! - Lazy purge: reads check expiry and drop stale entries on the spot
//! - No persistence, no capacity-based eviction

use std::collections::HashSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;

use super::store::CacheStore;
use crate::error::Result;

/// A value held by the local store
#[derive(Debug, Clone)]
struct LocalEntry<T> {
    value: T,
    expires_at: Option<DateTime<Utc>>,
}

impl<T> LocalEntry<T> {
    #[inline]
    fn is_expired_at(&self, at: DateTime<Utc>) -> bool {
        matches!(self.expires_at, Some(expiry) if at >= expiry)
    }
}

/// Process-local cache store
pub struct LocalCacheStore<T> {
    entries: DashMap<String, LocalEntry<T>>,
}

impl<T> LocalCacheStore<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    /// Remembered expiry of a live entry (`Some(None)` = never expires)
    pub fn expiry_of(&self, key: &str) -> Option<Option<DateTime<Utc>>> {
        self.entries
            .get(key)
            .filter(|entry| !entry.is_expired_at(Utc::now()))
            .map(|entry| entry.expires_at)
    }

    /// Drop every expired entry, returning how many were removed
    pub fn purge_expired(&self) -> usize {
        let now = Utc::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired_at(now));
        before.saturating_sub(self.entries.len())
    }

    /// Number of stored entries, including ones not yet purged
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn read(&self, key: &str) -> Option<T> {
        let now = Utc::now();
        let expired = match self.entries.get(key) {
            Some(entry) if !entry.is_expired_at(now) => return Some(entry.value.clone()),
            Some(_) => true,
            None => false,
        };
        if expired {
            self.entries
                .remove_if(key, |_, entry| entry.is_expired_at(now));
        }
        None
    }
}

impl<T> Default for LocalCacheStore<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<T> CacheStore<T> for LocalCacheStore<T>
where
    T: Clone + Send + Sync + 'static,
{
    async fn put(&self, key: &str, value: T, expire_at: Option<DateTime<Utc>>) -> Result<()> {
        self.entries.insert(
            key.to_string(),
            LocalEntry {
                value,
                expires_at: expire_at,
            },
        );
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<T>> {
        Ok(self.read(key))
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.read(key).is_some())
    }

    async fn exists_at(&self, key: &str, as_of: DateTime<Utc>) -> Result<bool> {
        Ok(self
            .entries
            .get(key)
            .map(|entry| !entry.is_expired_at(as_of))
            .unwrap_or(false))
    }

    async fn remove(&self, key: &str) -> Result<bool> {
        Ok(self.entries.remove(key).is_some())
    }

    async fn clear(&self) -> Result<bool> {
        self.entries.clear();
        Ok(true)
    }

    async fn keys(&self) -> Result<HashSet<String>> {
        let now = Utc::now();
        Ok(self
            .entries
            .iter()
            .filter(|entry| !entry.value().is_expired_at(now))
            .map(|entry| entry.key().clone())
            .collect())
    }

    fn supports_persistence(&self) -> bool {
        false
    }
}

// =============================================================================
// Tests
// =============================================================================
