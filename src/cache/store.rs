//! Cache Store Capability
//!
//! The one trait satisfied by the local, remote and tiered stores. Concrete
//! variants are chosen when the service root is built and passed around as
//! `Arc<dyn CacheStore<T>>`.

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::{Error, Result};

/// Tagged outcome of a store read
#[derive(Debug, Clone, PartialEq)]
pub enum CacheLookup<T> {
    /// Value present and decoded
    Hit(T),
    /// Key not present (or expired)
    Absent,
    /// Key present but the stored payload could not be decoded
    Undecodable { reason: String },
}

impl<T> CacheLookup<T> {
    /// Collapse into an option; undecodable payloads read as misses.
    pub fn into_option(self) -> Option<T> {
        match self {
            CacheLookup::Hit(value) => Some(value),
            CacheLookup::Absent | CacheLookup::Undecodable { .. } => None,
        }
    }

    pub fn is_hit(&self) -> bool {
        matches!(self, CacheLookup::Hit(_))
    }
}

/// Convert a relative TTL into an absolute expiry instant.
///
/// A zero TTL means "never expires". A TTL whose expiry instant cannot be
/// represented is a configuration error.
pub fn expiry_after(ttl: Duration) -> Result<Option<DateTime<Utc>>> {
    if ttl.is_zero() {
        return Ok(None);
    }
    chrono::Duration::from_std(ttl)
        .ok()
        .and_then(|delta| Utc::now().checked_add_signed(delta))
        .map(Some)
        .ok_or_else(|| Error::Config(format!("ttl {:?} is out of range", ttl)))
}

/// Key-value cache capability shared by every tier
#[async_trait]
pub trait CacheStore<T>: Send + Sync
where
    T: Clone + Send + Sync + 'static,
{
    /// Store a value, optionally expiring at an absolute instant
    async fn put(&self, key: &str, value: T, expire_at: Option<DateTime<Utc>>) -> Result<()>;

    /// Store a value for a relative TTL (zero = no expiry)
    async fn put_for(&self, key: &str, value: T, ttl: Duration) -> Result<()> {
        let expire_at = expiry_after(ttl)?;
        self.put(key, value, expire_at).await
    }

    /// Read a value; `None` when absent, expired or undecodable
    async fn get(&self, key: &str) -> Result<Option<T>>;

    /// Whether the key is currently present
    async fn exists(&self, key: &str) -> Result<bool>;

    /// Whether the key is present as of the given instant
    async fn exists_at(&self, key: &str, as_of: DateTime<Utc>) -> Result<bool>;

    /// Remove a key, returning true if something was deleted
    async fn remove(&self, key: &str) -> Result<bool>;

    /// Drop every entry this store owns
    async fn clear(&self) -> Result<bool>;

    /// Enumerate the logical keys held by this store
    async fn keys(&self) -> Result<HashSet<String>>;

    /// Whether entries survive a process restart
    fn supports_persistence(&self) -> bool;
}
