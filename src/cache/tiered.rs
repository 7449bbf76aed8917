//! Tiered Cache - Hot Local Tier over Durable Remote Tier
//!
//! Composes a fast, process-local store over the authoritative remote store.
//!
//! # Policy
//!
//! - Writes go to both tiers (cold first, then hot)
//! - Reads try hot, then cold; a cold hit is promoted into the hot tier
//!   with `base_expiry + uniform[0, jitter_range)` so keys promoted together
//!   do not expire together
//! - `clear` only drops the hot tier; the cold tier is the system of record
//! - Hot tier failures are logged and fall through to the cold tier; cold
//!   tier failures propagate

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::Rng;
use tracing::{debug, instrument, warn};

use super::metrics::{CacheMetrics, MetricsSnapshot};
use super::store::CacheStore;
use crate::error::{Error, Result};

/// Default hot-tier lifetime for promoted entries (90 minutes)
pub const DEFAULT_BASE_EXPIRY: Duration = Duration::from_secs(90 * 60);

/// Default upper bound of the random offset (30 minutes)
pub const DEFAULT_JITTER_RANGE: Duration = Duration::from_secs(30 * 60);

/// Tiered cache configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TieredCacheConfig {
    /// Hot-tier lifetime of a promoted entry
    pub base_expiry: Duration,
    /// Exclusive upper bound of the random offset added to `base_expiry`
    pub jitter_range: Duration,
}

impl Default for TieredCacheConfig {
    fn default() -> Self {
        Self {
            base_expiry: DEFAULT_BASE_EXPIRY,
            jitter_range: DEFAULT_JITTER_RANGE,
        }
    }
}

impl TieredCacheConfig {
    pub fn new(base_expiry: Duration, jitter_range: Duration) -> Self {
        Self {
            base_expiry,
            jitter_range,
        }
    }

    /// Reject configurations whose expiry cannot be represented
    pub fn validate(&self) -> Result<()> {
        let total = self
            .base_expiry
            .checked_add(self.jitter_range)
            .ok_or_else(|| Error::Config("base expiry + jitter overflows".to_string()))?;
        chrono::Duration::from_std(total)
            .map_err(|_| Error::Config(format!("expiry {:?} out of range", total)))?;
        Ok(())
    }

    /// Draw one jittered lifetime: `base_expiry + uniform[0, jitter_range)`
    pub fn jittered_lifetime(&self) -> Duration {
        let jitter_ms = self.jitter_range.as_millis() as u64;
        let offset = if jitter_ms == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..jitter_ms)
        };
        self.base_expiry + Duration::from_millis(offset)
    }
}

/// Two-tier cache with read-through promotion
pub struct TieredCache<T> {
    hot: Arc<dyn CacheStore<T>>,
    cold: Arc<dyn CacheStore<T>>,
    config: TieredCacheConfig,
    metrics: Arc<CacheMetrics>,
}

impl<T> TieredCache<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new(
        hot: Arc<dyn CacheStore<T>>,
        cold: Arc<dyn CacheStore<T>>,
        config: TieredCacheConfig,
    ) -> Self {
        debug!(
            base_expiry = ?config.base_expiry,
            jitter_range = ?config.jitter_range,
            "Tiered cache initialized"
        );
        Self {
            hot,
            cold,
            config,
            metrics: Arc::new(CacheMetrics::new()),
        }
    }

    pub fn config(&self) -> &TieredCacheConfig {
        &self.config
    }

    pub fn hot(&self) -> &Arc<dyn CacheStore<T>> {
        &self.hot
    }

    pub fn cold(&self) -> &Arc<dyn CacheStore<T>> {
        &self.cold
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Absolute hot-tier expiry for a value promoted now.
    ///
    /// A zero lifetime means "no expiry"; an unrepresentable instant also
    /// falls back to no expiry.
    fn promotion_expiry(&self) -> Option<DateTime<Utc>> {
        let lifetime = self.config.jittered_lifetime();
        if lifetime.is_zero() {
            return None;
        }
        chrono::Duration::from_std(lifetime)
            .ok()
            .and_then(|delta| Utc::now().checked_add_signed(delta))
    }

    async fn hot_exists(&self, key: &str) -> bool {
        match self.hot.exists(key).await {
            Ok(found) => found,
            Err(e) => {
                self.metrics.record_hot_error();
                warn!(key, error = %e, "Hot tier exists check failed; deferring to cold tier");
                false
            }
        }
    }

    async fn promote(&self, key: &str, value: T) {
        let expiry = self.promotion_expiry();
        match self.hot.put(key, value, expiry).await {
            Ok(()) => {
                self.metrics.record_promotion();
                debug!(key, expires_at = ?expiry, "Promoted into hot tier");
            }
            Err(e) => {
                self.metrics.record_hot_error();
                warn!(key, error = %e, "Hot tier promotion failed");
            }
        }
    }
}

#[async_trait]
impl<T> CacheStore<T> for TieredCache<T>
where
    T: Clone + Send + Sync + 'static,
{
    #[instrument(skip(self, value), level = "debug")]
    async fn put(&self, key: &str, value: T, expire_at: Option<DateTime<Utc>>) -> Result<()> {
        self.cold.put(key, value.clone(), expire_at).await?;
        if let Err(e) = self.hot.put(key, value, expire_at).await {
            self.metrics.record_hot_error();
            warn!(key, error = %e, "Hot tier write failed; cold tier holds the value");
        }
        Ok(())
    }

    #[instrument(skip(self), level = "debug")]
    async fn get(&self, key: &str) -> Result<Option<T>> {
        if !self.exists(key).await? {
            self.metrics.record_short_circuit_miss();
            debug!(key, "Key absent from both tiers");
            return Ok(None);
        }

        match self.hot.get(key).await {
            Ok(Some(value)) => {
                self.metrics.record_hot_hit();
                return Ok(Some(value));
            }
            Ok(None) => self.metrics.record_hot_miss(),
            Err(e) => {
                self.metrics.record_hot_error();
                warn!(key, error = %e, "Hot tier read failed; deferring to cold tier");
            }
        }

        match self.cold.get(key).await? {
            Some(value) => {
                self.metrics.record_cold_hit();
                self.promote(key, value.clone()).await;
                Ok(Some(value))
            }
            None => {
                // Expired or removed between the existence check and the read
                self.metrics.record_cold_miss();
                debug!(key, "Cold tier miss after positive existence check");
                Ok(None)
            }
        }
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        if self.hot_exists(key).await {
            return Ok(true);
        }
        self.cold.exists(key).await
    }

    async fn exists_at(&self, key: &str, as_of: DateTime<Utc>) -> Result<bool> {
        if self.hot.exists_at(key, as_of).await.unwrap_or(false) {
            return Ok(true);
        }
        self.cold.exists_at(key, as_of).await
    }

    async fn remove(&self, key: &str) -> Result<bool> {
        let cold_removed = self.cold.remove(key).await?;
        let hot_removed = match self.hot.remove(key).await {
            Ok(removed) => removed,
            Err(e) => {
                self.metrics.record_hot_error();
                warn!(key, error = %e, "Hot tier remove failed");
                false
            }
        };
        Ok(cold_removed || hot_removed)
    }

    /// Clears the hot tier only.
    async fn clear(&self) -> Result<bool> {
        debug!("Clearing hot tier");
        self.hot.clear().await
    }

    async fn keys(&self) -> Result<HashSet<String>> {
        let mut keys = self.cold.keys().await?;
        match self.hot.keys().await {
            Ok(hot_keys) => keys.extend(hot_keys),
            Err(e) => warn!(error = %e, "Hot tier key enumeration failed"),
        }
        Ok(keys)
    }

    fn supports_persistence(&self) -> bool {
        self.hot.supports_persistence() || self.cold.supports_persistence()
    }
}

// =============================================================================
// Tests
// =============================================================================
