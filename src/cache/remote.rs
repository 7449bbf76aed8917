//! Remote Cache Store - Durable Cold Tier
//!
//! Shared, TTL-capable key-value store speaking the Redis protocol.
//!
//! # Design
//!
//! - Pluggable wire backend (`RemoteBackend`): pooled Redis in production,
//!   in-memory map for tests and offline runs
//! - Every key is namespaced by a `prefix.` so several logical caches can
//!   share one server
//! - One pooled connection per operation, returned to the pool when the
//!   guard drops (success or error)
//! - Backend failures surface as `Error::BackendUnavailable`, never as a miss

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use deadpool_redis::{redis, Pool, PoolConfig, Runtime};
use tracing::{debug, info, instrument, warn};
use url::Url;

use super::codec::Codec;
use super::store::{CacheLookup, CacheStore};
use crate::error::{Error, Result};

/// Default Redis port when the address omits one
pub const DEFAULT_REDIS_PORT: u16 = 6379;

/// Separator appended to namespace prefixes
pub const PREFIX_SEPARATOR: char = '.';

// =============================================================================
// Configuration
// =============================================================================

/// Connection settings for the Redis backend
#[derive(Debug, Clone)]
pub struct RedisConfig {
    /// `host`, `host:port` or `redis://host[:port][/db]`
    pub address: String,
    /// Maximum pooled connections
    pub pool_size: usize,
    /// Timeout for establishing a new connection
    pub connect_timeout: Duration,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            address: "127.0.0.1:6379".to_string(),
            pool_size: 16,
            connect_timeout: Duration::from_secs(5),
        }
    }
}

/// Normalize a user-supplied address into a `redis://` URL, defaulting the
/// port to 6379.
pub fn redis_url(address: &str) -> Result<String> {
    let trimmed = address.trim();
    if trimmed.is_empty() {
        return Err(Error::Config("redis address is empty".to_string()));
    }
    let candidate = if trimmed.contains("://") {
        trimmed.to_string()
    } else {
        format!("redis://{}", trimmed)
    };

    let mut url = Url::parse(&candidate)
        .map_err(|e| Error::Config(format!("invalid redis address '{}': {}", address, e)))?;
    if !matches!(url.scheme(), "redis" | "rediss") {
        return Err(Error::Config(format!(
            "unsupported redis scheme '{}'",
            url.scheme()
        )));
    }
    if url.host_str().map(str::is_empty).unwrap_or(true) {
        return Err(Error::Config(format!("redis address '{}' has no host", address)));
    }
    if url.port().is_none() {
        url.set_port(Some(DEFAULT_REDIS_PORT))
            .map_err(|_| Error::Config(format!("cannot set port on '{}'", address)))?;
    }
    Ok(url.to_string())
}

/// Normalize a namespace prefix so it ends with the separator
pub fn normalize_prefix(prefix: &str) -> String {
    if prefix.is_empty() || prefix.ends_with(PREFIX_SEPARATOR) {
        prefix.to_string()
    } else {
        format!("{}{}", prefix, PREFIX_SEPARATOR)
    }
}

// =============================================================================
// Wire Backend
// =============================================================================

/// Raw key-value commands understood by the remote store
#[async_trait]
pub trait RemoteBackend: Send + Sync {
    /// SET key value, with PXAT unix-ms when an expiry is given
    async fn set(&self, key: &str, value: &str, expire_at_ms: Option<i64>) -> Result<()>;

    /// GET key
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// EXISTS key
    async fn exists(&self, key: &str) -> Result<bool>;

    /// DEL key, returning the number of removed keys
    async fn del(&self, key: &str) -> Result<u64>;

    /// KEYS pattern
    async fn keys(&self, pattern: &str) -> Result<Vec<String>>;

    /// FLUSHDB, true when the server acknowledged
    async fn flush_db(&self) -> Result<bool>;

    /// PING, to verify connectivity
    async fn ping(&self) -> Result<()>;

    /// Human readable backend description for logs
    fn describe(&self) -> String;
}

/// Redis backend over a deadpool connection pool
pub struct RedisBackend {
    pool: Pool,
    url: String,
}

impl RedisBackend {
    /// Build a pooled backend. Connections are opened lazily.
    pub fn connect(config: &RedisConfig) -> Result<Self> {
        let url = redis_url(&config.address)?;
        let mut pool_config = PoolConfig::new(config.pool_size.max(1));
        pool_config.timeouts.create = Some(config.connect_timeout);

        let mut cfg = deadpool_redis::Config::from_url(url.clone());
        cfg.pool = Some(pool_config);

        let pool = cfg
            .create_pool(Some(Runtime::Tokio1))
            .map_err(|e| Error::Config(format!("failed to create redis pool: {}", e)))?;

        info!(url = %url, pool_size = config.pool_size, "Redis backend configured");
        Ok(Self { pool, url })
    }

    /// Wrap an existing pool
    pub fn from_pool(pool: Pool, url: impl Into<String>) -> Self {
        Self {
            pool,
            url: url.into(),
        }
    }
}

/// `SET key value [PXAT unix-ms]`, one command so value and expiry land together
fn set_command(key: &str, value: &str, expire_at_ms: Option<i64>) -> redis::Cmd {
    let mut cmd = redis::cmd("SET");
    cmd.arg(key).arg(value);
    if let Some(at) = expire_at_ms {
        cmd.arg("PXAT").arg(at);
    }
    cmd
}

/// Integer reply of EXISTS and DEL
fn count_reply(reply: &redis::Value) -> Result<u64> {
    match reply {
        redis::Value::Int(n) if *n >= 0 => Ok(*n as u64),
        other => Err(Error::BackendUnavailable(format!(
            "unexpected integer reply: {:?}",
            other
        ))),
    }
}

/// Status reply of FLUSHDB
fn is_ok_reply(reply: &redis::Value) -> bool {
    match reply {
        redis::Value::Okay => true,
        redis::Value::SimpleString(status) => status.eq_ignore_ascii_case("ok"),
        _ => false,
    }
}

#[async_trait]
impl RemoteBackend for RedisBackend {
    async fn set(&self, key: &str, value: &str, expire_at_ms: Option<i64>) -> Result<()> {
        let mut conn = self.pool.get().await?;
        let _: () = set_command(key, value, expire_at_ms)
            .query_async(&mut conn)
            .await?;
        debug!(key, ?expire_at_ms, "Value set");
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.pool.get().await?;
        let value: Option<String> = redis::cmd("GET").arg(key).query_async(&mut conn).await?;
        Ok(value)
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let mut conn = self.pool.get().await?;
        let reply: redis::Value = redis::cmd("EXISTS").arg(key).query_async(&mut conn).await?;
        Ok(count_reply(&reply)? > 0)
    }

    async fn del(&self, key: &str) -> Result<u64> {
        let mut conn = self.pool.get().await?;
        let reply: redis::Value = redis::cmd("DEL").arg(key).query_async(&mut conn).await?;
        count_reply(&reply)
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>> {
        let mut conn = self.pool.get().await?;
        let keys: Vec<String> = redis::cmd("KEYS").arg(pattern).query_async(&mut conn).await?;
        Ok(keys)
    }

    async fn flush_db(&self) -> Result<bool> {
        let mut conn = self.pool.get().await?;
        let reply: redis::Value = redis::cmd("FLUSHDB").query_async(&mut conn).await?;
        Ok(is_ok_reply(&reply))
    }

    async fn ping(&self) -> Result<()> {
        let mut conn = self.pool.get().await?;
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }

    fn describe(&self) -> String {
        format!("redis({})", self.url)
    }
}

/// Stored value with an optional absolute expiry (unix ms)
#[derive(Debug, Clone)]
struct StoredValue {
    text: String,
    expire_at_ms: Option<i64>,
}

impl StoredValue {
    fn is_live(&self, now_ms: i64) -> bool {
        self.expire_at_ms.map(|at| now_ms < at).unwrap_or(true)
    }
}

/// Backend operation counters
#[derive(Debug, Clone, Default)]
pub struct BackendStats {
    pub reads: u64,
    pub writes: u64,
    pub deletes: u64,
}

/// In-memory backend with Redis expiry semantics
#[derive(Default)]
pub struct InMemoryBackend {
    storage: DashMap<String, StoredValue>,
    reads: AtomicU64,
    writes: AtomicU64,
    deletes: AtomicU64,
    unavailable: AtomicBool,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate an outage: every command fails with `BackendUnavailable`
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Write raw wire text, bypassing any codec
    pub fn insert_raw(&self, key: &str, text: &str) {
        self.storage.insert(
            key.to_string(),
            StoredValue {
                text: text.to_string(),
                expire_at_ms: None,
            },
        );
    }

    /// Absolute expiry recorded for a raw key
    pub fn expire_at_ms(&self, key: &str) -> Option<i64> {
        self.storage.get(key).and_then(|v| v.expire_at_ms)
    }

    pub fn stats(&self) -> BackendStats {
        BackendStats {
            reads: self.reads.load(Ordering::Relaxed),
            writes: self.writes.load(Ordering::Relaxed),
            deletes: self.deletes.load(Ordering::Relaxed),
        }
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(Error::BackendUnavailable(
                "in-memory backend marked unavailable".to_string(),
            ));
        }
        Ok(())
    }

    fn live(&self, key: &str) -> Option<String> {
        let now = Utc::now().timestamp_millis();
        let expired = match self.storage.get(key) {
            Some(v) if v.is_live(now) => return Some(v.text.clone()),
            Some(_) => true,
            None => false,
        };
        if expired {
            self.storage.remove_if(key, |_, v| !v.is_live(now));
        }
        None
    }
}

/// Match a KEYS pattern; supports literal keys and `*` wildcards.
fn glob_match(pattern: &str, key: &str) -> bool {
    let parts: Vec<&str> = pattern.split('*').collect();
    if parts.len() == 1 {
        return pattern == key;
    }
    let (first, last) = (parts[0], parts[parts.len() - 1]);
    if !key.starts_with(first) || key.len() < first.len() + last.len() {
        return false;
    }
    let mut rest = &key[first.len()..];
    for middle in &parts[1..parts.len() - 1] {
        match rest.find(middle) {
            Some(idx) => rest = &rest[idx + middle.len()..],
            None => return false,
        }
    }
    rest.ends_with(last)
}

#[async_trait]
impl RemoteBackend for InMemoryBackend {
    async fn set(&self, key: &str, value: &str, expire_at_ms: Option<i64>) -> Result<()> {
        self.check_available()?;
        self.writes.fetch_add(1, Ordering::Relaxed);
        self.storage.insert(
            key.to_string(),
            StoredValue {
                text: value.to_string(),
                expire_at_ms,
            },
        );
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.check_available()?;
        self.reads.fetch_add(1, Ordering::Relaxed);
        Ok(self.live(key))
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        self.check_available()?;
        Ok(self.live(key).is_some())
    }

    async fn del(&self, key: &str) -> Result<u64> {
        self.check_available()?;
        self.deletes.fetch_add(1, Ordering::Relaxed);
        let now = Utc::now().timestamp_millis();
        Ok(match self.storage.remove(key) {
            Some((_, v)) if v.is_live(now) => 1,
            _ => 0,
        })
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>> {
        self.check_available()?;
        let now = Utc::now().timestamp_millis();
        Ok(self
            .storage
            .iter()
            .filter(|e| e.value().is_live(now) && glob_match(pattern, e.key()))
            .map(|e| e.key().clone())
            .collect())
    }

    async fn flush_db(&self) -> Result<bool> {
        self.check_available()?;
        self.storage.clear();
        Ok(true)
    }

    async fn ping(&self) -> Result<()> {
        self.check_available()
    }

    fn describe(&self) -> String {
        "in-memory".to_string()
    }
}

// =============================================================================
// Remote Cache Store
// =============================================================================

/// Namespaced, codec-backed store over a remote backend
pub struct RemoteCacheStore<T> {
    backend: Arc<dyn RemoteBackend>,
    codec: Arc<dyn Codec<T>>,
    prefix: String,
}

impl<T> RemoteCacheStore<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new(backend: Arc<dyn RemoteBackend>, codec: Arc<dyn Codec<T>>, prefix: &str) -> Self {
        let prefix = normalize_prefix(prefix);
        debug!(
            backend = %backend.describe(),
            codec = codec.name(),
            prefix = %prefix,
            "Remote cache store initialized"
        );
        Self {
            backend,
            codec,
            prefix,
        }
    }

    /// Normalized namespace prefix
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Fully qualified key as stored on the backend
    pub fn namespaced(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key)
    }

    /// Read a key, distinguishing absence from undecodable payloads
    #[instrument(skip(self), level = "debug")]
    pub async fn lookup(&self, key: &str) -> Result<CacheLookup<T>> {
        let text = match self.backend.get(&self.namespaced(key)).await? {
            Some(text) => text,
            None => return Ok(CacheLookup::Absent),
        };
        match self.codec.decode(&text) {
            Ok(value) => Ok(CacheLookup::Hit(value)),
            Err(e) => {
                warn!(
                    key,
                    codec = self.codec.name(),
                    error = %e,
                    "Cached payload failed to decode; treating as miss"
                );
                Ok(CacheLookup::Undecodable { reason: e.0 })
            }
        }
    }
}

#[async_trait]
impl<T> CacheStore<T> for RemoteCacheStore<T>
where
    T: Clone + Send + Sync + 'static,
{
    async fn put(&self, key: &str, value: T, expire_at: Option<DateTime<Utc>>) -> Result<()> {
        let text = self.codec.encode(&value).map_err(|e| Error::Encode {
            key: key.to_string(),
            reason: e.0,
        })?;
        self.backend
            .set(
                &self.namespaced(key),
                &text,
                expire_at.map(|at| at.timestamp_millis()),
            )
            .await
    }

    async fn get(&self, key: &str) -> Result<Option<T>> {
        Ok(self.lookup(key).await?.into_option())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        self.backend.exists(&self.namespaced(key)).await
    }

    async fn exists_at(&self, key: &str, _as_of: DateTime<Utc>) -> Result<bool> {
        // Expiry is enforced server-side
        self.exists(key).await
    }

    async fn remove(&self, key: &str) -> Result<bool> {
        Ok(self.backend.del(&self.namespaced(key)).await? == 1)
    }

    async fn clear(&self) -> Result<bool> {
        warn!(backend = %self.backend.describe(), "Flushing remote cache database");
        self.backend.flush_db().await
    }

    async fn keys(&self) -> Result<HashSet<String>> {
        let pattern = format!("{}*", self.prefix);
        let keys = self.backend.keys(&pattern).await?;
        Ok(keys
            .into_iter()
            .filter_map(|k| k.strip_prefix(self.prefix.as_str()).map(str::to_string))
            .collect())
    }

    fn supports_persistence(&self) -> bool {
        true
    }
}

// =============================================================================
// Tests
// =============================================================================
