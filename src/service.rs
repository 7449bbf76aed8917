//! Service Root
//!
//! Builds every cache and download component from one configuration and owns
//! them for the life of the process. Nothing here is global: callers hold a
//! `CacheService` and pass it where it is needed.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::{info, instrument, warn};

use crate::cache::{
    CacheStore, InMemoryBackend, JsonCodec, LocalCacheStore, RedisBackend, RedisConfig,
    RemoteBackend, RemoteCacheStore, TieredCache, TieredCacheConfig, DEFAULT_BASE_EXPIRY,
    DEFAULT_JITTER_RANGE,
};
use crate::download::{
    ChecksumRecord, ChecksumRegistry, ContentSource, Downloader, DownloaderConfig, FetchRequest,
    FetchedResource, HttpContentSource, LocationIndex, DEFAULT_CACHE_DIR, DEFAULT_HTTP_TIMEOUT,
};
use crate::error::{Error, Result};

/// Default remote key namespace
pub const DEFAULT_NAMESPACE: &str = "pixiv";

/// Suffix of the namespace holding checksum records
const CHECKSUM_NAMESPACE_SUFFIX: &str = "-checksum";

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for the whole subsystem
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Redis address (`host`, `host:port` or `redis://...`); `None` keeps the
    /// remote tier in process memory
    pub redis_address: Option<String>,

    /// Maximum pooled Redis connections
    pub redis_pool_size: usize,

    /// Remote key namespace
    pub namespace: String,

    /// Hot-tier lifetime of promoted entries
    pub local_ttl: Duration,

    /// Upper bound of the random offset added to `local_ttl`
    pub local_ttl_jitter: Duration,

    /// Directory holding downloaded binaries
    pub cache_dir: PathBuf,

    /// Longest a caller waits on an in-flight download
    pub fetch_timeout: Option<Duration>,

    /// Per-request HTTP timeout
    pub http_timeout: Duration,

    /// Accept a file already in `cache_dir` when it matches the origin's
    /// length and any recorded checksum
    pub reuse_existing_files: bool,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            redis_address: None,
            redis_pool_size: 16,
            namespace: DEFAULT_NAMESPACE.to_string(),
            local_ttl: DEFAULT_BASE_EXPIRY,
            local_ttl_jitter: DEFAULT_JITTER_RANGE,
            cache_dir: PathBuf::from(DEFAULT_CACHE_DIR),
            fetch_timeout: None,
            http_timeout: DEFAULT_HTTP_TIMEOUT,
            reuse_existing_files: true,
        }
    }
}

impl ServiceConfig {
    pub fn validate(&self) -> Result<()> {
        if self.redis_pool_size == 0 {
            return Err(Error::Config("redis pool size must be at least 1".to_string()));
        }
        if self.cache_dir.as_os_str().is_empty() {
            return Err(Error::Config("cache directory must not be empty".to_string()));
        }
        if self.fetch_timeout.is_some_and(|t| t.is_zero()) {
            return Err(Error::Config("fetch timeout must be positive".to_string()));
        }
        self.tiered_config().validate()
    }

    fn tiered_config(&self) -> TieredCacheConfig {
        TieredCacheConfig::new(self.local_ttl, self.local_ttl_jitter)
    }

    /// Namespace of checksum records, disjoint from the value namespace
    pub fn checksum_namespace(&self) -> String {
        format!("{}{}", self.namespace, CHECKSUM_NAMESPACE_SUFFIX)
    }

    fn downloader_config(&self) -> DownloaderConfig {
        DownloaderConfig {
            cache_dir: self.cache_dir.clone(),
            wait_timeout: self.fetch_timeout,
            reuse_existing: self.reuse_existing_files,
        }
    }
}

/// What `clear_local` removed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClearReport {
    pub indexed_locations: usize,
    pub checksums: usize,
    pub files: usize,
}

// =============================================================================
// Service
// =============================================================================

/// Owner of the tiered cache and the downloader
pub struct CacheService {
    config: ServiceConfig,
    backend: Arc<dyn RemoteBackend>,
    local: Arc<LocalCacheStore<Value>>,
    cache: Arc<TieredCache<Value>>,
    checksums: Arc<ChecksumRegistry>,
    locations: Arc<LocationIndex>,
    downloader: Arc<Downloader>,
}

impl CacheService {
    /// Build from configuration: Redis when an address is set, otherwise an
    /// in-process remote tier, and the HTTP content source.
    pub fn new(config: ServiceConfig) -> Result<Self> {
        config.validate()?;

        let backend: Arc<dyn RemoteBackend> = match &config.redis_address {
            Some(address) => {
                let redis = RedisConfig {
                    address: address.clone(),
                    pool_size: config.redis_pool_size,
                    ..Default::default()
                };
                Arc::new(RedisBackend::connect(&redis)?)
            }
            None => {
                warn!("No Redis address configured, remote tier is in-process only");
                Arc::new(InMemoryBackend::new())
            }
        };
        let source = Arc::new(HttpContentSource::new(config.http_timeout)?);

        Self::with_parts(config, backend, source)
    }

    /// Build over explicit backend and content source
    pub fn with_parts(
        config: ServiceConfig,
        backend: Arc<dyn RemoteBackend>,
        source: Arc<dyn ContentSource>,
    ) -> Result<Self> {
        config.validate()?;

        let local = Arc::new(LocalCacheStore::<Value>::new());
        let remote: Arc<RemoteCacheStore<Value>> = Arc::new(RemoteCacheStore::new(
            backend.clone(),
            Arc::new(JsonCodec::<Value>::new()),
            &config.namespace,
        ));
        let cache = Arc::new(TieredCache::new(
            local.clone(),
            remote,
            config.tiered_config(),
        ));

        // Records outlive the process alongside the files they describe.
        let checksum_store: Arc<RemoteCacheStore<ChecksumRecord>> =
            Arc::new(RemoteCacheStore::new(
                backend.clone(),
                Arc::new(JsonCodec::<ChecksumRecord>::new()),
                &config.checksum_namespace(),
            ));
        let checksums = Arc::new(ChecksumRegistry::with_store(checksum_store));
        let locations = Arc::new(LocationIndex::new());
        let downloader = Downloader::new(
            config.downloader_config(),
            source,
            checksums.clone(),
            locations.clone(),
        );

        info!(
            backend = %backend.describe(),
            namespace = %config.namespace,
            cache_dir = %config.cache_dir.display(),
            "Cache service ready"
        );

        Ok(Self {
            config,
            backend,
            local,
            cache,
            checksums,
            locations,
            downloader,
        })
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    /// The tiered store for structured values
    pub fn cache(&self) -> &Arc<TieredCache<Value>> {
        &self.cache
    }

    pub fn downloader(&self) -> &Arc<Downloader> {
        &self.downloader
    }

    pub fn checksums(&self) -> &Arc<ChecksumRegistry> {
        &self.checksums
    }

    pub fn locations(&self) -> &Arc<LocationIndex> {
        &self.locations
    }

    /// Verify the remote tier answers
    pub async fn ping(&self) -> Result<()> {
        self.backend.ping().await
    }

    /// Bring one artwork page into the cache directory
    #[instrument(skip(self))]
    pub async fn fetch_illust(&self, illust_id: u64, source_url: &str) -> Result<FetchedResource> {
        let request = FetchRequest::for_illust(illust_id, source_url, &self.config.cache_dir)?;
        Ok(self.downloader.fetch(request).await?)
    }

    /// Drop everything kept for the local files: the hot tier, the location
    /// index, the checksum records (durable copies included) and the
    /// downloaded files. Cached values in the remote tier are left intact.
    #[instrument(skip(self))]
    pub async fn clear_local(&self) -> Result<ClearReport> {
        warn!("Clearing all local caches");
        let indexed_locations = self.locations.len();

        self.cache.clear().await?;
        self.locations.clear();
        let checksums = self.checksums.clear().await?;
        let files = self.downloader.purge_cache_dir().await?;

        let report = ClearReport {
            indexed_locations,
            checksums,
            files,
        };
        info!(?report, hot_entries = self.local.len(), "Local caches cleared");
        Ok(report)
    }
}

impl std::fmt::Debug for CacheService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheService")
            .field("backend", &self.backend.describe())
            .field("config", &self.config)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use serde_json::json;

    fn offline_service(dir: &std::path::Path) -> CacheService {
        let config = ServiceConfig {
            cache_dir: dir.to_path_buf(),
            ..Default::default()
        };
        let source = Arc::new(HttpContentSource::new(Duration::from_secs(1)).unwrap());
        CacheService::with_parts(config, Arc::new(InMemoryBackend::new()), source).unwrap()
    }

    #[test]
    fn test_default_config_is_valid() {
        let config = ServiceConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.local_ttl, Duration::from_secs(90 * 60));
        assert_eq!(config.local_ttl_jitter, Duration::from_secs(30 * 60));
        assert!(config.redis_address.is_none());
    }

    #[test]
    fn test_config_validation() {
        let zero_pool = ServiceConfig {
            redis_pool_size: 0,
            ..Default::default()
        };
        assert_matches!(zero_pool.validate(), Err(Error::Config(_)));

        let zero_timeout = ServiceConfig {
            fetch_timeout: Some(Duration::ZERO),
            ..Default::default()
        };
        assert_matches!(zero_timeout.validate(), Err(Error::Config(_)));
    }

    #[tokio::test]
    async fn test_clear_local_keeps_remote() {
        let dir = tempfile::tempdir().unwrap();
        let service = offline_service(dir.path());

        service
            .cache()
            .put_for("ranking", json!({"top": [1, 2, 3]}), Duration::from_secs(60))
            .await
            .unwrap();
        tokio::fs::write(dir.path().join("1_p0.jpg"), b"img").await.unwrap();
        service.locations().insert("1_p0.jpg", dir.path().join("1_p0.jpg"));

        let report = service.clear_local().await.unwrap();
        assert_eq!(report.indexed_locations, 1);
        assert_eq!(report.files, 1);
        assert!(service.locations().is_empty());
        assert!(!service.cache().hot().exists("ranking").await.unwrap());
        assert!(service.cache().cold().exists("ranking").await.unwrap());
        assert!(service.ping().await.is_ok());
    }

    #[test]
    fn test_checksum_namespace_is_disjoint() {
        let config = ServiceConfig::default();
        assert_eq!(config.checksum_namespace(), "pixiv-checksum");
        assert!(config.downloader_config().reuse_existing);

        let no_reuse = ServiceConfig {
            reuse_existing_files: false,
            ..Default::default()
        };
        assert!(!no_reuse.downloader_config().reuse_existing);
    }

    #[tokio::test]
    async fn test_clear_local_drops_durable_checksums_only() {
        let dir = tempfile::tempdir().unwrap();
        let backend = Arc::new(InMemoryBackend::new());
        let config = ServiceConfig {
            cache_dir: dir.path().to_path_buf(),
            ..Default::default()
        };
        let source = Arc::new(HttpContentSource::new(Duration::from_secs(1)).unwrap());
        let service = CacheService::with_parts(config, backend.clone(), source).unwrap();

        service.checksums().record("illust:1", 0, "ab", 2).await;
        service
            .cache()
            .put_for("ranking", json!([1]), Duration::ZERO)
            .await
            .unwrap();
        assert!(backend.exists("pixiv-checksum.illust:1:p0").await.unwrap());

        let report = service.clear_local().await.unwrap();
        assert_eq!(report.checksums, 1);
        assert!(!backend.exists("pixiv-checksum.illust:1:p0").await.unwrap());
        assert!(backend.exists("pixiv.ranking").await.unwrap());
    }

    #[tokio::test]
    async fn test_fetch_illust_rejects_nameless_url() {
        let dir = tempfile::tempdir().unwrap();
        let service = offline_service(dir.path());
        let err = service.fetch_illust(1, "https://i.pximg.net/").await.unwrap_err();
        assert_matches!(err, Error::Fetch(_));
    }
}
