//! pixiv-cache Integration Tests
//!
//! End-to-end scenarios across the public API:
//! - Tiered cache: write-through, hot reset, re-promotion
//! - Downloader: coalescing, failure fan-out and retry, file reuse, timeouts

use std::sync::Arc;
use std::time::Duration;

use pixiv_cache::cache::InMemoryBackend;
use pixiv_cache::download::{sha256_hex, HttpContentSource};
use pixiv_cache::service::{CacheService, ServiceConfig};
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const IMAGE: &[u8] = b"\x89PNG fake image body for page zero";

fn service_in(dir: &std::path::Path, fetch_timeout: Option<Duration>) -> CacheService {
    service_over(Arc::new(InMemoryBackend::new()), dir, fetch_timeout)
}

/// Service sharing a remote backend, as a restarted process would
fn service_over(
    backend: Arc<InMemoryBackend>,
    dir: &std::path::Path,
    fetch_timeout: Option<Duration>,
) -> CacheService {
    let config = ServiceConfig {
        cache_dir: dir.to_path_buf(),
        fetch_timeout,
        ..Default::default()
    };
    let source = Arc::new(HttpContentSource::new(Duration::from_secs(5)).unwrap());
    CacheService::with_parts(config, backend, source).unwrap()
}

fn image_url(server: &MockServer, name: &str) -> String {
    format!("{}/img-original/img/2024/01/01/00/00/00/{}", server.uri(), name)
}

// =============================================================================
// Tiered Cache
// =============================================================================

mod tiered_cache_tests {
    use super::*;
    use chrono::Utc;
    use pixiv_cache::cache::{
        CacheStore, JsonCodec, LocalCacheStore, RemoteCacheStore, TieredCache, TieredCacheConfig,
    };
    use serde_json::{json, Value};

    struct Tiers {
        local: Arc<LocalCacheStore<Value>>,
        remote: Arc<RemoteCacheStore<Value>>,
        cache: TieredCache<Value>,
    }

    fn tiers(config: TieredCacheConfig) -> Tiers {
        let local: Arc<LocalCacheStore<Value>> = Arc::new(LocalCacheStore::new());
        let remote: Arc<RemoteCacheStore<Value>> = Arc::new(RemoteCacheStore::new(
            Arc::new(InMemoryBackend::new()),
            Arc::new(JsonCodec::<Value>::new()),
            "pixiv",
        ));
        let cache = TieredCache::new(local.clone(), remote.clone(), config);
        Tiers {
            local,
            remote,
            cache,
        }
    }

    #[tokio::test]
    async fn test_ranking_put_clear_and_repromote() {
        let config = TieredCacheConfig::new(Duration::from_secs(90 * 60), Duration::from_secs(30 * 60));
        let t = tiers(config);
        let ranking = json!({
            "mode": "daily",
            "contents": [{"illust_id": 123, "rank": 1}, {"illust_id": 456, "rank": 2}]
        });

        t.cache
            .put_for("ranking:daily", ranking.clone(), Duration::from_secs(3600))
            .await
            .unwrap();
        assert_eq!(t.local.get("ranking:daily").await.unwrap(), Some(ranking.clone()));
        assert_eq!(t.remote.get("ranking:daily").await.unwrap(), Some(ranking.clone()));

        // Reset the hot tier; the remote copy survives and is promoted again.
        assert!(t.cache.clear().await.unwrap());
        assert!(!t.local.exists("ranking:daily").await.unwrap());

        let before = Utc::now();
        assert_eq!(t.cache.get("ranking:daily").await.unwrap(), Some(ranking.clone()));
        let after = Utc::now();

        let expiry = t.local.expiry_of("ranking:daily").unwrap().unwrap();
        assert!(expiry >= before + chrono::Duration::minutes(90));
        assert!(expiry < after + chrono::Duration::minutes(120));
        assert_eq!(t.cache.metrics().promotions, 1);

        // Served from the hot tier now.
        assert_eq!(t.cache.get("ranking:daily").await.unwrap(), Some(ranking));
        assert_eq!(t.cache.metrics().hot_hits, 1);
    }

    #[tokio::test]
    async fn test_missing_key_is_absent_not_error() {
        let t = tiers(TieredCacheConfig::default());
        assert_eq!(t.cache.get("ranking:weekly").await.unwrap(), None);
        assert!(!t.cache.exists("ranking:weekly").await.unwrap());
    }

    #[tokio::test]
    async fn test_service_cache_is_namespaced() {
        let dir = tempfile::tempdir().unwrap();
        let service = service_in(dir.path(), None);
        service
            .cache()
            .put_for("illust:123:meta", json!({"title": "t"}), Duration::ZERO)
            .await
            .unwrap();

        let keys = service.cache().cold().keys().await.unwrap();
        assert!(keys.contains("illust:123:meta"));
    }
}

// =============================================================================
// Single-Flight Downloader
// =============================================================================

mod downloader_tests {
    use super::*;
    use assert_matches::assert_matches;
    use pixiv_cache::download::{pixiv_referer, FetchError};
    use pixiv_cache::Error;

    #[tokio::test]
    async fn test_two_simultaneous_fetches_share_one_get() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/img-original/img/2024/01/01/00/00/00/123_p0.jpg"))
            .and(header("referer", pixiv_referer(123).as_str()))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_bytes(IMAGE.to_vec())
                    .set_delay(Duration::from_millis(200)),
            )
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let service = service_in(dir.path(), None);
        let url = image_url(&server, "123_p0.jpg");

        let (a, b) = tokio::join!(
            service.fetch_illust(123, &url),
            service.fetch_illust(123, &url)
        );
        let (a, b) = (a.unwrap(), b.unwrap());

        assert_eq!(a.path, b.path);
        assert_eq!(a.path, dir.path().join("123_p0.jpg"));
        assert_eq!(a.resource_key, "illust:123:p0");

        let record = service
            .checksums()
            .lookup("illust:123", 0)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.digest, sha256_hex(IMAGE));
        assert_eq!(record.byte_length, IMAGE.len() as u64);
        assert_eq!(a.checksum, record);
        assert_eq!(tokio::fs::read(&a.path).await.unwrap(), IMAGE);
        assert_eq!(service.downloader().stats().physical_fetches, 1);
        assert_eq!(service.downloader().in_flight_count(), 0);
    }

    #[tokio::test]
    async fn test_failure_reaches_every_waiter_and_retry_refetches() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500).set_delay(Duration::from_millis(100)))
            .up_to_n_times(1)
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(IMAGE.to_vec()))
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let service = service_in(dir.path(), None);
        let url = image_url(&server, "77_p0.jpg");

        let (a, b) = tokio::join!(
            service.fetch_illust(77, &url),
            service.fetch_illust(77, &url)
        );
        assert_matches!(a, Err(Error::Fetch(FetchError::HttpStatus { status: 500, .. })));
        assert_matches!(b, Err(Error::Fetch(FetchError::HttpStatus { status: 500, .. })));
        assert!(!service.downloader().is_in_flight("illust:77:p0"));
        assert!(service
            .checksums()
            .lookup("illust:77", 0)
            .await
            .unwrap()
            .is_none());

        let retried = service.fetch_illust(77, &url).await.unwrap();
        assert!(!retried.reused);
        assert_eq!(tokio::fs::read(&retried.path).await.unwrap(), IMAGE);
    }

    #[tokio::test]
    async fn test_existing_file_is_reused_without_get() {
        let server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-length", IMAGE.len().to_string().as_str()),
            )
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(IMAGE.to_vec()))
            .expect(0)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join("55_p2.jpg"), IMAGE).await.unwrap();
        let service = service_in(dir.path(), None);

        let fetched = service
            .fetch_illust(55, &image_url(&server, "55_p2.jpg"))
            .await
            .unwrap();
        assert!(fetched.reused);
        assert_eq!(fetched.resource_key, "illust:55:p2");
        assert_eq!(
            service.locations().get("55_p2.jpg"),
            Some(dir.path().join("55_p2.jpg"))
        );
        let record = service
            .checksums()
            .lookup("illust:55", 2)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.digest, sha256_hex(IMAGE));
    }

    #[tokio::test]
    async fn test_wait_timeout_is_distinguishable_and_fetch_completes() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_bytes(IMAGE.to_vec())
                    .set_delay(Duration::from_millis(300)),
            )
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let service = service_in(dir.path(), Some(Duration::from_millis(30)));
        let url = image_url(&server, "9_p0.jpg");

        let err = service.fetch_illust(9, &url).await.unwrap_err();
        assert_matches!(err, Error::Fetch(ref e) if e.is_timeout());

        while service.downloader().is_in_flight("illust:9:p0") {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        let record = service
            .checksums()
            .lookup("illust:9", 0)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.byte_length, IMAGE.len() as u64);

        // Later callers are answered from the location index.
        let fetched = service.fetch_illust(9, &url).await.unwrap();
        assert!(fetched.reused);
    }

    #[tokio::test]
    async fn test_clear_local_forces_refetch() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(IMAGE.to_vec()))
            .expect(2)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let service = service_in(dir.path(), None);
        let url = image_url(&server, "31_p0.jpg");

        service.fetch_illust(31, &url).await.unwrap();
        let report = service.clear_local().await.unwrap();
        assert_eq!(report.files, 1);
        assert_eq!(report.checksums, 1);

        let again = service.fetch_illust(31, &url).await.unwrap();
        assert!(!again.reused);
    }

    #[tokio::test]
    async fn test_restarted_service_rejects_same_length_corruption() {
        const CORRUPT: &[u8] = b"\x89PNG fake image body for page zer0";
        assert_eq!(CORRUPT.len(), IMAGE.len());

        let server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-length", IMAGE.len().to_string().as_str()),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(IMAGE.to_vec()))
            .expect(2)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let backend = Arc::new(InMemoryBackend::new());
        let url = image_url(&server, "66_p0.jpg");

        let first = service_over(backend.clone(), dir.path(), None);
        let fetched = first.fetch_illust(66, &url).await.unwrap();
        assert!(!fetched.reused);
        drop(first);

        // The file is damaged while no process is running.
        tokio::fs::write(&fetched.path, CORRUPT).await.unwrap();

        let restarted = service_over(backend, dir.path(), None);
        assert!(restarted.checksums().is_empty());
        let again = restarted.fetch_illust(66, &url).await.unwrap();
        assert!(!again.reused);
        assert_eq!(again.checksum.digest, sha256_hex(IMAGE));
        assert_eq!(tokio::fs::read(&again.path).await.unwrap(), IMAGE);
    }

    #[tokio::test]
    async fn test_restarted_service_reuses_intact_file() {
        let server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-length", IMAGE.len().to_string().as_str()),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(IMAGE.to_vec()))
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let backend = Arc::new(InMemoryBackend::new());
        let url = image_url(&server, "67_p0.jpg");

        service_over(backend.clone(), dir.path(), None)
            .fetch_illust(67, &url)
            .await
            .unwrap();

        let restarted = service_over(backend, dir.path(), None);
        let again = restarted.fetch_illust(67, &url).await.unwrap();
        assert!(again.reused);
        assert_eq!(again.checksum.digest, sha256_hex(IMAGE));
    }
}
