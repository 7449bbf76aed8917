//! Single-Flight Downloader
//!
//! Brings remote binaries into the local cache directory with at most one
//! physical fetch per resource key at any time.
//!
//! # Design
//!
//! - Callers for the same resource key share one detached fetch task and all
//!   observe its single outcome through a `watch` channel
//! - The registration map lock is held only to insert or remove, never while
//!   waiting
//! - The registration is removed before the outcome is published, so a caller
//!   arriving after a failure starts a fresh attempt
//! - A caller's wait limit abandons the wait, not the fetch
//! - An existing destination file is reused without a GET when its size
//!   matches the origin's `Content-Length` and its digest matches any
//!   recorded checksum

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::time::timeout;
use tracing::{debug, info, instrument, warn};

use super::checksum::{sha256_hex, ChecksumRecord, ChecksumRegistry};
use super::error::FetchError;
use super::location::LocationIndex;
use super::request::FetchRequest;
use super::source::ContentSource;

/// Directory binaries are written to when none is configured
pub const DEFAULT_CACHE_DIR: &str = "data/image/cgj";

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for the downloader
#[derive(Debug, Clone)]
pub struct DownloaderConfig {
    /// Directory holding downloaded binaries
    pub cache_dir: PathBuf,

    /// Longest a caller waits for an in-flight fetch (`None` waits forever)
    pub wait_timeout: Option<Duration>,

    /// Check an existing destination file against the origin before
    /// downloading it again; when off, every miss is a fresh GET
    pub reuse_existing: bool,
}

impl Default for DownloaderConfig {
    fn default() -> Self {
        Self {
            cache_dir: PathBuf::from(DEFAULT_CACHE_DIR),
            wait_timeout: None,
            reuse_existing: true,
        }
    }
}

// =============================================================================
// Outcomes
// =============================================================================

/// A resource available on local storage
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedResource {
    pub resource_key: String,
    pub resource_name: String,
    pub path: PathBuf,
    pub checksum: ChecksumRecord,
    /// Served from a file already on disk rather than a new download
    pub reused: bool,
}

pub type FetchOutcome = std::result::Result<FetchedResource, FetchError>;

/// Downloader counters
#[derive(Debug, Default)]
struct DownloadStats {
    physical_fetches: AtomicU64,
    coalesced: AtomicU64,
    reused: AtomicU64,
    index_hits: AtomicU64,
    failures: AtomicU64,
}

/// Point-in-time downloader counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DownloadStatsSnapshot {
    /// GETs actually issued
    pub physical_fetches: u64,
    /// Callers that joined an existing in-flight fetch
    pub coalesced: u64,
    /// Existing files accepted after the length check
    pub reused: u64,
    /// Requests answered from the location index
    pub index_hits: u64,
    /// Fetch attempts that ended in failure
    pub failures: u64,
}

struct InFlight {
    outcome: watch::Receiver<Option<FetchOutcome>>,
    started_at: DateTime<Utc>,
}

// =============================================================================
// Downloader
// =============================================================================

/// Deduplicating downloader over a [`ContentSource`]
pub struct Downloader {
    config: DownloaderConfig,
    source: Arc<dyn ContentSource>,
    checksums: Arc<ChecksumRegistry>,
    locations: Arc<LocationIndex>,
    /// In-flight fetches by resource key
    in_flight: Mutex<HashMap<String, InFlight>>,
    stats: DownloadStats,
}

impl Downloader {
    pub fn new(
        config: DownloaderConfig,
        source: Arc<dyn ContentSource>,
        checksums: Arc<ChecksumRegistry>,
        locations: Arc<LocationIndex>,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            source,
            checksums,
            locations,
            in_flight: Mutex::new(HashMap::new()),
            stats: DownloadStats::default(),
        })
    }

    pub fn config(&self) -> &DownloaderConfig {
        &self.config
    }

    pub fn checksums(&self) -> &Arc<ChecksumRegistry> {
        &self.checksums
    }

    pub fn locations(&self) -> &Arc<LocationIndex> {
        &self.locations
    }

    /// Check if a resource key has a fetch in progress
    pub fn is_in_flight(&self, resource_key: &str) -> bool {
        self.in_flight.lock().contains_key(resource_key)
    }

    /// Get count of in-flight fetches
    pub fn in_flight_count(&self) -> usize {
        self.in_flight.lock().len()
    }

    /// When the in-flight fetch for a key was started
    pub fn in_flight_since(&self, resource_key: &str) -> Option<DateTime<Utc>> {
        self.in_flight
            .lock()
            .get(resource_key)
            .map(|entry| entry.started_at)
    }

    pub fn stats(&self) -> DownloadStatsSnapshot {
        DownloadStatsSnapshot {
            physical_fetches: self.stats.physical_fetches.load(Ordering::Relaxed),
            coalesced: self.stats.coalesced.load(Ordering::Relaxed),
            reused: self.stats.reused.load(Ordering::Relaxed),
            index_hits: self.stats.index_hits.load(Ordering::Relaxed),
            failures: self.stats.failures.load(Ordering::Relaxed),
        }
    }

    /// Make a resource available locally
    #[instrument(skip(self, request), fields(resource_key = %request.resource_key()))]
    pub async fn fetch(self: &Arc<Self>, request: FetchRequest) -> FetchOutcome {
        let resource_key = request.resource_key();

        if let Some(indexed) = self.from_index(&request).await {
            self.stats.index_hits.fetch_add(1, Ordering::Relaxed);
            debug!("Location index hit: {}", indexed.path.display());
            return Ok(indexed);
        }

        // A file being written by an in-flight fetch is never inspected.
        if self.config.reuse_existing && !self.is_in_flight(&resource_key) {
            match self.reuse_existing(&request).await {
                Ok(Some(reused)) => {
                    self.stats.reused.fetch_add(1, Ordering::Relaxed);
                    info!("Reusing existing file {}", reused.path.display());
                    return Ok(reused);
                }
                Ok(None) => {}
                Err(e) => warn!("Existing-file check failed, fetching instead: {}", e),
            }
        }

        let outcome = self.join_or_start(request);
        self.await_outcome(&resource_key, outcome).await
    }

    /// Remove every file in the cache directory, returning how many went
    pub async fn purge_cache_dir(&self) -> std::result::Result<usize, FetchError> {
        let dir = &self.config.cache_dir;
        let mut entries = match tokio::fs::read_dir(dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(FetchError::io(dir, &e)),
        };

        let mut removed = 0;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| FetchError::io(dir, &e))?
        {
            let is_file = entry.file_type().await.map(|t| t.is_file()).unwrap_or(false);
            if !is_file {
                continue;
            }
            let path = entry.path();
            match tokio::fs::remove_file(&path).await {
                Ok(()) => removed += 1,
                Err(e) => warn!("Failed to remove cached file {}: {}", path.display(), e),
            }
        }
        info!("Removed {} cached files from {}", removed, dir.display());
        Ok(removed)
    }

    // =========================================================================
    // Short circuits
    // =========================================================================

    async fn from_index(&self, request: &FetchRequest) -> Option<FetchedResource> {
        let name = request.resource_name();
        let path = self.locations.resolve(&name).await?;
        // An unreachable checksum store means the index cannot be trusted.
        let checksum = self
            .checksums
            .lookup(request.resource(), request.page_index())
            .await
            .ok()
            .flatten()?;

        let len = tokio::fs::metadata(&path).await.ok()?.len();
        if len != checksum.byte_length {
            debug!("Indexed file {} changed size, ignoring index", path.display());
            return None;
        }

        Some(FetchedResource {
            resource_key: request.resource_key(),
            resource_name: name,
            path,
            checksum,
            reused: true,
        })
    }

    async fn reuse_existing(
        &self,
        request: &FetchRequest,
    ) -> std::result::Result<Option<FetchedResource>, FetchError> {
        let destination = request.destination();
        let local_len = match tokio::fs::metadata(destination).await {
            Ok(meta) if meta.is_file() => meta.len(),
            _ => return Ok(None),
        };
        // An empty file is a placeholder from an unfinished fetch.
        if local_len == 0 {
            return Ok(None);
        }

        let remote_len = self
            .source
            .content_length(request.source_url(), request.referer())
            .await?;
        if remote_len != Some(local_len) {
            debug!(
                local_len,
                ?remote_len,
                "Existing file size differs from origin"
            );
            return Ok(None);
        }

        let bytes = tokio::fs::read(destination)
            .await
            .map_err(|e| FetchError::io(destination, &e))?;
        // The file may have been rewritten since its size was taken.
        let read_len = bytes.len() as u64;
        if read_len != local_len {
            debug!(local_len, read_len, "Existing file changed while being read");
            return Ok(None);
        }
        let digest = sha256_hex(&bytes);

        let recorded = self
            .checksums
            .lookup(request.resource(), request.page_index())
            .await
            .map_err(|e| FetchError::ChecksumStore {
                resource_key: request.resource_key(),
                reason: e.to_string(),
            })?;
        let checksum = match recorded {
            Some(record) if record.matches(&digest, read_len) => record,
            Some(record) => {
                warn!(
                    expected = %record.digest,
                    actual = %digest,
                    "Existing file does not match recorded checksum"
                );
                return Ok(None);
            }
            None => {
                self.checksums
                    .record(request.resource(), request.page_index(), digest, read_len)
                    .await
            }
        };

        let name = request.resource_name();
        self.locations.insert(name.clone(), destination);
        Ok(Some(FetchedResource {
            resource_key: request.resource_key(),
            resource_name: name,
            path: destination.to_path_buf(),
            checksum,
            reused: true,
        }))
    }

    // =========================================================================
    // Single flight
    // =========================================================================

    fn join_or_start(
        self: &Arc<Self>,
        request: FetchRequest,
    ) -> watch::Receiver<Option<FetchOutcome>> {
        let resource_key = request.resource_key();

        let mut in_flight = self.in_flight.lock();
        if let Some(entry) = in_flight.get(&resource_key) {
            self.stats.coalesced.fetch_add(1, Ordering::Relaxed);
            debug!("Joining in-flight fetch");
            return entry.outcome.clone();
        }

        let (tx, rx) = watch::channel(None);
        in_flight.insert(
            resource_key.clone(),
            InFlight {
                outcome: rx.clone(),
                started_at: Utc::now(),
            },
        );
        drop(in_flight);

        self.stats.physical_fetches.fetch_add(1, Ordering::Relaxed);
        let registration = Registration {
            downloader: Arc::clone(self),
            resource_key,
        };
        tokio::spawn(async move {
            let outcome = registration.downloader.perform_fetch(&request).await;
            if let Err(e) = &outcome {
                registration
                    .downloader
                    .stats
                    .failures
                    .fetch_add(1, Ordering::Relaxed);
                warn!(resource_key = %registration.resource_key, "Fetch failed: {}", e);
            }
            drop(registration);
            tx.send_replace(Some(outcome));
        });

        rx
    }

    async fn await_outcome(
        &self,
        resource_key: &str,
        mut outcome: watch::Receiver<Option<FetchOutcome>>,
    ) -> FetchOutcome {
        let abandoned = || FetchError::Abandoned {
            resource_key: resource_key.to_string(),
        };
        let wait = async {
            match outcome.wait_for(Option::is_some).await {
                Ok(published) => (*published).clone().unwrap_or_else(|| Err(abandoned())),
                Err(_) => Err(abandoned()),
            }
        };

        match self.config.wait_timeout {
            Some(limit) => timeout(limit, wait).await.unwrap_or_else(|_| {
                warn!("Gave up waiting after {:?}", limit);
                Err(FetchError::Timeout {
                    resource_key: resource_key.to_string(),
                    waited: limit,
                })
            }),
            None => wait.await,
        }
    }

    /// The physical fetch: placeholder file, GET, digest, write, record
    async fn perform_fetch(&self, request: &FetchRequest) -> FetchOutcome {
        let destination = request.destination();
        ensure_destination(destination).await?;

        let body = self
            .source
            .download(request.source_url(), request.referer())
            .await?;
        let digest = sha256_hex(&body);
        tokio::fs::write(destination, &body)
            .await
            .map_err(|e| FetchError::io(destination, &e))?;

        let checksum = self
            .checksums
            .record(
                request.resource(),
                request.page_index(),
                digest,
                body.len() as u64,
            )
            .await;
        let name = request.resource_name();
        self.locations.insert(name.clone(), destination);

        info!(
            bytes = body.len(),
            "Downloaded {} to {}",
            request.source_url(),
            destination.display()
        );
        Ok(FetchedResource {
            resource_key: request.resource_key(),
            resource_name: name,
            path: destination.to_path_buf(),
            checksum,
            reused: false,
        })
    }
}

impl std::fmt::Debug for Downloader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Downloader")
            .field("config", &self.config)
            .field("in_flight", &self.in_flight_count())
            .finish()
    }
}

/// Removes an in-flight registration when the fetch task ends, panics included
struct Registration {
    downloader: Arc<Downloader>,
    resource_key: String,
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.downloader.in_flight.lock().remove(&self.resource_key);
    }
}

/// Create parent directories and an empty destination file if missing
async fn ensure_destination(destination: &Path) -> std::result::Result<(), FetchError> {
    let file_create = |e: std::io::Error| FetchError::FileCreate {
        path: destination.display().to_string(),
        reason: e.to_string(),
    };

    if let Some(parent) = destination.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await.map_err(file_create)?;
        }
    }
    tokio::fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(false)
        .open(destination)
        .await
        .map_err(file_create)?;
    Ok(())
}
