//! Content Acquisition
//!
//! Single-flight downloading of binary resources into a local cache
//! directory, with checksum-backed reuse of files already on disk.
//!
//! # Flow
//!
//! ```text
//! fetch(request)
//!   ├─ location index hit, file intact ─────────────► reused
//!   ├─ file on disk, HEAD length + digest match ────► reused
//!   └─ join or start the in-flight fetch for the key
//!        └─ placeholder → GET → SHA-256 → write → record → index
//! ```

mod checksum;
mod downloader;
mod error;
mod location;
mod request;
mod source;

pub use checksum::{sha256_hex, ChecksumRecord, ChecksumRegistry, Verification};
pub use downloader::{
    DownloadStatsSnapshot, Downloader, DownloaderConfig, FetchOutcome, FetchedResource,
    DEFAULT_CACHE_DIR,
};
pub use error::FetchError;
pub use location::LocationIndex;
pub use request::{page_index_from_name, pixiv_referer, resource_name, FetchRequest};
pub use source::{ContentSource, HttpContentSource, DEFAULT_HTTP_TIMEOUT};
