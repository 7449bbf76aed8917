//! pixiv-cache - Tiered Cache and Single-Flight Content Acquisition
//!
//! The caching core of a Pixiv chat bot: structured results (rankings,
//! artwork metadata) live in a two-tier cache, and artwork images are pulled
//! into a local directory with at most one download per page at a time.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                          CacheService                           │
//! ├────────────────────────────────┬────────────────────────────────┤
//! │  TieredCache<Value>            │  Downloader                    │
//! │  ┌──────────┐   ┌───────────┐  │  ┌──────────┐  ┌────────────┐  │
//! │  │  Local   │◀──│  Remote   │  │  │ Location │  │  Checksum  │  │
//! │  │  (hot)   │   │  (Redis)  │  │  │  Index   │  │  Registry  │  │
//! │  └──────────┘   └───────────┘  │  └──────────┘  └────────────┘  │
//! └────────────────────────────────┴────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`cache`] - Cache stores and the tiered promotion policy
//! - [`download`] - Single-flight downloader, checksums and content sources
//! - [`error`] - Error types
//! - [`service`] - Explicit construction and ownership of all components

pub mod cache;
pub mod download;
pub mod error;
pub mod service;

// Re-export commonly used types
pub use cache::{CacheStore, TieredCache, TieredCacheConfig};
pub use download::{Downloader, FetchError, FetchRequest, FetchedResource};
pub use error::{Error, Result};
pub use service::{CacheService, ServiceConfig};
