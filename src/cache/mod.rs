//! Two-Tier Cache System
//!
//! Process-local hot tier over a durable, shared Redis tier.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                        Tiered Cache                          │
//! ├──────────────────────────────────────────────────────────────┤
//! │  Hot Tier (Local)             │  Cold Tier (Remote)          │
//! │  ┌────────────────────────┐   │  ┌────────────────────────┐  │
//! │  │ DashMap + lazy expiry  │   │  │ Redis via deadpool     │  │
//! │  │ per-process            │   │  │ prefix-namespaced keys │  │
//! │  └────────────────────────┘   │  └────────────────────────┘  │
//! │              ▲                │              │               │
//! │              └── promotion (base + jitter) ──┘               │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Design Principles
//!
//! - The cold tier is authoritative; the hot tier only holds values that
//!   were written through or promoted from it
//! - Promoted entries get a jittered lifetime to avoid synchronized expiry
//! - Backend failures are errors, never misses

mod codec;
mod local;
mod metrics;
mod remote;
mod store;
mod tiered;

pub use codec::{Codec, CodecError, JsonCodec, TextCodec};
pub use local::LocalCacheStore;
pub use metrics::{CacheMetrics, MetricsSnapshot};
pub use remote::{
    normalize_prefix, redis_url, BackendStats, InMemoryBackend, RedisBackend, RedisConfig,
    RemoteBackend, RemoteCacheStore, DEFAULT_REDIS_PORT,
};
pub use store::{expiry_after, CacheLookup, CacheStore};
pub use tiered::{TieredCache, TieredCacheConfig, DEFAULT_BASE_EXPIRY, DEFAULT_JITTER_RANGE};
