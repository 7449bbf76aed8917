//! Cache Metrics Collection
//!
//! Hit, miss and promotion counters for the tiered cache.

use std::sync::atomic::{AtomicU64, Ordering};

/// Tiered cache metrics collector
#[derive(Debug, Default)]
pub struct CacheMetrics {
    hot_hits: AtomicU64,
    hot_misses: AtomicU64,
    hot_errors: AtomicU64,
    cold_hits: AtomicU64,
    cold_misses: AtomicU64,
    promotions: AtomicU64,
    short_circuit_misses: AtomicU64,
}

impl CacheMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_hot_hit(&self) {
        self.hot_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_hot_miss(&self) {
        self.hot_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_hot_error(&self) {
        self.hot_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cold_hit(&self) {
        self.cold_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cold_miss(&self) {
        self.cold_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_promotion(&self) {
        self.promotions.fetch_add(1, Ordering::Relaxed);
    }

    /// Miss answered by the existence check without touching either tier's value
    pub fn record_short_circuit_miss(&self) {
        self.short_circuit_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn hot_hit_ratio(&self) -> f64 {
        let hits = self.hot_hits.load(Ordering::Relaxed) as f64;
        let total = hits + self.hot_misses.load(Ordering::Relaxed) as f64;
        if total == 0.0 {
            0.0
        } else {
            hits / total
        }
    }

    /// Get a point-in-time snapshot
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            hot_hits: self.hot_hits.load(Ordering::Relaxed),
            hot_misses: self.hot_misses.load(Ordering::Relaxed),
            hot_errors: self.hot_errors.load(Ordering::Relaxed),
            cold_hits: self.cold_hits.load(Ordering::Relaxed),
            cold_misses: self.cold_misses.load(Ordering::Relaxed),
            promotions: self.promotions.load(Ordering::Relaxed),
            short_circuit_misses: self.short_circuit_misses.load(Ordering::Relaxed),
            hot_hit_ratio: self.hot_hit_ratio(),
        }
    }
}

/// Point-in-time metrics snapshot
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetricsSnapshot {
    pub hot_hits: u64,
    pub hot_misses: u64,
    pub hot_errors: u64,
    pub cold_hits: u64,
    pub cold_misses: u64,
    pub promotions: u64,
    pub short_circuit_misses: u64,
    pub hot_hit_ratio: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_counters() {
        let metrics = CacheMetrics::new();
        metrics.record_hot_hit();
        metrics.record_hot_hit();
        metrics.record_hot_miss();
        metrics.record_cold_hit();
        metrics.record_promotion();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.hot_hits, 2);
        assert_eq!(snapshot.hot_misses, 1);
        assert_eq!(snapshot.cold_hits, 1);
        assert_eq!(snapshot.promotions, 1);
        assert!((snapshot.hot_hit_ratio - 2.0 / 3.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_hit_ratio_empty() {
        assert_eq!(CacheMetrics::new().hot_hit_ratio(), 0.0);
    }
}
