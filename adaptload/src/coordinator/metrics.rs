//! Loading metrics ledger.
//!
//! One [`LoadingMetrics`] instance is shared by `Arc` between the
//! coordinator and any unit loaders that report into it. Counters are
//! atomics and only ever grow; readers take a [`MetricsSnapshot`].

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;

/// Number of performance entries retained.
pub const PERFORMANCE_BUFFER_CAPACITY: usize = 100;

/// A timing observation reported by the host.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PerformanceEntry {
    pub name: String,
    #[serde(rename = "duration_ms", serialize_with = "serialize_millis")]
    pub duration: Duration,
    /// Start time relative to the session origin.
    pub started_at_ms: u64,
}

fn serialize_millis<S: serde::Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u64(value.as_millis() as u64)
}

impl PerformanceEntry {
    pub fn new(name: impl Into<String>, duration: Duration, started_at_ms: u64) -> Self {
        Self {
            name: name.into(),
            duration,
            started_at_ms,
        }
    }
}

/// Shared, increment-only metrics ledger.
#[derive(Debug, Default)]
pub struct LoadingMetrics {
    total_load_time_ms: AtomicU64,
    components_loaded: AtomicU64,
    failed_loads: AtomicU64,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    network_utilization_ms: AtomicU64,
    entries: Mutex<VecDeque<PerformanceEntry>>,
}

impl LoadingMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_load_time(&self, elapsed: Duration) {
        self.total_load_time_ms
            .fetch_add(elapsed.as_millis() as u64, Ordering::Relaxed);
    }

    pub fn record_loaded(&self) {
        self.components_loaded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failure(&self) {
        self.failed_loads.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_miss(&self) {
        self.cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    /// Add a performance observation. Its duration counts toward network
    /// utilization; the oldest entry is dropped once the buffer is full.
    pub fn report(&self, entry: PerformanceEntry) {
        self.network_utilization_ms
            .fetch_add(entry.duration.as_millis() as u64, Ordering::Relaxed);

        let mut entries = self.entries.lock();
        if entries.len() == PERFORMANCE_BUFFER_CAPACITY {
            entries.pop_front();
        }
        entries.push_back(entry);
    }

    /// Retained performance entries, oldest first.
    pub fn recent_entries(&self) -> Vec<PerformanceEntry> {
        self.entries.lock().iter().cloned().collect()
    }

    pub fn failed_loads(&self) -> u64 {
        self.failed_loads.load(Ordering::Relaxed)
    }

    pub fn components_loaded(&self) -> u64 {
        self.components_loaded.load(Ordering::Relaxed)
    }

    /// Point-in-time copy of the counters.
    pub fn snapshot(&self, memory_usage_mb: u64) -> MetricsSnapshot {
        let cache_hits = self.cache_hits.load(Ordering::Relaxed);
        let cache_misses = self.cache_misses.load(Ordering::Relaxed);
        let lookups = cache_hits + cache_misses;
        let components_loaded = self.components_loaded.load(Ordering::Relaxed);
        let total_load_time_ms = self.total_load_time_ms.load(Ordering::Relaxed);

        MetricsSnapshot {
            total_load_time_ms,
            components_loaded,
            failed_loads: self.failed_loads.load(Ordering::Relaxed),
            cache_hits,
            cache_misses,
            cache_hit_rate: if lookups == 0 {
                0.0
            } else {
                cache_hits as f64 / lookups as f64
            },
            average_load_time_ms: if components_loaded == 0 {
                0.0
            } else {
                total_load_time_ms as f64 / components_loaded as f64
            },
            network_utilization_ms: self.network_utilization_ms.load(Ordering::Relaxed),
            memory_usage_mb,
        }
    }
}

/// Serializable view of [`LoadingMetrics`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    pub total_load_time_ms: u64,
    pub components_loaded: u64,
    pub failed_loads: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    /// hits / (hits + misses), 0 when nothing was looked up.
    pub cache_hit_rate: f64,
    pub average_load_time_ms: f64,
    pub network_utilization_ms: u64,
    pub memory_usage_mb: u64,
}
