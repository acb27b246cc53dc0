// SPDX-License-Identifier: MIT OR Apache-2.0
//! Multi-level cache for the task backplane.
//!
//! Two logical levels: L1 is an in-process TTL store (always present); L2 is
//! an optional external [`CacheStore`] (Redis-shaped).  Reads check L1 then
//! L2 and promote L2 hits; writes and invalidations hit both levels.  A
//! sampling monitor keeps a bounded metrics history and fires alert
//! callbacks when thresholds are crossed, and the invalidation subscriber
//! maps entity mutation events from the bus onto key prefixes.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod invalidation;
mod monitor;
mod store;

pub use invalidation::{
    entity_key, list_prefix, register_invalidation_subscriber, InvalidationEvent,
    InvalidationOp, CACHE_INVALIDATION_EVENT,
};
pub use monitor::{AlertThresholds, CacheAlert, CacheAlertKind, CacheMonitor};
pub use store::{CacheStore, InMemoryStore};

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

/// Tunables for a [`MultiLevelCache`].
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// TTL applied when `put` is called without one.
    pub default_ttl: Duration,
    /// TTL used when promoting an L2 hit into L1.
    pub promotion_ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_ttl: Duration::from_secs(300),
            promotion_ttl: Duration::from_secs(60),
        }
    }
}

// ---------------------------------------------------------------------------
// Metrics
// ---------------------------------------------------------------------------

/// Point-in-time cache statistics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheMetricsSnapshot {
    /// Fraction of reads served from either level.
    pub hit_rate: f64,
    /// `1.0 - hit_rate` (0 when no reads happened).
    pub miss_rate: f64,
    /// Total get/put/invalidate operations.
    pub operations: u64,
    /// Mean operation latency in milliseconds.
    pub avg_response_time_ms: f64,
    /// Approximate L1 resident size in MiB.
    pub memory_usage_mb: f64,
    /// Number of live L1 entries.
    pub cache_size: usize,
    /// Entries dropped by TTL expiry.
    pub eviction_count: u64,
}

#[derive(Default)]
struct CacheCounters {
    hits: AtomicU64,
    misses: AtomicU64,
    operations: AtomicU64,
    total_latency_ns: AtomicU64,
    latency_samples: AtomicU64,
}

impl CacheCounters {
    fn record_latency(&self, started: Instant) {
        self.total_latency_ns
            .fetch_add(started.elapsed().as_nanos() as u64, Ordering::Relaxed);
        self.latency_samples.fetch_add(1, Ordering::Relaxed);
    }
}

// ---------------------------------------------------------------------------
// MultiLevelCache
// ---------------------------------------------------------------------------

/// L1 (in-process) + optional L2 (external) cache.
pub struct MultiLevelCache {
    config: CacheConfig,
    l1: InMemoryStore,
    l2: Option<Arc<dyn CacheStore>>,
    counters: CacheCounters,
}

impl MultiLevelCache {
    /// L1-only cache.
    pub fn new(config: CacheConfig) -> Self {
        Self {
            config,
            l1: InMemoryStore::new(),
            l2: None,
            counters: CacheCounters::default(),
        }
    }

    /// Cache with an external L2 behind the L1.
    pub fn with_l2(config: CacheConfig, l2: Arc<dyn CacheStore>) -> Self {
        Self {
            config,
            l1: InMemoryStore::new(),
            l2: Some(l2),
            counters: CacheCounters::default(),
        }
    }

    /// Look a key up, checking L1 then L2.  An L2 hit is promoted into L1.
    pub async fn get(&self, key: &str) -> Option<Bytes> {
        let started = Instant::now();
        self.counters.operations.fetch_add(1, Ordering::Relaxed);

        if let Some(value) = self.l1.get(key).await {
            self.counters.hits.fetch_add(1, Ordering::Relaxed);
            self.counters.record_latency(started);
            return Some(value);
        }

        if let Some(l2) = &self.l2 {
            if let Some(value) = l2.get(key).await {
                self.l1
                    .set(key, value.clone(), self.config.promotion_ttl)
                    .await;
                self.counters.hits.fetch_add(1, Ordering::Relaxed);
                self.counters.record_latency(started);
                return Some(value);
            }
        }

        self.counters.misses.fetch_add(1, Ordering::Relaxed);
        self.counters.record_latency(started);
        None
    }

    /// Write a value to both levels.
    pub async fn put(&self, key: &str, value: Bytes, ttl: Option<Duration>) {
        let started = Instant::now();
        self.counters.operations.fetch_add(1, Ordering::Relaxed);

        let ttl = ttl.unwrap_or(self.config.default_ttl);
        self.l1.set(key, value.clone(), ttl).await;
        if let Some(l2) = &self.l2 {
            l2.set(key, value, ttl).await;
        }
        self.counters.record_latency(started);
    }

    /// Remove one key from both levels.
    pub async fn invalidate(&self, key: &str) {
        self.counters.operations.fetch_add(1, Ordering::Relaxed);
        self.l1.remove(key).await;
        if let Some(l2) = &self.l2 {
            l2.remove(key).await;
        }
    }

    /// Remove every key with the given prefix from both levels.
    pub async fn invalidate_prefix(&self, prefix: &str) {
        self.counters.operations.fetch_add(1, Ordering::Relaxed);
        self.l1.remove_by_prefix(prefix).await;
        if let Some(l2) = &self.l2 {
            l2.remove_by_prefix(prefix).await;
        }
    }

    /// Drop everything from both levels.
    pub async fn clear(&self) {
        self.l1.clear().await;
        if let Some(l2) = &self.l2 {
            l2.clear().await;
        }
    }

    /// JSON convenience wrapper over [`MultiLevelCache::get`].
    pub async fn get_json(&self, key: &str) -> Option<serde_json::Value> {
        let raw = self.get(key).await?;
        serde_json::from_slice(&raw).ok()
    }

    /// JSON convenience wrapper over [`MultiLevelCache::put`].
    pub async fn put_json(&self, key: &str, value: &serde_json::Value, ttl: Option<Duration>) {
        if let Ok(raw) = serde_json::to_vec(value) {
            self.put(key, Bytes::from(raw), ttl).await;
        }
    }

    /// Current statistics.
    pub fn metrics(&self) -> CacheMetricsSnapshot {
        let hits = self.counters.hits.load(Ordering::Relaxed);
        let misses = self.counters.misses.load(Ordering::Relaxed);
        let reads = hits + misses;
        let hit_rate = if reads == 0 {
            1.0
        } else {
            hits as f64 / reads as f64
        };
        let samples = self.counters.latency_samples.load(Ordering::Relaxed);
        let avg_response_time_ms = if samples == 0 {
            0.0
        } else {
            self.counters.total_latency_ns.load(Ordering::Relaxed) as f64
                / samples as f64
                / 1_000_000.0
        };
        CacheMetricsSnapshot {
            hit_rate,
            miss_rate: if reads == 0 { 0.0 } else { 1.0 - hit_rate },
            operations: self.counters.operations.load(Ordering::Relaxed),
            avg_response_time_ms,
            memory_usage_mb: self.l1.resident_bytes() as f64 / (1024.0 * 1024.0),
            cache_size: self.l1.len(),
            eviction_count: self.l1.eviction_count(),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
