// SPDX-License-Identifier: MIT OR Apache-2.0
//! Pluggable cache backends.

use bytes::Bytes;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Pluggable cache backend.
///
/// The L1 store is always [`InMemoryStore`]; implement this for Redis or
/// another external store and pass it as the L2 level.
#[async_trait::async_trait]
pub trait CacheStore: Send + Sync + 'static {
    /// Get a value if present and unexpired.
    async fn get(&self, key: &str) -> Option<Bytes>;
    /// Insert or replace a value with the given TTL.
    async fn set(&self, key: &str, value: Bytes, ttl: Duration);
    /// Remove one key.
    async fn remove(&self, key: &str);
    /// Remove every key starting with `prefix`.
    async fn remove_by_prefix(&self, prefix: &str);
    /// Remove everything.
    async fn clear(&self);
}

/// In-memory TTL store backed by `DashMap`.
///
/// Entries store `(value, inserted_at, ttl)` and are lazily evicted on
/// access; expiries are counted for the metrics snapshot.
pub struct InMemoryStore {
    inner: DashMap<String, (Bytes, Instant, Duration)>,
    evictions: AtomicU64,
}

impl InMemoryStore {
    /// Empty store.
    pub fn new() -> Self {
        Self {
            inner: DashMap::new(),
            evictions: AtomicU64::new(0),
        }
    }

    /// Number of live entries (expired-but-unvisited entries included).
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// `true` when no entries are resident.
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Entries dropped through TTL expiry so far.
    pub fn eviction_count(&self) -> u64 {
        self.evictions.load(Ordering::Relaxed)
    }

    /// Approximate resident size: key bytes plus value bytes.
    pub fn resident_bytes(&self) -> u64 {
        self.inner
            .iter()
            .map(|entry| (entry.key().len() + entry.value().0.len()) as u64)
            .sum()
    }

    /// Drop every expired entry now instead of lazily.
    pub fn evict_expired(&self) {
        let before = self.inner.len();
        self.inner
            .retain(|_, (_, inserted, ttl)| inserted.elapsed() < *ttl);
        let dropped = before.saturating_sub(self.inner.len());
        self.evictions.fetch_add(dropped as u64, Ordering::Relaxed);
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl CacheStore for InMemoryStore {
    async fn get(&self, key: &str) -> Option<Bytes> {
        if let Some(entry) = self.inner.get(key) {
            let (value, inserted, ttl) = entry.value();
            if inserted.elapsed() < *ttl {
                return Some(value.clone());
            }
            // Expired — drop the read guard before removing.
            drop(entry);
            self.inner.remove(key);
            self.evictions.fetch_add(1, Ordering::Relaxed);
        }
        None
    }

    async fn set(&self, key: &str, value: Bytes, ttl: Duration) {
        self.inner.insert(key.to_string(), (value, Instant::now(), ttl));
    }

    async fn remove(&self, key: &str) {
        self.inner.remove(key);
    }

    async fn remove_by_prefix(&self, prefix: &str) {
        self.inner.retain(|k, _| !k.starts_with(prefix));
    }

    async fn clear(&self) {
        self.inner.clear();
    }
}
