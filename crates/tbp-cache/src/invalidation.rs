// SPDX-License-Identifier: MIT OR Apache-2.0
//! Invalidation fan-out: entity mutation events → cache key removal.
//!
//! Repositories publish a `cache.invalidate` event after every successful
//! mutation; the subscriber registered here maps that event onto the key
//! scheme below and removes the affected entries from both cache levels.
//!
//! Key scheme (everything is user-scoped):
//! - single entity: `{entity_type}:{user_id}:{entity_id}`
//! - list/search caches: `{entity_type}s:{user_id}:…`
//! - contexts: `context:{user_id}:{level}:{context_id}`, with resolved
//!   (inheritance-merged) views sharing the `context:{user_id}:` prefix so a
//!   propagated invalidation covers all descendants.

use crate::MultiLevelCache;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tbp_events::{handler_fn, EventBus, SubscriptionId};
use tracing::debug;

/// Event type repositories publish after a mutation.
pub const CACHE_INVALIDATION_EVENT: &str = "cache.invalidate";

/// The mutation kind behind an invalidation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvalidationOp {
    /// Row creation.
    Create,
    /// Row mutation.
    Update,
    /// Row removal.
    Delete,
}

/// Payload of a [`CACHE_INVALIDATION_EVENT`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvalidationEvent {
    /// Entity table that changed (e.g. `"task"`, `"context"`).
    pub entity_type: String,
    /// Row id that changed.
    pub entity_id: String,
    /// Mutation kind.
    pub operation: InvalidationOp,
    /// Owning user; absent only during bootstrap, where nothing is cached.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    /// Context level, for `entity_type == "context"`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,
    /// When `true`, descendants of the entity are invalidated too.
    #[serde(default)]
    pub propagate: bool,
}

/// Cache key for a single entity row.
pub fn entity_key(entity_type: &str, user_id: &str, entity_id: &str) -> String {
    format!("{entity_type}:{user_id}:{entity_id}")
}

/// Shared prefix of every list/search cache for an entity type.
pub fn list_prefix(entity_type: &str, user_id: &str) -> String {
    format!("{entity_type}s:{user_id}:")
}

/// Exact keys and prefixes affected by one invalidation event.
fn affected_keys(event: &InvalidationEvent) -> (Vec<String>, Vec<String>) {
    let Some(user_id) = event.user_id.as_deref() else {
        return (Vec::new(), Vec::new());
    };

    if event.entity_type == "context" {
        let level = event.level.as_deref().unwrap_or("unknown");
        let exact = vec![format!("context:{user_id}:{level}:{}", event.entity_id)];
        let prefixes = if event.propagate {
            // Branch/project/global updates cascade to every resolved view
            // underneath them; the shared prefix covers the whole subtree.
            vec![format!("context:{user_id}:")]
        } else {
            vec![format!("context:{user_id}:resolved:{level}:{}", event.entity_id)]
        };
        return (exact, prefixes);
    }

    (
        vec![entity_key(&event.entity_type, user_id, &event.entity_id)],
        vec![list_prefix(&event.entity_type, user_id)],
    )
}

/// Apply one invalidation event to the cache.
pub async fn apply_invalidation(cache: &MultiLevelCache, event: &InvalidationEvent) {
    let (exact, prefixes) = affected_keys(event);
    for key in &exact {
        cache.invalidate(key).await;
    }
    for prefix in &prefixes {
        cache.invalidate_prefix(prefix).await;
    }
    debug!(
        entity_type = %event.entity_type,
        entity_id = %event.entity_id,
        operation = ?event.operation,
        exact = exact.len(),
        prefixes = prefixes.len(),
        "cache invalidation applied"
    );
}

/// Subscribe the fan-out handler on `bus`.
pub fn register_invalidation_subscriber(
    bus: &EventBus,
    cache: Arc<MultiLevelCache>,
) -> SubscriptionId {
    bus.subscribe(
        CACHE_INVALIDATION_EVENT,
        handler_fn(move |event| {
            let cache = cache.clone();
            Box::pin(async move {
                let parsed: InvalidationEvent = serde_json::from_value(event.payload.clone())?;
                apply_invalidation(&cache, &parsed).await;
                Ok(())
            })
        }),
        // Invalidation runs before ordinary projections of the same event.
        100,
        None,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::CacheConfig;
    use bytes::Bytes;
    use std::time::Duration;
    use tbp_events::{BusConfig, Event};

    fn seeded_cache() -> Arc<MultiLevelCache> {
        Arc::new(MultiLevelCache::new(CacheConfig::default()))
    }

    fn task_event(op: InvalidationOp) -> InvalidationEvent {
        InvalidationEvent {
            entity_type: "task".into(),
            entity_id: "t-1".into(),
            operation: op,
            user_id: Some("u1".into()),
            level: None,
            propagate: false,
        }
    }

    #[tokio::test]
    async fn task_update_invalidates_entity_and_lists() {
        let cache = seeded_cache();
        cache.put("task:u1:t-1", Bytes::from_static(b"x"), None).await;
        cache.put("tasks:u1:list:b-1", Bytes::from_static(b"y"), None).await;
        cache.put("tasks:u1:search:q", Bytes::from_static(b"z"), None).await;
        cache.put("task:u2:t-9", Bytes::from_static(b"w"), None).await;

        apply_invalidation(&cache, &task_event(InvalidationOp::Update)).await;

        assert!(cache.get("task:u1:t-1").await.is_none());
        assert!(cache.get("tasks:u1:list:b-1").await.is_none());
        assert!(cache.get("tasks:u1:search:q").await.is_none());
        // Other users' entries survive.
        assert!(cache.get("task:u2:t-9").await.is_some());
    }

    #[tokio::test]
    async fn propagated_context_update_sweeps_descendants() {
        let cache = seeded_cache();
        cache
            .put("context:u1:branch:b-1", Bytes::from_static(b"a"), None)
            .await;
        cache
            .put("context:u1:resolved:task:t-1", Bytes::from_static(b"b"), None)
            .await;
        cache
            .put("context:u2:branch:b-9", Bytes::from_static(b"c"), None)
            .await;

        let event = InvalidationEvent {
            entity_type: "context".into(),
            entity_id: "b-1".into(),
            operation: InvalidationOp::Update,
            user_id: Some("u1".into()),
            level: Some("branch".into()),
            propagate: true,
        };
        apply_invalidation(&cache, &event).await;

        assert!(cache.get("context:u1:branch:b-1").await.is_none());
        assert!(cache.get("context:u1:resolved:task:t-1").await.is_none());
        assert!(cache.get("context:u2:branch:b-9").await.is_some());
    }

    #[tokio::test]
    async fn bootstrap_event_without_user_is_a_no_op() {
        let cache = seeded_cache();
        cache.put("task:u1:t-1", Bytes::from_static(b"x"), None).await;

        let mut event = task_event(InvalidationOp::Delete);
        event.user_id = None;
        apply_invalidation(&cache, &event).await;

        assert!(cache.get("task:u1:t-1").await.is_some());
    }

    #[tokio::test]
    async fn subscriber_applies_events_from_the_bus() {
        let bus = EventBus::new(BusConfig::default());
        bus.start();
        let cache = seeded_cache();
        cache.put("task:u1:t-1", Bytes::from_static(b"x"), None).await;

        register_invalidation_subscriber(&bus, cache.clone());

        let payload = serde_json::to_value(task_event(InvalidationOp::Delete)).unwrap();
        bus.publish(Event::new(CACHE_INVALIDATION_EVENT, payload)).unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert!(cache.get("task:u1:t-1").await.is_none());
        bus.stop().await;
    }
}
