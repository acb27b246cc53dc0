// SPDX-License-Identifier: MIT OR Apache-2.0
//! Typed notifications layered on the event bus.

use crate::{BusError, Event, EventBus, EventPriority};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Mutex;
use uuid::Uuid;

/// A delivered notification.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Notification {
    /// Unique notification identifier.
    pub id: Uuid,
    /// Notification type subscribers key on (e.g. `"task.blocked"`).
    pub notification_type: String,
    /// Arbitrary JSON payload.
    pub data: serde_json::Value,
    /// Delivery priority on the bus.
    pub priority: EventPriority,
    /// Target user, when the notification is not a broadcast.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recipient: Option<String>,
    /// When the notification was issued.
    pub created_at: DateTime<Utc>,
    /// After this instant the notification is dropped from replay.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

impl Notification {
    /// `true` once past `expires_at`.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|exp| exp <= now)
    }
}

/// Thin façade over [`EventBus`] for typed notifications.
///
/// Recent notifications are kept in a bounded ring so a reconnecting client
/// can replay what it missed; expired entries are pruned on read.
pub struct NotificationService {
    bus: EventBus,
    ring: Mutex<VecDeque<Notification>>,
    capacity: usize,
}

impl NotificationService {
    /// Default replay-ring capacity.
    pub const DEFAULT_CAPACITY: usize = 100;

    /// Create a service publishing on `bus`.
    pub fn new(bus: EventBus) -> Self {
        Self::with_capacity(bus, Self::DEFAULT_CAPACITY)
    }

    /// Create a service with a custom replay-ring capacity.
    pub fn with_capacity(bus: EventBus, capacity: usize) -> Self {
        Self {
            bus,
            ring: Mutex::new(VecDeque::new()),
            capacity,
        }
    }

    /// Publish a notification.
    ///
    /// Subscribers listen on `notification.<type>`.  The returned id
    /// identifies the notification in the replay ring.
    pub fn notify(
        &self,
        notification_type: impl Into<String>,
        data: serde_json::Value,
        priority: EventPriority,
        recipient: Option<String>,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<Uuid, BusError> {
        let notification = Notification {
            id: Uuid::new_v4(),
            notification_type: notification_type.into(),
            data,
            priority,
            recipient: recipient.clone(),
            created_at: Utc::now(),
            expires_at,
        };

        let payload = serde_json::to_value(&notification)
            .expect("notification serialization is infallible");
        let mut event = Event::new(
            format!("notification.{}", notification.notification_type),
            payload,
        )
        .with_priority(priority);
        if let Some(recipient) = recipient {
            event = event.with_user_id(recipient);
        }
        self.bus.publish(event)?;

        let mut ring = self.ring.lock().expect("notification ring poisoned");
        if ring.len() >= self.capacity {
            ring.pop_front();
        }
        let id = notification.id;
        ring.push_back(notification);
        Ok(id)
    }

    /// The most recent unexpired notifications, oldest first, capped at
    /// `limit`.  Expired entries are pruned as a side effect.
    pub fn recent(&self, limit: usize) -> Vec<Notification> {
        let now = Utc::now();
        let mut ring = self.ring.lock().expect("notification ring poisoned");
        ring.retain(|n| !n.is_expired(now));
        ring.iter()
            .rev()
            .take(limit)
            .rev()
            .cloned()
            .collect()
    }

    /// Number of notifications currently replayable.
    pub fn replay_len(&self) -> usize {
        self.ring.lock().expect("notification ring poisoned").len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{handler_fn, BusConfig};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    fn service() -> NotificationService {
        let bus = EventBus::new(BusConfig::default());
        bus.start();
        NotificationService::new(bus)
    }

    #[tokio::test]
    async fn notify_delivers_to_typed_subscribers() {
        let bus = EventBus::new(BusConfig::default());
        bus.start();

        let counter = Arc::new(AtomicUsize::new(0));
        {
            let counter = counter.clone();
            bus.subscribe(
                "notification.task.blocked",
                handler_fn(move |_| {
                    let counter = counter.clone();
                    Box::pin(async move {
                        counter.fetch_add(1, Ordering::SeqCst);
                        Ok(())
                    })
                }),
                0,
                None,
            );
        }

        let service = NotificationService::new(bus.clone());
        service
            .notify(
                "task.blocked",
                serde_json::json!({"task_id": "t-1"}),
                EventPriority::High,
                Some("user-a".into()),
                None,
            )
            .unwrap();

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        bus.stop().await;
    }

    #[tokio::test]
    async fn ring_is_bounded() {
        let bus = EventBus::new(BusConfig::default());
        bus.start();
        let service = NotificationService::with_capacity(bus, 3);

        for n in 0..5 {
            service
                .notify(
                    "ping",
                    serde_json::json!({ "n": n }),
                    EventPriority::Normal,
                    None,
                    None,
                )
                .unwrap();
        }

        let recent = service.recent(10);
        assert_eq!(recent.len(), 3);
        assert_eq!(recent[0].data["n"], 2);
        assert_eq!(recent[2].data["n"], 4);
    }

    #[tokio::test]
    async fn expired_notifications_are_pruned_from_replay() {
        let service = service();

        service
            .notify(
                "stale",
                serde_json::json!({}),
                EventPriority::Normal,
                None,
                Some(Utc::now() - chrono::Duration::seconds(1)),
            )
            .unwrap();
        service
            .notify(
                "fresh",
                serde_json::json!({}),
                EventPriority::Normal,
                None,
                Some(Utc::now() + chrono::Duration::hours(1)),
            )
            .unwrap();

        let recent = service.recent(10);
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].notification_type, "fresh");
        assert_eq!(service.replay_len(), 1);
    }

    #[tokio::test]
    async fn recent_respects_limit_and_returns_newest() {
        let service = service();
        for n in 0..4 {
            service
                .notify(
                    "n",
                    serde_json::json!({ "n": n }),
                    EventPriority::Normal,
                    None,
                    None,
                )
                .unwrap();
        }
        let recent = service.recent(2);
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].data["n"], 2);
        assert_eq!(recent[1].data["n"], 3);
    }
}
