// SPDX-License-Identifier: MIT OR Apache-2.0
//! The event bus: bounded priority queue, worker pool, retry, DLQ.

use crate::EventHandler;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};
use uuid::Uuid;

/// Error type handlers report; opaque to the bus.
pub type HandlerResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

// ---------------------------------------------------------------------------
// Priorities & events
// ---------------------------------------------------------------------------

/// Priority levels for queued events.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum EventPriority {
    /// Lowest priority.
    Low,
    /// Default priority.
    #[default]
    Normal,
    /// Elevated priority.
    High,
    /// Highest priority — processed before all others.
    Critical,
}

/// Per-event bookkeeping carried alongside the payload.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EventMetadata {
    /// Unique event identifier.
    pub event_id: Uuid,
    /// When the event was first published.
    pub timestamp: DateTime<Utc>,
    /// Scheduling priority.
    pub priority: EventPriority,
    /// Correlates events caused by the same request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    /// User on whose behalf the event was published.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    /// Number of delivery attempts that have already failed.
    #[serde(default)]
    pub retry_count: u32,
}

/// A typed event on the bus.
///
/// `event_type` is a dotted name (`"task.created"`, `"cache.invalidate"`);
/// the payload is arbitrary JSON so crates don't need to share entity types
/// to interoperate.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Event {
    /// Dotted event name subscribers key on.
    pub event_type: String,
    /// Arbitrary JSON payload.
    pub payload: serde_json::Value,
    /// Bookkeeping.
    pub metadata: EventMetadata,
}

impl Event {
    /// Create an event with `Normal` priority and fresh metadata.
    pub fn new(event_type: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            event_type: event_type.into(),
            payload,
            metadata: EventMetadata {
                event_id: Uuid::new_v4(),
                timestamp: Utc::now(),
                priority: EventPriority::Normal,
                correlation_id: None,
                user_id: None,
                retry_count: 0,
            },
        }
    }

    /// Set the scheduling priority.
    pub fn with_priority(mut self, priority: EventPriority) -> Self {
        self.metadata.priority = priority;
        self
    }

    /// Set the correlation id.
    pub fn with_correlation_id(mut self, id: impl Into<String>) -> Self {
        self.metadata.correlation_id = Some(id.into());
        self
    }

    /// Set the acting user.
    pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.metadata.user_id = Some(user_id.into());
        self
    }
}

// ---------------------------------------------------------------------------
// Errors & config
// ---------------------------------------------------------------------------

/// Errors returned by [`EventBus`] operations.
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    /// The queue has reached its maximum capacity.  Callers decide whether to
    /// drop, retry, or escalate — never silently.
    #[error("event queue is full (capacity {capacity})")]
    QueueFull {
        /// Maximum number of events the queue can hold.
        capacity: usize,
    },
    /// The bus has not been started or is already stopped.
    #[error("event bus is not running")]
    NotRunning,
}

impl From<BusError> for tbp_error::TbpError {
    fn from(err: BusError) -> Self {
        match err {
            BusError::QueueFull { capacity } => tbp_error::TbpError::new(
                tbp_error::ErrorCode::QueueFull,
                "event bus is saturated",
            )
            .with_context("capacity", capacity),
            BusError::NotRunning => tbp_error::TbpError::internal("event bus is not running"),
        }
    }
}

/// Tunables for an [`EventBus`].
#[derive(Debug, Clone)]
pub struct BusConfig {
    /// Maximum number of queued events.
    pub max_queue_size: usize,
    /// Number of worker tasks draining the queue.
    pub worker_count: usize,
    /// Delivery attempts after the first failure before dead-lettering.
    pub max_retries: u32,
    /// Base backoff delay; attempt `n` waits `base * 2^n`, capped.
    pub retry_base_delay: Duration,
    /// Backoff cap.
    pub retry_max_delay: Duration,
    /// Maximum dead letters retained (oldest dropped first).
    pub dead_letter_capacity: usize,
    /// How long `stop()` waits for in-flight work to drain.
    pub shutdown_grace: Duration,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            max_queue_size: 1_000,
            worker_count: 2,
            max_retries: 3,
            retry_base_delay: Duration::from_secs(1),
            retry_max_delay: Duration::from_secs(60),
            dead_letter_capacity: 1_000,
            shutdown_grace: Duration::from_secs(5),
        }
    }
}

/// Backoff for a zero-indexed retry attempt: `min(base * 2^n, max)`.
fn retry_delay(config: &BusConfig, attempt: u32) -> Duration {
    let exp = 2u64.saturating_pow(attempt);
    let delay_ms = (config.retry_base_delay.as_millis() as u64).saturating_mul(exp);
    Duration::from_millis(delay_ms.min(config.retry_max_delay.as_millis() as u64))
}

// ---------------------------------------------------------------------------
// Metrics
// ---------------------------------------------------------------------------

/// Per-handler dispatch statistics.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct HandlerStats {
    /// Times the handler was invoked.
    pub call_count: u64,
    /// Invocations that returned an error.
    pub error_count: u64,
    /// Cumulative handler wall time in milliseconds.
    pub total_duration_ms: u64,
}

impl HandlerStats {
    /// Mean handler wall time in milliseconds.
    pub fn avg_duration_ms(&self) -> f64 {
        if self.call_count == 0 {
            0.0
        } else {
            self.total_duration_ms as f64 / self.call_count as f64
        }
    }
}

/// Snapshot of bus counters.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BusMetrics {
    /// Events accepted into the queue.
    pub events_published: u64,
    /// Events fully dispatched (all handlers ran, successfully or not).
    pub events_processed: u64,
    /// Events currently dead-lettered.
    pub dead_letter_count: usize,
    /// Active subscriptions.
    pub handler_count: usize,
    /// Per-subscription stats keyed by subscription id.
    pub handlers: BTreeMap<Uuid, HandlerStats>,
}

// ---------------------------------------------------------------------------
// Subscriptions & queue internals
// ---------------------------------------------------------------------------

/// Opaque subscription identifier returned by `subscribe`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubscriptionId(pub Uuid);

type EventFilter = dyn Fn(&Event) -> bool + Send + Sync;

struct Subscription {
    id: SubscriptionId,
    /// `None` subscribes to every event type.
    event_type: Option<String>,
    priority: i32,
    handler: Arc<dyn EventHandler>,
    filter: Option<Arc<EventFilter>>,
}

/// An event that exhausted its retry budget.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DeadLetter {
    /// The failed event, retry count included.
    pub event: Event,
    /// When the final attempt failed.
    pub failed_at: DateTime<Utc>,
    /// Message of the last handler error.
    pub last_error: String,
}

/// Per-priority FIFO queues; dequeue scans from `Critical` down.
#[derive(Default)]
struct QueueInner {
    lanes: BTreeMap<std::cmp::Reverse<u8>, VecDeque<Event>>,
    len: usize,
}

fn lane_key(priority: EventPriority) -> std::cmp::Reverse<u8> {
    std::cmp::Reverse(match priority {
        EventPriority::Critical => 3,
        EventPriority::High => 2,
        EventPriority::Normal => 1,
        EventPriority::Low => 0,
    })
}

impl QueueInner {
    fn push(&mut self, event: Event) {
        self.lanes
            .entry(lane_key(event.metadata.priority))
            .or_default()
            .push_back(event);
        self.len += 1;
    }

    fn pop(&mut self) -> Option<Event> {
        for lane in self.lanes.values_mut() {
            if let Some(event) = lane.pop_front() {
                self.len -= 1;
                return Some(event);
            }
        }
        None
    }
}

// ---------------------------------------------------------------------------
// EventBus
// ---------------------------------------------------------------------------

struct BusShared {
    config: BusConfig,
    queue: Mutex<QueueInner>,
    wakeup: Notify,
    subscriptions: RwLock<Vec<Subscription>>,
    dead_letters: Mutex<VecDeque<DeadLetter>>,
    stats: Mutex<BTreeMap<Uuid, HandlerStats>>,
    events_published: AtomicU64,
    events_processed: AtomicU64,
    shutdown_tx: watch::Sender<bool>,
}

/// The in-process event bus.
///
/// Cloning is cheap and shares all state; `start()` must run once before
/// events are dispatched.
#[derive(Clone)]
pub struct EventBus {
    shared: Arc<BusShared>,
    workers: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl EventBus {
    /// Create a bus with the given configuration.  Workers start on
    /// [`EventBus::start`].
    pub fn new(config: BusConfig) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            shared: Arc::new(BusShared {
                config,
                queue: Mutex::new(QueueInner::default()),
                wakeup: Notify::new(),
                subscriptions: RwLock::new(Vec::new()),
                dead_letters: Mutex::new(VecDeque::new()),
                stats: Mutex::new(BTreeMap::new()),
                events_published: AtomicU64::new(0),
                events_processed: AtomicU64::new(0),
                shutdown_tx,
            }),
            workers: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Spawn the worker pool.  Idempotent.
    pub fn start(&self) {
        let mut workers = self.workers.lock().expect("worker registry poisoned");
        if !workers.is_empty() {
            return;
        }
        let _ = self.shared.shutdown_tx.send(false);
        for n in 0..self.shared.config.worker_count {
            let shared = self.shared.clone();
            let bus = self.clone();
            workers.push(tokio::spawn(async move {
                worker_loop(n, shared, bus).await;
            }));
        }
    }

    /// `true` while workers are running.
    pub fn is_running(&self) -> bool {
        !self.workers.lock().expect("worker registry poisoned").is_empty()
            && !*self.shared.shutdown_tx.borrow()
    }

    /// Subscribe a handler to one event type.
    ///
    /// Handlers for the same event run in descending `priority` order.  The
    /// optional `filter` drops events before they reach the handler.
    pub fn subscribe(
        &self,
        event_type: impl Into<String>,
        handler: Arc<dyn EventHandler>,
        priority: i32,
        filter: Option<Arc<EventFilter>>,
    ) -> SubscriptionId {
        self.add_subscription(Some(event_type.into()), handler, priority, filter)
    }

    /// Subscribe a handler to every event type.
    pub fn subscribe_all(&self, handler: Arc<dyn EventHandler>) -> SubscriptionId {
        self.add_subscription(None, handler, 0, None)
    }

    fn add_subscription(
        &self,
        event_type: Option<String>,
        handler: Arc<dyn EventHandler>,
        priority: i32,
        filter: Option<Arc<EventFilter>>,
    ) -> SubscriptionId {
        let id = SubscriptionId(Uuid::new_v4());
        let mut subs = self
            .shared
            .subscriptions
            .write()
            .expect("subscription registry poisoned");
        subs.push(Subscription {
            id,
            event_type,
            priority,
            handler,
            filter,
        });
        // Descending priority; stable for equal priorities (registration order).
        subs.sort_by(|a, b| b.priority.cmp(&a.priority));
        id
    }

    /// Remove a subscription.  Returns `false` if the id is unknown.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subs = self
            .shared
            .subscriptions
            .write()
            .expect("subscription registry poisoned");
        let before = subs.len();
        subs.retain(|s| s.id != id);
        before != subs.len()
    }

    /// Accept an event into the bounded queue.
    ///
    /// Returns as soon as the event is queued.  When the queue is full the
    /// publish fails loudly with [`BusError::QueueFull`].
    pub fn publish(&self, event: Event) -> Result<Uuid, BusError> {
        let event_id = event.metadata.event_id;
        {
            let mut queue = self.shared.queue.lock().expect("event queue poisoned");
            if queue.len >= self.shared.config.max_queue_size {
                return Err(BusError::QueueFull {
                    capacity: self.shared.config.max_queue_size,
                });
            }
            queue.push(event);
        }
        self.shared.events_published.fetch_add(1, Ordering::Relaxed);
        self.shared.wakeup.notify_one();
        Ok(event_id)
    }

    /// Snapshot the dead-letter queue.
    pub fn dead_letters(&self) -> Vec<DeadLetter> {
        self.shared
            .dead_letters
            .lock()
            .expect("dead letter queue poisoned")
            .iter()
            .cloned()
            .collect()
    }

    /// Drain the dead-letter queue back onto the bus with reset retry
    /// budgets.  Returns how many events were re-published.
    pub fn replay_dead_letter_queue(&self) -> Result<usize, BusError> {
        let drained: Vec<DeadLetter> = {
            let mut dlq = self
                .shared
                .dead_letters
                .lock()
                .expect("dead letter queue poisoned");
            dlq.drain(..).collect()
        };
        let mut replayed = 0;
        for dead in drained {
            let mut event = dead.event;
            event.metadata.retry_count = 0;
            match self.publish(event) {
                Ok(_) => replayed += 1,
                Err(err) => {
                    // Queue refilled mid-replay; stop and keep the rest dead.
                    warn!(error = %err, "dead letter replay interrupted");
                    return Ok(replayed);
                }
            }
        }
        Ok(replayed)
    }

    /// Snapshot bus counters and per-handler stats.
    pub fn metrics(&self) -> BusMetrics {
        BusMetrics {
            events_published: self.shared.events_published.load(Ordering::Relaxed),
            events_processed: self.shared.events_processed.load(Ordering::Relaxed),
            dead_letter_count: self
                .shared
                .dead_letters
                .lock()
                .expect("dead letter queue poisoned")
                .len(),
            handler_count: self
                .shared
                .subscriptions
                .read()
                .expect("subscription registry poisoned")
                .len(),
            handlers: self.shared.stats.lock().expect("stats poisoned").clone(),
        }
    }

    /// Stop the workers, draining queued work for up to the grace window, and
    /// return the final metrics.
    pub async fn stop(&self) -> BusMetrics {
        let deadline = Instant::now() + self.shared.config.shutdown_grace;
        // Let workers finish the backlog before flipping the shutdown flag.
        while Instant::now() < deadline {
            let empty = self.shared.queue.lock().expect("event queue poisoned").len == 0;
            if empty {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        let _ = self.shared.shutdown_tx.send(true);
        self.shared.wakeup.notify_waiters();

        let workers: Vec<JoinHandle<()>> = {
            let mut guard = self.workers.lock().expect("worker registry poisoned");
            guard.drain(..).collect()
        };
        for worker in workers {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if tokio::time::timeout(remaining.max(Duration::from_millis(10)), worker)
                .await
                .is_err()
            {
                warn!("event bus worker did not drain within the grace window");
            }
        }
        self.metrics()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(BusConfig::default())
    }
}

// ---------------------------------------------------------------------------
// Worker loop & dispatch
// ---------------------------------------------------------------------------

async fn worker_loop(worker_index: usize, shared: Arc<BusShared>, bus: EventBus) {
    let mut shutdown_rx = shared.shutdown_tx.subscribe();
    loop {
        let event = {
            let mut queue = shared.queue.lock().expect("event queue poisoned");
            queue.pop()
        };

        match event {
            Some(event) => {
                dispatch_event(&shared, &bus, event).await;
            }
            None => {
                if *shutdown_rx.borrow() {
                    debug!(worker = worker_index, "event bus worker exiting");
                    return;
                }
                tokio::select! {
                    _ = shared.wakeup.notified() => {}
                    _ = shutdown_rx.changed() => {}
                }
            }
        }
    }
}

async fn dispatch_event(shared: &Arc<BusShared>, bus: &EventBus, event: Event) {
    // Snapshot matching handlers so the lock is released across awaits.
    let matching: Vec<(SubscriptionId, Arc<dyn EventHandler>)> = {
        let subs = shared
            .subscriptions
            .read()
            .expect("subscription registry poisoned");
        subs.iter()
            .filter(|s| {
                s.event_type
                    .as_deref()
                    .is_none_or(|t| t == event.event_type)
            })
            .filter(|s| s.filter.as_ref().is_none_or(|f| f(&event)))
            .map(|s| (s.id, s.handler.clone()))
            .collect()
    };

    let mut last_error: Option<String> = None;
    for (sub_id, handler) in matching {
        let started = Instant::now();
        let result = handler.handle(&event).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        {
            let mut stats = shared.stats.lock().expect("stats poisoned");
            let entry = stats.entry(sub_id.0).or_default();
            entry.call_count += 1;
            entry.total_duration_ms += elapsed_ms;
            if result.is_err() {
                entry.error_count += 1;
            }
        }

        if let Err(err) = result {
            // Handler failures are isolated from peers; the event as a whole
            // goes through the retry path.
            error!(
                event_type = %event.event_type,
                event_id = %event.metadata.event_id,
                error = %err,
                "event handler failed"
            );
            last_error = Some(err.to_string());
        }
    }

    shared.events_processed.fetch_add(1, Ordering::Relaxed);

    if let Some(err) = last_error {
        schedule_retry(shared, bus, event, err);
    }
}

fn schedule_retry(shared: &Arc<BusShared>, bus: &EventBus, mut event: Event, last_error: String) {
    if event.metadata.retry_count >= shared.config.max_retries {
        push_dead_letter(shared, event, last_error);
        return;
    }

    let delay = retry_delay(&shared.config, event.metadata.retry_count);
    event.metadata.retry_count += 1;
    let bus = bus.clone();
    let shared = shared.clone();
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        let retry_count = event.metadata.retry_count;
        debug!(
            event_type = %event.event_type,
            retry_count,
            "re-enqueueing failed event"
        );
        if let Err(err) = bus.publish(event.clone()) {
            // No room to retry; the event is effectively dead.
            push_dead_letter(&shared, event, err.to_string());
        }
    });
}

fn push_dead_letter(shared: &Arc<BusShared>, event: Event, last_error: String) {
    let mut dlq = shared
        .dead_letters
        .lock()
        .expect("dead letter queue poisoned");
    if dlq.len() >= shared.config.dead_letter_capacity {
        dlq.pop_front();
    }
    warn!(
        event_type = %event.event_type,
        event_id = %event.metadata.event_id,
        retries = event.metadata.retry_count,
        "event dead-lettered"
    );
    dlq.push_back(DeadLetter {
        event,
        failed_at: Utc::now(),
        last_error,
    });
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
