// SPDX-License-Identifier: MIT OR Apache-2.0
//! In-process eventing substrate for the task backplane.
//!
//! [`EventBus`] is a bounded, priority-aware publish/subscribe bus with a
//! small worker pool, event-level retry with exponential backoff, and a
//! dead-letter queue for events that exhaust their budget.
//! [`NotificationService`] layers typed notifications with expiry and a
//! bounded replay ring on top of it.
//!
//! Every mutation in the plane emits one event; every cache sits downstream
//! of this bus.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod bus;
mod notify;

pub use bus::{
    BusConfig, BusError, BusMetrics, DeadLetter, Event, EventBus, EventMetadata, EventPriority,
    HandlerResult, HandlerStats, SubscriptionId,
};
pub use notify::{Notification, NotificationService};

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// A subscriber on the bus.
///
/// Handlers run on the worker tasks; a returned error marks the whole event
/// as failed and feeds the retry/DLQ path, but never the publishing request.
#[async_trait::async_trait]
pub trait EventHandler: Send + Sync {
    /// Process one event.
    async fn handle(&self, event: &Event) -> HandlerResult;
}

type BoxedHandlerFuture = Pin<Box<dyn Future<Output = HandlerResult> + Send>>;

struct FnHandler<F>(F);

#[async_trait::async_trait]
impl<F> EventHandler for FnHandler<F>
where
    F: Fn(Event) -> BoxedHandlerFuture + Send + Sync,
{
    async fn handle(&self, event: &Event) -> HandlerResult {
        (self.0)(event.clone()).await
    }
}

/// Wrap a closure as an [`EventHandler`].
///
/// ```
/// use tbp_events::{handler_fn, Event};
///
/// let handler = handler_fn(|event: Event| {
///     Box::pin(async move {
///         let _ = event.event_type;
///         Ok(())
///     })
/// });
/// # let _ = handler;
/// ```
pub fn handler_fn<F>(f: F) -> Arc<dyn EventHandler>
where
    F: Fn(Event) -> BoxedHandlerFuture + Send + Sync + 'static,
{
    Arc::new(FnHandler(f))
}
