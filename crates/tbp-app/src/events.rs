// SPDX-License-Identifier: MIT OR Apache-2.0
//! Domain event emission.
//!
//! Every facade mutation publishes exactly one event.  Event names are
//! dotted `aggregate.verb` strings; payloads carry the affected ids so
//! subscribers never need entity types.

use tbp_events::{Event, EventBus, EventPriority};
use tracing::error;

/// Well-known domain event names.
pub mod domain_event {
    /// A task was created.
    pub const TASK_CREATED: &str = "task.created";
    /// A task was updated.
    pub const TASK_UPDATED: &str = "task.updated";
    /// A task entered the `blocked` status.
    pub const TASK_BLOCKED: &str = "task.blocked";
    /// A task was completed.
    pub const TASK_COMPLETED: &str = "task.completed";
    /// A task was deleted.
    pub const TASK_DELETED: &str = "task.deleted";
    /// A subtask was created.
    pub const SUBTASK_CREATED: &str = "subtask.created";
    /// A subtask was updated.
    pub const SUBTASK_UPDATED: &str = "subtask.updated";
    /// A subtask was completed.
    pub const SUBTASK_COMPLETED: &str = "subtask.completed";
    /// A subtask was deleted.
    pub const SUBTASK_DELETED: &str = "subtask.deleted";
    /// A project was created.
    pub const PROJECT_CREATED: &str = "project.created";
    /// A git branch was created.
    pub const BRANCH_CREATED: &str = "branch.created";
    /// A context was created.
    pub const CONTEXT_CREATED: &str = "context.created";
    /// A context was updated.
    pub const CONTEXT_UPDATED: &str = "context.updated";
    /// A context was deleted.
    pub const CONTEXT_DELETED: &str = "context.deleted";
    /// Context fields were delegated to a higher level.
    pub const CONTEXT_DELEGATED: &str = "context.delegated";
}

/// Publish a domain event on behalf of `user_id`.
///
/// A saturated queue is a loud error, never a silent drop — but the use
/// case that triggered the event has already committed, so the failure does
/// not propagate to the caller.
pub fn publish_domain_event(
    bus: &EventBus,
    event_type: &str,
    payload: serde_json::Value,
    user_id: &str,
) {
    let event = Event::new(event_type, payload)
        .with_priority(EventPriority::Normal)
        .with_user_id(user_id);
    if let Err(err) = bus.publish(event) {
        error!(
            event_type,
            user_id,
            error = %err,
            "domain event dropped: event bus saturated"
        );
    }
}
