// SPDX-License-Identifier: MIT OR Apache-2.0
//! The context facade.
//!
//! Wraps the unified context service one-to-one and emits the domain events
//! the service layer does not know about.  Controllers only ever see this
//! facade; the per-level stores stay out of reach.

use crate::events::{domain_event, publish_domain_event};
use serde_json::{json, Value};
use std::sync::Arc;
use tbp_context::{ContextLevel, ContextView, DelegationOutcome, UnifiedContextService};
use tbp_error::TbpError;
use tbp_events::EventBus;

/// Application facade for the context aggregate.
pub struct ContextFacade {
    service: Arc<UnifiedContextService>,
    bus: EventBus,
    user_id: String,
}

impl ContextFacade {
    /// Assemble a facade over an already-scoped service.
    pub fn new(service: Arc<UnifiedContextService>, bus: EventBus, user_id: String) -> Self {
        Self {
            service,
            bus,
            user_id,
        }
    }

    /// Create a context, auto-creating missing ancestors.
    pub async fn create_context(
        &self,
        level: ContextLevel,
        context_id: &str,
        data: Value,
    ) -> Result<ContextView, TbpError> {
        let view = self.service.create_context(level, context_id, data).await?;
        publish_domain_event(
            &self.bus,
            domain_event::CONTEXT_CREATED,
            json!({"level": level, "context_id": view.id}),
            &self.user_id,
        );
        Ok(view)
    }

    /// Fetch a context, optionally with inherited settings merged in.
    pub async fn get_context(
        &self,
        level: ContextLevel,
        context_id: &str,
        include_inherited: bool,
    ) -> Result<ContextView, TbpError> {
        self.service
            .get_context(level, context_id, include_inherited)
            .await
    }

    /// Merge data into a context, optionally invalidating descendants.
    pub async fn update_context(
        &self,
        level: ContextLevel,
        context_id: &str,
        data: Value,
        propagate_changes: bool,
    ) -> Result<ContextView, TbpError> {
        let view = self
            .service
            .update_context(level, context_id, data, propagate_changes)
            .await?;
        publish_domain_event(
            &self.bus,
            domain_event::CONTEXT_UPDATED,
            json!({"level": level, "context_id": view.id, "propagated": propagate_changes}),
            &self.user_id,
        );
        Ok(view)
    }

    /// Delete a context.
    pub async fn delete_context(
        &self,
        level: ContextLevel,
        context_id: &str,
    ) -> Result<(), TbpError> {
        self.service.delete_context(level, context_id).await?;
        publish_domain_event(
            &self.bus,
            domain_event::CONTEXT_DELETED,
            json!({"level": level, "context_id": context_id}),
            &self.user_id,
        );
        Ok(())
    }

    /// Append an insight to a task context.
    pub async fn add_insight(
        &self,
        task_context_id: &str,
        content: &str,
        category: Option<&str>,
        importance: Option<&str>,
    ) -> Result<ContextView, TbpError> {
        let view = self
            .service
            .add_insight(task_context_id, content, category, importance)
            .await?;
        publish_domain_event(
            &self.bus,
            domain_event::CONTEXT_UPDATED,
            json!({"level": ContextLevel::Task, "context_id": view.id, "insight": true}),
            &self.user_id,
        );
        Ok(view)
    }

    /// Promote fields to a higher level.
    pub async fn delegate(
        &self,
        level: ContextLevel,
        context_id: &str,
        delegate_to: ContextLevel,
        fields: &[String],
    ) -> Result<DelegationOutcome, TbpError> {
        let outcome = self
            .service
            .delegate(level, context_id, delegate_to, fields)
            .await?;
        publish_domain_event(
            &self.bus,
            domain_event::CONTEXT_DELEGATED,
            json!({
                "from_level": level,
                "to_level": delegate_to,
                "source_id": outcome.source.id,
                "target_id": outcome.target.id,
                "fields": fields,
            }),
            &self.user_id,
        );
        Ok(outcome)
    }

    /// All contexts at one level.
    pub async fn list_contexts(&self, level: ContextLevel) -> Result<Vec<ContextView>, TbpError> {
        self.service.list_contexts(level).await
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
