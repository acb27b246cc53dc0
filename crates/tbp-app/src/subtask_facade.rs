// SPDX-License-Identifier: MIT OR Apache-2.0
//! The subtask facade.
//!
//! Every operation takes the parent `task_id` and verifies the parent
//! exists under the caller before touching the child — a foreign parent is
//! `NOT_FOUND`, exactly like a missing one.

use crate::events::{domain_event, publish_domain_event};
use crate::inheritance::AgentInheritanceService;
use serde_json::json;
use std::sync::Arc;
use tbp_core::{Subtask, Task, TaskStatus};
use tbp_error::{ErrorCode, TbpError};
use tbp_events::EventBus;
use tbp_storage::{SubtaskRepository, TaskRepository};
use uuid::Uuid;

/// Partial update for a subtask.  `None` fields are left untouched.
#[derive(Debug, Clone, Default)]
pub struct SubtaskPatch {
    /// New title.
    pub title: Option<String>,
    /// New description.
    pub description: Option<String>,
    /// New progress percentage; `100` completes the subtask.
    pub progress_percentage: Option<u8>,
    /// Replacement assignee list.
    pub assignees: Option<Vec<String>>,
    /// Insights discovered while working.
    pub insights_found: Option<Vec<String>>,
    /// Completion summary (recorded when progress reaches 100).
    pub completion_summary: Option<String>,
}

/// Application facade for the subtask aggregate.
pub struct SubtaskFacade {
    tasks: Arc<dyn TaskRepository>,
    subtasks: Arc<dyn SubtaskRepository>,
    inheritance: AgentInheritanceService,
    bus: EventBus,
    user_id: String,
}

impl SubtaskFacade {
    /// Assemble a facade from scoped collaborators.
    pub fn new(
        tasks: Arc<dyn TaskRepository>,
        subtasks: Arc<dyn SubtaskRepository>,
        bus: EventBus,
        user_id: String,
    ) -> Self {
        Self {
            tasks,
            subtasks,
            inheritance: AgentInheritanceService,
            bus,
            user_id,
        }
    }

    /// The parent task, owned by the caller, or `NOT_FOUND`.
    async fn parent(&self, task_id: Uuid) -> Result<Task, TbpError> {
        self.tasks.get(task_id).await
    }

    /// Create a subtask under `task_id`.  Omitted assignees inherit the
    /// parent's list.
    pub async fn create_subtask(
        &self,
        task_id: Uuid,
        title: &str,
        description: Option<String>,
        assignees: Option<Vec<String>>,
    ) -> Result<Subtask, TbpError> {
        if title.trim().is_empty() {
            return Err(TbpError::new(
                ErrorCode::ValidationError,
                "title must not be empty",
            )
            .with_field("title"));
        }
        let parent = self.parent(task_id).await?;

        let mut subtask = Subtask::new(parent.id, self.user_id.clone(), title);
        subtask.description = description.unwrap_or_default();
        subtask.assignees = self
            .inheritance
            .resolve_assignees(&parent, assignees.as_deref())?;

        let subtask = self.subtasks.create(subtask).await?;
        publish_domain_event(
            &self.bus,
            domain_event::SUBTASK_CREATED,
            json!({"subtask_id": subtask.id, "task_id": parent.id}),
            &self.user_id,
        );
        Ok(subtask)
    }

    /// Update a subtask.  Setting `progress_percentage` to 100 is the same
    /// as completing it.
    pub async fn update_subtask(
        &self,
        task_id: Uuid,
        subtask_id: Uuid,
        patch: SubtaskPatch,
    ) -> Result<Subtask, TbpError> {
        self.parent(task_id).await?;
        let mut subtask = self.owned_child(task_id, subtask_id).await?;

        if let Some(title) = patch.title {
            subtask.title = title;
        }
        if let Some(description) = patch.description {
            subtask.description = description;
        }
        if let Some(raw) = &patch.assignees {
            subtask.assignees = tbp_core::agent::validate_assignees(raw)?;
        }
        if let Some(insights) = patch.insights_found {
            subtask.insights_found.extend(insights);
        }
        if let Some(summary) = patch.completion_summary.clone() {
            subtask.completion_summary = Some(summary);
        }
        let completed = if let Some(progress) = patch.progress_percentage {
            subtask.apply_progress(progress);
            subtask.status == TaskStatus::Done
        } else {
            false
        };

        let subtask = self.subtasks.save(subtask).await?;
        publish_domain_event(
            &self.bus,
            if completed {
                domain_event::SUBTASK_COMPLETED
            } else {
                domain_event::SUBTASK_UPDATED
            },
            json!({"subtask_id": subtask.id, "task_id": task_id, "progress": subtask.progress_percentage}),
            &self.user_id,
        );
        Ok(subtask)
    }

    /// Complete a subtask with a mandatory summary.
    pub async fn complete_subtask(
        &self,
        task_id: Uuid,
        subtask_id: Uuid,
        completion_summary: &str,
        insights_found: Option<Vec<String>>,
    ) -> Result<Subtask, TbpError> {
        if completion_summary.trim().is_empty() {
            return Err(TbpError::new(
                ErrorCode::ValidationError,
                "completion requires a non-empty completion_summary",
            )
            .with_field("completion_summary"));
        }
        self.parent(task_id).await?;
        let mut subtask = self.owned_child(task_id, subtask_id).await?;

        subtask.completion_summary = Some(completion_summary.to_string());
        if let Some(insights) = insights_found {
            subtask.insights_found.extend(insights);
        }
        subtask.apply_progress(100);

        let subtask = self.subtasks.save(subtask).await?;
        publish_domain_event(
            &self.bus,
            domain_event::SUBTASK_COMPLETED,
            json!({"subtask_id": subtask.id, "task_id": task_id}),
            &self.user_id,
        );
        Ok(subtask)
    }

    /// All subtasks of `task_id`, oldest first.
    pub async fn list_subtasks(&self, task_id: Uuid) -> Result<Vec<Subtask>, TbpError> {
        self.parent(task_id).await?;
        self.subtasks.list_by_task(task_id).await
    }

    /// One subtask under `task_id`.
    pub async fn get_subtask(&self, task_id: Uuid, subtask_id: Uuid) -> Result<Subtask, TbpError> {
        self.parent(task_id).await?;
        self.owned_child(task_id, subtask_id).await
    }

    /// Delete one subtask under `task_id`.
    pub async fn delete_subtask(
        &self,
        task_id: Uuid,
        subtask_id: Uuid,
    ) -> Result<Subtask, TbpError> {
        self.parent(task_id).await?;
        self.owned_child(task_id, subtask_id).await?;
        let deleted = self.subtasks.delete(subtask_id).await?;
        publish_domain_event(
            &self.bus,
            domain_event::SUBTASK_DELETED,
            json!({"subtask_id": subtask_id, "task_id": task_id}),
            &self.user_id,
        );
        Ok(deleted)
    }

    /// A subtask that belongs to the given parent; a child under a
    /// different task is `NOT_FOUND`.
    async fn owned_child(&self, task_id: Uuid, subtask_id: Uuid) -> Result<Subtask, TbpError> {
        let subtask = self.subtasks.get(subtask_id).await?;
        if subtask.task_id != task_id {
            return Err(TbpError::not_found("subtask", subtask_id));
        }
        Ok(subtask)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
