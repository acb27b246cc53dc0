// SPDX-License-Identifier: MIT OR Apache-2.0
//! The task facade: one method per task use case.

use crate::events::{domain_event, publish_domain_event};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use std::collections::{BTreeSet, HashSet, VecDeque};
use std::sync::Arc;
use tbp_context::{ContextLevel, ContextView, UnifiedContextService};
use tbp_core::agent::validate_assignees;
use tbp_core::{Priority, Task, TaskStatus};
use tbp_error::{ErrorCode, TbpError};
use tbp_events::EventBus;
use tbp_storage::{SubtaskRepository, TaskFilter, TaskRepository};
use tracing::info;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// DTOs
// ---------------------------------------------------------------------------

/// Parameters for task creation.
#[derive(Debug, Clone, Default)]
pub struct NewTask {
    /// Branch the task belongs to.
    pub git_branch_id: Uuid,
    /// Title (required).
    pub title: String,
    /// Description.
    pub description: Option<String>,
    /// Priority; defaults to `medium`.
    pub priority: Option<Priority>,
    /// Raw assignee names; validated against the catalog.
    pub assignees: Vec<String>,
    /// Labels.
    pub labels: Vec<String>,
    /// Due date.
    pub due_date: Option<DateTime<Utc>>,
    /// Effort estimate.
    pub estimated_effort: Option<String>,
}

/// Partial update for a task.  `None` fields are left untouched.
#[derive(Debug, Clone, Default)]
pub struct TaskPatch {
    /// New title.
    pub title: Option<String>,
    /// New description.
    pub description: Option<String>,
    /// New status.  `done` is rejected here; completion goes through
    /// [`TaskFacade::complete_task`].
    pub status: Option<TaskStatus>,
    /// New priority.
    pub priority: Option<Priority>,
    /// Replacement assignee list.
    pub assignees: Option<Vec<String>>,
    /// Replacement label list.
    pub labels: Option<Vec<String>>,
    /// New progress percentage.
    pub progress_percentage: Option<u8>,
    /// New due date.
    pub due_date: Option<DateTime<Utc>>,
    /// New effort estimate.
    pub estimated_effort: Option<String>,
}

/// A task plus its (optionally inherited) context.
#[derive(Debug, Clone, Serialize)]
pub struct TaskWithContext {
    /// The task row.
    pub task: Task,
    /// The merged context, when requested and present.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<ContextView>,
}

// ---------------------------------------------------------------------------
// Facade
// ---------------------------------------------------------------------------

/// Application facade for the task aggregate.
///
/// Holds already-scoped repositories; every mutation emits one domain
/// event.
pub struct TaskFacade {
    tasks: Arc<dyn TaskRepository>,
    subtasks: Arc<dyn SubtaskRepository>,
    context: Arc<UnifiedContextService>,
    bus: EventBus,
    user_id: String,
}

impl TaskFacade {
    /// Assemble a facade from scoped collaborators.
    pub fn new(
        tasks: Arc<dyn TaskRepository>,
        subtasks: Arc<dyn SubtaskRepository>,
        context: Arc<UnifiedContextService>,
        bus: EventBus,
        user_id: String,
    ) -> Self {
        Self {
            tasks,
            subtasks,
            context,
            bus,
            user_id,
        }
    }

    /// Create a task.  Assignees are validated against the catalog.
    pub async fn create_task(&self, new: NewTask) -> Result<Task, TbpError> {
        if new.title.trim().is_empty() {
            return Err(TbpError::new(
                ErrorCode::ValidationError,
                "title must not be empty",
            )
            .with_field("title"));
        }
        let mut task = Task::new(new.git_branch_id, self.user_id.clone(), new.title);
        task.description = new.description.unwrap_or_default();
        task.priority = new.priority.unwrap_or_default();
        task.assignees = validate_assignees(&new.assignees)?;
        task.labels = new.labels.into_iter().collect();
        task.due_date = new.due_date;
        task.estimated_effort = new.estimated_effort;

        let task = self.tasks.create(task).await?;
        publish_domain_event(
            &self.bus,
            domain_event::TASK_CREATED,
            json!({"task_id": task.id, "git_branch_id": task.git_branch_id}),
            &self.user_id,
        );
        Ok(task)
    }

    /// Apply a partial update.  Entering `blocked` emits `task.blocked`.
    pub async fn update_task(&self, task_id: Uuid, patch: TaskPatch) -> Result<Task, TbpError> {
        if patch.status == Some(TaskStatus::Done) {
            return Err(TbpError::new(
                ErrorCode::ValidationError,
                "tasks reach 'done' through the complete action",
            )
            .with_field("status")
            .with_hint("call action=complete with a completion_summary"));
        }
        let assignees = match &patch.assignees {
            Some(raw) => Some(validate_assignees(raw)?),
            None => None,
        };

        let mut task = self.tasks.get(task_id).await?;
        let was_blocked = task.status == TaskStatus::Blocked;
        apply_patch(&mut task, patch, assignees);
        task.touch();
        let task = self.tasks.save(task).await?;

        let event = if task.status == TaskStatus::Blocked && !was_blocked {
            domain_event::TASK_BLOCKED
        } else {
            domain_event::TASK_UPDATED
        };
        publish_domain_event(
            &self.bus,
            event,
            json!({"task_id": task.id, "status": task.status}),
            &self.user_id,
        );
        Ok(task)
    }

    /// Complete a task.
    ///
    /// Incomplete subtasks either fail the call with a structured listing,
    /// or are auto-completed when `force` is set.
    pub async fn complete_task(
        &self,
        task_id: Uuid,
        completion_summary: &str,
        force: bool,
    ) -> Result<Task, TbpError> {
        if completion_summary.trim().is_empty() {
            return Err(TbpError::new(
                ErrorCode::ValidationError,
                "completion requires a non-empty completion_summary",
            )
            .with_field("completion_summary")
            .with_hint("Include completion_summary describing what was completed"));
        }

        let mut task = self.tasks.get(task_id).await?;
        let incomplete: Vec<_> = self
            .subtasks
            .list_by_task(task_id)
            .await?
            .into_iter()
            .filter(|s| !s.status.is_terminal())
            .collect();

        if !incomplete.is_empty() {
            if !force {
                let listing: Vec<_> = incomplete
                    .iter()
                    .map(|s| json!({"id": s.id, "title": s.title, "status": s.status}))
                    .collect();
                return Err(TbpError::new(
                    ErrorCode::ValidationError,
                    format!("task has {} incomplete subtask(s)", incomplete.len()),
                )
                .with_hint("complete the subtasks first, or pass force=true")
                .with_context("incomplete_subtasks", listing));
            }
            for mut subtask in incomplete {
                subtask.apply_progress(100);
                subtask.completion_summary =
                    Some("auto-completed with parent task".to_string());
                self.subtasks.save(subtask).await?;
            }
        }

        task.status = TaskStatus::Done;
        task.progress_percentage = 100;
        task.completion_summary = Some(completion_summary.to_string());
        task.touch();
        let task = self.tasks.save(task).await?;

        publish_domain_event(
            &self.bus,
            domain_event::TASK_COMPLETED,
            json!({"task_id": task.id, "forced_subtasks": force}),
            &self.user_id,
        );
        info!(task_id = %task.id, "task completed");
        Ok(task)
    }

    /// Fetch a task, optionally with its inherited context merged in.
    pub async fn get_task(
        &self,
        task_id: Uuid,
        include_context: bool,
    ) -> Result<TaskWithContext, TbpError> {
        let task = self.tasks.get(task_id).await?;
        let context = if include_context {
            match self
                .context
                .get_context(ContextLevel::Task, &task_id.to_string(), true)
                .await
            {
                Ok(view) => Some(view),
                Err(err) if err.code == ErrorCode::NotFound => None,
                Err(err) => return Err(err),
            }
        } else {
            None
        };
        Ok(TaskWithContext { task, context })
    }

    /// Filtered listing of the caller's tasks.
    pub async fn list_tasks(&self, filter: &TaskFilter) -> Result<Vec<Task>, TbpError> {
        self.tasks.list(filter).await
    }

    /// Full-text search over title and description.
    pub async fn search_tasks(&self, query: &str, limit: usize) -> Result<Vec<Task>, TbpError> {
        self.tasks.search(query, limit).await
    }

    /// The next task to work on: highest priority `todo`/`in_progress`
    /// task on the branch (or across all branches), oldest first on ties.
    pub async fn next_task(&self, git_branch_id: Option<Uuid>) -> Result<Option<Task>, TbpError> {
        let filter = TaskFilter {
            git_branch_id,
            ..TaskFilter::default()
        };
        let mut candidates: Vec<Task> = self
            .tasks
            .list(&filter)
            .await?
            .into_iter()
            .filter(|t| matches!(t.status, TaskStatus::Todo | TaskStatus::InProgress))
            .collect();
        candidates.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then(a.created_at.cmp(&b.created_at))
        });
        Ok(candidates.into_iter().next())
    }

    /// Add a dependency edge `task → dependency`.  Rejected when it would
    /// close a cycle.
    pub async fn add_dependency(
        &self,
        task_id: Uuid,
        dependency_id: Uuid,
    ) -> Result<Task, TbpError> {
        if task_id == dependency_id {
            return Err(TbpError::new(
                ErrorCode::DependencyCycle,
                "a task cannot depend on itself",
            ));
        }
        let mut task = self.tasks.get(task_id).await?;
        // Both ends must exist and be owned.
        self.tasks.get(dependency_id).await?;

        if self.reaches(dependency_id, task_id).await? {
            return Err(TbpError::new(
                ErrorCode::DependencyCycle,
                "adding this dependency would create a cycle",
            )
            .with_context("task_id", task_id)
            .with_context("dependency_id", dependency_id));
        }

        task.dependencies.insert(dependency_id);
        task.touch();
        let task = self.tasks.save(task).await?;
        publish_domain_event(
            &self.bus,
            domain_event::TASK_UPDATED,
            json!({"task_id": task.id, "dependency_added": dependency_id}),
            &self.user_id,
        );
        Ok(task)
    }

    /// Remove a dependency edge.
    pub async fn remove_dependency(
        &self,
        task_id: Uuid,
        dependency_id: Uuid,
    ) -> Result<Task, TbpError> {
        let mut task = self.tasks.get(task_id).await?;
        if !task.dependencies.remove(&dependency_id) {
            return Err(TbpError::not_found("dependency", dependency_id));
        }
        task.touch();
        let task = self.tasks.save(task).await?;
        publish_domain_event(
            &self.bus,
            domain_event::TASK_UPDATED,
            json!({"task_id": task.id, "dependency_removed": dependency_id}),
            &self.user_id,
        );
        Ok(task)
    }

    /// Delete a task, cascading to its subtasks and context.
    pub async fn delete_task(&self, task_id: Uuid) -> Result<Task, TbpError> {
        let task = self.tasks.delete(task_id).await?;
        for subtask in self.subtasks.list_by_task(task_id).await? {
            self.subtasks.delete(subtask.id).await?;
        }
        match self
            .context
            .delete_context(ContextLevel::Task, &task_id.to_string())
            .await
        {
            Ok(()) => {}
            Err(err) if err.code == ErrorCode::NotFound => {}
            Err(err) => return Err(err),
        }
        publish_domain_event(
            &self.bus,
            domain_event::TASK_DELETED,
            json!({"task_id": task.id}),
            &self.user_id,
        );
        Ok(task)
    }

    /// BFS reachability over dependency edges, bounded by the caller's task
    /// count: is `to` reachable from `from`?
    async fn reaches(&self, from: Uuid, to: Uuid) -> Result<bool, TbpError> {
        let all = self.tasks.list(&TaskFilter::default()).await?;
        let edges: std::collections::HashMap<Uuid, BTreeSet<Uuid>> =
            all.into_iter().map(|t| (t.id, t.dependencies)).collect();

        let mut visited: HashSet<Uuid> = HashSet::new();
        let mut queue = VecDeque::from([from]);
        while let Some(current) = queue.pop_front() {
            if current == to {
                return Ok(true);
            }
            if !visited.insert(current) {
                continue;
            }
            if let Some(next) = edges.get(&current) {
                queue.extend(next.iter().copied());
            }
        }
        Ok(false)
    }
}

fn apply_patch(task: &mut Task, patch: TaskPatch, assignees: Option<BTreeSet<tbp_core::AgentName>>) {
    if let Some(title) = patch.title {
        task.title = title;
    }
    if let Some(description) = patch.description {
        task.description = description;
    }
    if let Some(status) = patch.status {
        task.status = status;
    }
    if let Some(priority) = patch.priority {
        task.priority = priority;
    }
    if let Some(assignees) = assignees {
        task.assignees = assignees;
    }
    if let Some(labels) = patch.labels {
        task.labels = labels.into_iter().collect();
    }
    if let Some(progress) = patch.progress_percentage {
        task.progress_percentage = progress.min(100);
        if task.status == TaskStatus::Todo && progress > 0 {
            task.status = TaskStatus::InProgress;
        }
    }
    if let Some(due_date) = patch.due_date {
        task.due_date = Some(due_date);
    }
    if let Some(effort) = patch.estimated_effort {
        task.estimated_effort = Some(effort);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tbp_storage::{AuditLog, InvalidationEmitter, StorageEngine};

    struct Fixture {
        facade: TaskFacade,
        branch_id: Uuid,
    }

    async fn fixture() -> Fixture {
        let engine = StorageEngine::new(InvalidationEmitter::disabled());
        let project = engine
            .projects()
            .with_user("user-a")
            .create(tbp_core::Project::new("user-a", "p"))
            .await
            .unwrap();
        let branch = engine
            .branches()
            .with_user("user-a")
            .create(tbp_core::GitBranch::new(project.id, "user-a", "main"))
            .await
            .unwrap();
        let context = Arc::new(
            UnifiedContextService::new(
                AuditLog::new(),
                engine.branches(),
                InvalidationEmitter::disabled(),
            )
            .with_user("user-a"),
        );
        let bus = EventBus::default();
        bus.start();
        Fixture {
            facade: TaskFacade::new(
                engine.tasks().with_user("user-a"),
                engine.subtasks().with_user("user-a"),
                context,
                bus,
                "user-a".into(),
            ),
            branch_id: branch.id,
        }
    }

    fn new_task(branch: Uuid, title: &str) -> NewTask {
        NewTask {
            git_branch_id: branch,
            title: title.into(),
            ..NewTask::default()
        }
    }

    // -- create ----------------------------------------------------------

    #[tokio::test]
    async fn create_applies_defaults() {
        let f = fixture().await;
        let task = f.facade.create_task(new_task(f.branch_id, "t")).await.unwrap();
        assert_eq!(task.status, TaskStatus::Todo);
        assert_eq!(task.priority, Priority::Medium);
        assert_eq!(task.user_id, "user-a");
    }

    #[tokio::test]
    async fn create_rejects_invalid_assignees() {
        let f = fixture().await;
        let mut new = new_task(f.branch_id, "t");
        new.assignees = vec!["nope-agent".into()];
        let err = f.facade.create_task(new).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::ValidationError);
    }

    #[tokio::test]
    async fn create_rejects_blank_title() {
        let f = fixture().await;
        let err = f
            .facade
            .create_task(new_task(f.branch_id, "   "))
            .await
            .unwrap_err();
        assert_eq!(err.field.as_deref(), Some("title"));
    }

    // -- update / complete ------------------------------------------------

    #[tokio::test]
    async fn update_cannot_set_done_directly() {
        let f = fixture().await;
        let task = f.facade.create_task(new_task(f.branch_id, "t")).await.unwrap();
        let err = f
            .facade
            .update_task(
                task.id,
                TaskPatch {
                    status: Some(TaskStatus::Done),
                    ..TaskPatch::default()
                },
            )
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::ValidationError);
    }

    #[tokio::test]
    async fn complete_requires_summary() {
        let f = fixture().await;
        let task = f.facade.create_task(new_task(f.branch_id, "t")).await.unwrap();
        let err = f.facade.complete_task(task.id, "  ", false).await.unwrap_err();
        assert_eq!(err.field.as_deref(), Some("completion_summary"));
    }

    #[tokio::test]
    async fn complete_lists_incomplete_subtasks() {
        let f = fixture().await;
        let task = f.facade.create_task(new_task(f.branch_id, "t")).await.unwrap();
        let subtask = tbp_core::Subtask::new(task.id, "user-a", "child");
        f.facade.subtasks.create(subtask.clone()).await.unwrap();

        let err = f
            .facade
            .complete_task(task.id, "all wrapped up", false)
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::ValidationError);
        let listed = err.context["incomplete_subtasks"].as_array().unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0]["title"], json!("child"));

        // Status unchanged on failure.
        let unchanged = f.facade.tasks.get(task.id).await.unwrap();
        assert_eq!(unchanged.status, TaskStatus::Todo);
    }

    #[tokio::test]
    async fn force_complete_cascades_to_subtasks() {
        let f = fixture().await;
        let task = f.facade.create_task(new_task(f.branch_id, "t")).await.unwrap();
        let subtask = tbp_core::Subtask::new(task.id, "user-a", "child");
        f.facade.subtasks.create(subtask.clone()).await.unwrap();

        let done = f
            .facade
            .complete_task(task.id, "all wrapped up", true)
            .await
            .unwrap();
        assert_eq!(done.status, TaskStatus::Done);
        assert_eq!(done.progress_percentage, 100);

        let child = f.facade.subtasks.get(subtask.id).await.unwrap();
        assert_eq!(child.status, TaskStatus::Done);
        assert!(child.completed_at.is_some());
    }

    // -- next -------------------------------------------------------------

    #[tokio::test]
    async fn next_prefers_priority_then_age() {
        let f = fixture().await;
        let mut low = new_task(f.branch_id, "low");
        low.priority = Some(Priority::Low);
        f.facade.create_task(low).await.unwrap();

        let mut urgent_old = new_task(f.branch_id, "urgent-old");
        urgent_old.priority = Some(Priority::Urgent);
        let urgent_old = f.facade.create_task(urgent_old).await.unwrap();

        let mut urgent_new = new_task(f.branch_id, "urgent-new");
        urgent_new.priority = Some(Priority::Urgent);
        f.facade.create_task(urgent_new).await.unwrap();

        let next = f.facade.next_task(Some(f.branch_id)).await.unwrap().unwrap();
        assert_eq!(next.id, urgent_old.id);
    }

    #[tokio::test]
    async fn next_skips_terminal_and_blocked() {
        let f = fixture().await;
        let task = f.facade.create_task(new_task(f.branch_id, "t")).await.unwrap();
        f.facade.complete_task(task.id, "done", false).await.unwrap();
        assert!(f.facade.next_task(Some(f.branch_id)).await.unwrap().is_none());
    }

    // -- dependencies -----------------------------------------------------

    #[tokio::test]
    async fn dependency_cycles_are_rejected() {
        let f = fixture().await;
        let a = f.facade.create_task(new_task(f.branch_id, "a")).await.unwrap();
        let b = f.facade.create_task(new_task(f.branch_id, "b")).await.unwrap();
        let c = f.facade.create_task(new_task(f.branch_id, "c")).await.unwrap();

        f.facade.add_dependency(a.id, b.id).await.unwrap();
        f.facade.add_dependency(b.id, c.id).await.unwrap();

        // c → a would close the loop.
        let err = f.facade.add_dependency(c.id, a.id).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::DependencyCycle);

        // Self-dependency is the trivial cycle.
        let err = f.facade.add_dependency(a.id, a.id).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::DependencyCycle);
    }

    #[tokio::test]
    async fn remove_dependency_roundtrip() {
        let f = fixture().await;
        let a = f.facade.create_task(new_task(f.branch_id, "a")).await.unwrap();
        let b = f.facade.create_task(new_task(f.branch_id, "b")).await.unwrap();

        f.facade.add_dependency(a.id, b.id).await.unwrap();
        let after = f.facade.remove_dependency(a.id, b.id).await.unwrap();
        assert!(after.dependencies.is_empty());

        let err = f.facade.remove_dependency(a.id, b.id).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::NotFound);
    }

    // -- delete -----------------------------------------------------------

    #[tokio::test]
    async fn delete_cascades_to_subtasks() {
        let f = fixture().await;
        let task = f.facade.create_task(new_task(f.branch_id, "t")).await.unwrap();
        let subtask = tbp_core::Subtask::new(task.id, "user-a", "child");
        let subtask = f.facade.subtasks.create(subtask).await.unwrap();

        f.facade.delete_task(task.id).await.unwrap();

        assert_eq!(
            f.facade.tasks.get(task.id).await.unwrap_err().code,
            ErrorCode::NotFound
        );
        assert_eq!(
            f.facade.subtasks.get(subtask.id).await.unwrap_err().code,
            ErrorCode::NotFound
        );
    }
}
