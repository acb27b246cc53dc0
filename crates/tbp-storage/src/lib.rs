// SPDX-License-Identifier: MIT OR Apache-2.0
//! User-scoped storage for the task backplane.
//!
//! The single most important cross-cutting contract in the plane lives here:
//! every repository is scoped to a caller, every read is filtered by
//! `user_id`, every write stamps it, and ownership violations surface as
//! `NOT_FOUND` so callers cannot probe other users' ids.  Repositories built
//! without a scope exist for bootstrap only.
//!
//! The in-memory engine is the test-environment backend and the default
//! driver slot; SQL drivers plug in behind the same traits.

#![deny(unsafe_code)]

mod cached;
mod factory;
mod memory;
mod table;

pub use cached::CachedTaskRepository;
pub use factory::{DatabaseKind, Environment, EnvironmentConfig, RepositoryFactory};
pub use memory::{
    InMemoryBranchRepository, InMemoryProjectRepository, InMemorySubtaskRepository,
    InMemoryTaskRepository, InMemoryTokenRepository, StorageEngine,
};
pub use table::{AuditLog, InvalidationEmitter, ScopedTable, UserOwned};

use std::sync::Arc;
use tbp_core::{
    AgentName, ApiToken, GitBranch, Priority, Project, Subtask, Task, TaskStatus,
};
use tbp_error::TbpError;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Filters
// ---------------------------------------------------------------------------

/// Listing filter for tasks.  All present fields must match; `assignees` and
/// `labels` match when the task carries any of the listed values.
#[derive(Debug, Clone, Default)]
pub struct TaskFilter {
    /// Restrict to one branch.  When set, every returned task MUST carry
    /// this branch id — leaking across branches is as severe as leaking
    /// across users.
    pub git_branch_id: Option<Uuid>,
    /// Restrict to one status.
    pub status: Option<TaskStatus>,
    /// Restrict to one priority.
    pub priority: Option<Priority>,
    /// Match tasks assigned to any of these agents.
    pub assignees: Vec<AgentName>,
    /// Match tasks carrying any of these labels.
    pub labels: Vec<String>,
    /// Cap the result count.
    pub limit: Option<usize>,
}

impl TaskFilter {
    /// Whether `task` passes every present predicate (scoping excluded —
    /// the repository has already applied it).
    pub fn matches(&self, task: &Task) -> bool {
        if let Some(branch) = self.git_branch_id {
            if task.git_branch_id != branch {
                return false;
            }
        }
        if let Some(status) = self.status {
            if task.status != status {
                return false;
            }
        }
        if let Some(priority) = self.priority {
            if task.priority != priority {
                return false;
            }
        }
        if !self.assignees.is_empty()
            && !self.assignees.iter().any(|a| task.assignees.contains(a))
        {
            return false;
        }
        if !self.labels.is_empty() && !self.labels.iter().any(|l| task.labels.contains(l)) {
            return false;
        }
        true
    }
}

// ---------------------------------------------------------------------------
// Repository contracts
// ---------------------------------------------------------------------------

/// Project repository contract.
#[async_trait::async_trait]
pub trait ProjectRepository: Send + Sync {
    /// A copy of this repository scoped to `user_id` (cheap; shares storage).
    fn with_user(&self, user_id: &str) -> Arc<dyn ProjectRepository>;
    /// Create a project; `(user_id, name)` must be unique.
    async fn create(&self, project: Project) -> Result<Project, TbpError>;
    /// Fetch one project the caller owns.
    async fn get(&self, id: Uuid) -> Result<Project, TbpError>;
    /// All projects the caller owns.
    async fn list(&self) -> Result<Vec<Project>, TbpError>;
    /// Persist changes to a project the caller owns.
    async fn save(&self, project: Project) -> Result<Project, TbpError>;
    /// Delete a project the caller owns.
    async fn delete(&self, id: Uuid) -> Result<Project, TbpError>;
}

/// Git-branch repository contract.
#[async_trait::async_trait]
pub trait BranchRepository: Send + Sync {
    /// A copy of this repository scoped to `user_id`.
    fn with_user(&self, user_id: &str) -> Arc<dyn BranchRepository>;
    /// Create a branch; `(user_id, project_id, name)` must be unique.
    async fn create(&self, branch: GitBranch) -> Result<GitBranch, TbpError>;
    /// Fetch one branch the caller owns.
    async fn get(&self, id: Uuid) -> Result<GitBranch, TbpError>;
    /// All branches of one project the caller owns.
    async fn list_by_project(&self, project_id: Uuid) -> Result<Vec<GitBranch>, TbpError>;
    /// Persist changes to a branch the caller owns.
    async fn save(&self, branch: GitBranch) -> Result<GitBranch, TbpError>;
    /// Delete a branch the caller owns.
    async fn delete(&self, id: Uuid) -> Result<GitBranch, TbpError>;
}

/// Task repository contract.
#[async_trait::async_trait]
pub trait TaskRepository: Send + Sync {
    /// A copy of this repository scoped to `user_id`.
    fn with_user(&self, user_id: &str) -> Arc<dyn TaskRepository>;
    /// Create a task.
    async fn create(&self, task: Task) -> Result<Task, TbpError>;
    /// Fetch one task the caller owns.
    async fn get(&self, id: Uuid) -> Result<Task, TbpError>;
    /// Fetch one task, `None` when absent or foreign.
    async fn find(&self, id: Uuid) -> Result<Option<Task>, TbpError>;
    /// Filtered listing of the caller's tasks.
    async fn list(&self, filter: &TaskFilter) -> Result<Vec<Task>, TbpError>;
    /// Case-insensitive full-text search over title and description.
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<Task>, TbpError>;
    /// Persist changes to a task the caller owns.
    async fn save(&self, task: Task) -> Result<Task, TbpError>;
    /// Delete a task the caller owns.
    async fn delete(&self, id: Uuid) -> Result<Task, TbpError>;
}

/// Subtask repository contract.
#[async_trait::async_trait]
pub trait SubtaskRepository: Send + Sync {
    /// A copy of this repository scoped to `user_id`.
    fn with_user(&self, user_id: &str) -> Arc<dyn SubtaskRepository>;
    /// Create a subtask.
    async fn create(&self, subtask: Subtask) -> Result<Subtask, TbpError>;
    /// Fetch one subtask the caller owns.
    async fn get(&self, id: Uuid) -> Result<Subtask, TbpError>;
    /// All subtasks of one parent task, oldest first.
    async fn list_by_task(&self, task_id: Uuid) -> Result<Vec<Subtask>, TbpError>;
    /// Persist changes to a subtask the caller owns.
    async fn save(&self, subtask: Subtask) -> Result<Subtask, TbpError>;
    /// Delete a subtask the caller owns.
    async fn delete(&self, id: Uuid) -> Result<Subtask, TbpError>;
}

/// API-token repository contract.
#[async_trait::async_trait]
pub trait TokenRepository: Send + Sync {
    /// A copy of this repository scoped to `user_id`.
    fn with_user(&self, user_id: &str) -> Arc<dyn TokenRepository>;
    /// Create a token row; `token_hash` must be unique plane-wide.
    async fn create(&self, token: ApiToken) -> Result<ApiToken, TbpError>;
    /// All tokens the caller owns.
    async fn list(&self) -> Result<Vec<ApiToken>, TbpError>;
    /// Revoke a token the caller owns.
    async fn revoke(&self, id: Uuid) -> Result<ApiToken, TbpError>;
}
