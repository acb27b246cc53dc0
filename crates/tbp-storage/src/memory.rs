// SPDX-License-Identifier: MIT OR Apache-2.0
//! In-memory repository implementations.
//!
//! The deterministic backend the test environment uses and the default
//! driver slot for the others.  All repositories over one [`StorageEngine`]
//! share row stores, the audit log, and the invalidation emitter; scoping a
//! repository is an `Arc` clone away.

use crate::table::{AuditLog, InvalidationEmitter, ScopedTable};
use crate::{
    BranchRepository, ProjectRepository, SubtaskRepository, TaskFilter, TaskRepository,
    TokenRepository,
};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tbp_auth::ApiTokenStore;
use tbp_core::{ApiToken, GitBranch, Project, Subtask, Task};
use tbp_error::{ErrorCode, TbpError};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// StorageEngine
// ---------------------------------------------------------------------------

/// The shared in-memory database: one table per entity, one audit log.
#[derive(Clone)]
pub struct StorageEngine {
    audit: AuditLog,
    projects: ScopedTable<Project>,
    branches: ScopedTable<GitBranch>,
    tasks: ScopedTable<Task>,
    subtasks: ScopedTable<Subtask>,
    tokens: ScopedTable<ApiToken>,
}

impl StorageEngine {
    /// Fresh empty engine.  Mutations emit invalidations through `emitter`.
    pub fn new(emitter: InvalidationEmitter) -> Self {
        let audit = AuditLog::new();
        Self {
            projects: ScopedTable::new(audit.clone(), emitter.clone()),
            branches: ScopedTable::new(audit.clone(), emitter.clone()),
            tasks: ScopedTable::new(audit.clone(), emitter.clone()),
            subtasks: ScopedTable::new(audit.clone(), emitter.clone()),
            tokens: ScopedTable::new(audit.clone(), emitter),
            audit,
        }
    }

    /// The shared audit log.
    pub fn audit(&self) -> &AuditLog {
        &self.audit
    }

    /// Bootstrap (unscoped) project repository.
    pub fn projects(&self) -> Arc<dyn ProjectRepository> {
        Arc::new(InMemoryProjectRepository {
            table: self.projects.clone(),
        })
    }

    /// Bootstrap (unscoped) branch repository.
    pub fn branches(&self) -> Arc<dyn BranchRepository> {
        Arc::new(InMemoryBranchRepository {
            table: self.branches.clone(),
            projects: self.projects.clone(),
        })
    }

    /// Bootstrap (unscoped) task repository.
    pub fn tasks(&self) -> Arc<dyn TaskRepository> {
        Arc::new(InMemoryTaskRepository {
            table: self.tasks.clone(),
        })
    }

    /// Bootstrap (unscoped) subtask repository.
    pub fn subtasks(&self) -> Arc<dyn SubtaskRepository> {
        Arc::new(InMemorySubtaskRepository {
            table: self.subtasks.clone(),
        })
    }

    /// Bootstrap (unscoped) API-token repository.
    pub fn tokens(&self) -> Arc<InMemoryTokenRepository> {
        Arc::new(InMemoryTokenRepository {
            table: self.tokens.clone(),
            unscoped: self.tokens.clone(),
        })
    }
}

fn by_created_at<T>(items: &mut [T], created_at: impl Fn(&T) -> DateTime<Utc>) {
    items.sort_by_key(created_at);
}

// ---------------------------------------------------------------------------
// Projects
// ---------------------------------------------------------------------------

/// In-memory [`ProjectRepository`].
pub struct InMemoryProjectRepository {
    table: ScopedTable<Project>,
}

#[async_trait::async_trait]
impl ProjectRepository for InMemoryProjectRepository {
    fn with_user(&self, user_id: &str) -> Arc<dyn ProjectRepository> {
        Arc::new(Self {
            table: self.table.with_user(user_id),
        })
    }

    async fn create(&self, project: Project) -> Result<Project, TbpError> {
        let owner = self
            .table
            .scope()
            .unwrap_or(&project.user_id)
            .to_string();
        let duplicate = self
            .table
            .find_where(|p| p.user_id == owner && p.name == project.name)
            .await;
        if duplicate.is_some() {
            return Err(TbpError::new(
                ErrorCode::Conflict,
                format!("project name already in use: {}", project.name),
            )
            .with_field("name"));
        }
        self.table.insert(project).await
    }

    async fn get(&self, id: Uuid) -> Result<Project, TbpError> {
        self.table.get(id).await
    }

    async fn list(&self) -> Result<Vec<Project>, TbpError> {
        let mut projects = self.table.list_where(|_| true).await;
        by_created_at(&mut projects, |p| p.created_at);
        Ok(projects)
    }

    async fn save(&self, project: Project) -> Result<Project, TbpError> {
        self.table.replace(project).await
    }

    async fn delete(&self, id: Uuid) -> Result<Project, TbpError> {
        self.table.remove(id).await
    }
}

// ---------------------------------------------------------------------------
// Branches
// ---------------------------------------------------------------------------

/// In-memory [`BranchRepository`].
pub struct InMemoryBranchRepository {
    table: ScopedTable<GitBranch>,
    projects: ScopedTable<Project>,
}

#[async_trait::async_trait]
impl BranchRepository for InMemoryBranchRepository {
    fn with_user(&self, user_id: &str) -> Arc<dyn BranchRepository> {
        Arc::new(Self {
            table: self.table.with_user(user_id),
            projects: self.projects.with_user(user_id),
        })
    }

    async fn create(&self, branch: GitBranch) -> Result<GitBranch, TbpError> {
        // The parent project must exist and be owned by the caller.
        self.projects.get(branch.project_id).await?;

        let owner = self.table.scope().unwrap_or(&branch.user_id).to_string();
        let duplicate = self
            .table
            .find_where(|b| {
                b.user_id == owner && b.project_id == branch.project_id && b.name == branch.name
            })
            .await;
        if duplicate.is_some() {
            return Err(TbpError::new(
                ErrorCode::Conflict,
                format!("branch name already in use: {}", branch.name),
            )
            .with_field("name"));
        }
        self.table.insert(branch).await
    }

    async fn get(&self, id: Uuid) -> Result<GitBranch, TbpError> {
        self.table.get(id).await
    }

    async fn list_by_project(&self, project_id: Uuid) -> Result<Vec<GitBranch>, TbpError> {
        let mut branches = self
            .table
            .list_where(|b| b.project_id == project_id)
            .await;
        by_created_at(&mut branches, |b| b.created_at);
        Ok(branches)
    }

    async fn save(&self, branch: GitBranch) -> Result<GitBranch, TbpError> {
        self.table.replace(branch).await
    }

    async fn delete(&self, id: Uuid) -> Result<GitBranch, TbpError> {
        self.table.remove(id).await
    }
}

// ---------------------------------------------------------------------------
// Tasks
// ---------------------------------------------------------------------------

/// In-memory [`TaskRepository`].
pub struct InMemoryTaskRepository {
    table: ScopedTable<Task>,
}

#[async_trait::async_trait]
impl TaskRepository for InMemoryTaskRepository {
    fn with_user(&self, user_id: &str) -> Arc<dyn TaskRepository> {
        Arc::new(Self {
            table: self.table.with_user(user_id),
        })
    }

    async fn create(&self, task: Task) -> Result<Task, TbpError> {
        self.table.insert(task).await
    }

    async fn get(&self, id: Uuid) -> Result<Task, TbpError> {
        self.table.get(id).await
    }

    async fn find(&self, id: Uuid) -> Result<Option<Task>, TbpError> {
        Ok(self.table.find(id).await)
    }

    async fn list(&self, filter: &TaskFilter) -> Result<Vec<Task>, TbpError> {
        let mut tasks = self.table.list_where(|t| filter.matches(t)).await;
        by_created_at(&mut tasks, |t| t.created_at);
        if let Some(limit) = filter.limit {
            tasks.truncate(limit);
        }
        Ok(tasks)
    }

    async fn search(&self, query: &str, limit: usize) -> Result<Vec<Task>, TbpError> {
        let needle = query.to_lowercase();
        let mut tasks = self
            .table
            .list_where(|t| {
                t.title.to_lowercase().contains(&needle)
                    || t.description.to_lowercase().contains(&needle)
            })
            .await;
        by_created_at(&mut tasks, |t| t.created_at);
        tasks.truncate(limit);
        Ok(tasks)
    }

    async fn save(&self, task: Task) -> Result<Task, TbpError> {
        self.table.replace(task).await
    }

    async fn delete(&self, id: Uuid) -> Result<Task, TbpError> {
        self.table.remove(id).await
    }
}

// ---------------------------------------------------------------------------
// Subtasks
// ---------------------------------------------------------------------------

/// In-memory [`SubtaskRepository`].
pub struct InMemorySubtaskRepository {
    table: ScopedTable<Subtask>,
}

#[async_trait::async_trait]
impl SubtaskRepository for InMemorySubtaskRepository {
    fn with_user(&self, user_id: &str) -> Arc<dyn SubtaskRepository> {
        Arc::new(Self {
            table: self.table.with_user(user_id),
        })
    }

    async fn create(&self, subtask: Subtask) -> Result<Subtask, TbpError> {
        self.table.insert(subtask).await
    }

    async fn get(&self, id: Uuid) -> Result<Subtask, TbpError> {
        self.table.get(id).await
    }

    async fn list_by_task(&self, task_id: Uuid) -> Result<Vec<Subtask>, TbpError> {
        let mut subtasks = self.table.list_where(|s| s.task_id == task_id).await;
        by_created_at(&mut subtasks, |s| s.created_at);
        Ok(subtasks)
    }

    async fn save(&self, subtask: Subtask) -> Result<Subtask, TbpError> {
        self.table.replace(subtask).await
    }

    async fn delete(&self, id: Uuid) -> Result<Subtask, TbpError> {
        self.table.remove(id).await
    }
}

// ---------------------------------------------------------------------------
// API tokens
// ---------------------------------------------------------------------------

/// In-memory [`TokenRepository`].
///
/// Token validation runs before authentication, so [`ApiTokenStore`] lookups
/// deliberately search across users via the unscoped handle; everything else
/// stays scoped.
pub struct InMemoryTokenRepository {
    table: ScopedTable<ApiToken>,
    unscoped: ScopedTable<ApiToken>,
}

#[async_trait::async_trait]
impl TokenRepository for InMemoryTokenRepository {
    fn with_user(&self, user_id: &str) -> Arc<dyn TokenRepository> {
        Arc::new(Self {
            table: self.table.with_user(user_id),
            unscoped: self.unscoped.clone(),
        })
    }

    async fn create(&self, token: ApiToken) -> Result<ApiToken, TbpError> {
        // token_hash is unique plane-wide, not per user.
        let duplicate = self
            .unscoped
            .find_where(|t| t.token_hash == token.token_hash)
            .await;
        if duplicate.is_some() {
            return Err(TbpError::new(
                ErrorCode::Conflict,
                "token hash already exists",
            ));
        }
        self.table.insert(token).await
    }

    async fn list(&self) -> Result<Vec<ApiToken>, TbpError> {
        let mut tokens = self.table.list_where(|_| true).await;
        by_created_at(&mut tokens, |t| t.created_at);
        Ok(tokens)
    }

    async fn revoke(&self, id: Uuid) -> Result<ApiToken, TbpError> {
        self.table.update(id, |t| t.is_active = false).await
    }
}

#[async_trait::async_trait]
impl ApiTokenStore for InMemoryTokenRepository {
    async fn find_by_hash(&self, token_hash: &str) -> Result<Option<ApiToken>, TbpError> {
        Ok(self
            .unscoped
            .find_where(|t| t.token_hash == token_hash)
            .await)
    }

    async fn record_usage(&self, token_id: Uuid, when: DateTime<Utc>) -> Result<(), TbpError> {
        self.unscoped
            .update(token_id, |t| {
                t.last_used_at = Some(when);
                t.usage_count += 1;
            })
            .await?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tbp_core::{Priority, TaskStatus};

    fn engine() -> StorageEngine {
        StorageEngine::new(InvalidationEmitter::disabled())
    }

    async fn seed_branch(engine: &StorageEngine, user: &str) -> GitBranch {
        let projects = engine.projects().with_user(user);
        let project = projects
            .create(Project::new(user, format!("proj-{user}")))
            .await
            .unwrap();
        let branches = engine.branches().with_user(user);
        branches
            .create(GitBranch::new(project.id, user, "main"))
            .await
            .unwrap()
    }

    // -- uniqueness ------------------------------------------------------

    #[tokio::test]
    async fn project_names_unique_per_user_not_globally() {
        let engine = engine();
        let a = engine.projects().with_user("user-a");
        let b = engine.projects().with_user("user-b");

        a.create(Project::new("user-a", "shared-name")).await.unwrap();
        let err = a
            .create(Project::new("user-a", "shared-name"))
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::Conflict);

        // Same name under a different user is fine.
        assert!(b.create(Project::new("user-b", "shared-name")).await.is_ok());
    }

    #[tokio::test]
    async fn branch_requires_owned_project() {
        let engine = engine();
        let branch_of_a = seed_branch(&engine, "user-a").await;

        // user-b cannot hang a branch off user-a's project.
        let b = engine.branches().with_user("user-b");
        let err = b
            .create(GitBranch::new(branch_of_a.project_id, "user-b", "feature"))
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::NotFound);
    }

    #[tokio::test]
    async fn branch_names_unique_within_project() {
        let engine = engine();
        let branch = seed_branch(&engine, "user-a").await;
        let branches = engine.branches().with_user("user-a");
        let err = branches
            .create(GitBranch::new(branch.project_id, "user-a", "main"))
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::Conflict);
    }

    // -- task listing ----------------------------------------------------

    #[tokio::test]
    async fn list_filters_by_branch_exactly() {
        let engine = engine();
        let b1 = seed_branch(&engine, "user-a").await;
        let branches = engine.branches().with_user("user-a");
        let b2 = branches
            .create(GitBranch::new(b1.project_id, "user-a", "feature"))
            .await
            .unwrap();

        let tasks = engine.tasks().with_user("user-a");
        for branch in [&b1, &b1, &b2, &b2] {
            tasks
                .create(Task::new(branch.id, "user-a", "t"))
                .await
                .unwrap();
        }

        let filter = TaskFilter {
            git_branch_id: Some(b1.id),
            ..TaskFilter::default()
        };
        let listed = tasks.list(&filter).await.unwrap();
        assert_eq!(listed.len(), 2);
        assert!(listed.iter().all(|t| t.git_branch_id == b1.id));

        let all = tasks.list(&TaskFilter::default()).await.unwrap();
        assert_eq!(all.len(), 4);
    }

    #[tokio::test]
    async fn list_applies_status_priority_and_limit() {
        let engine = engine();
        let branch = seed_branch(&engine, "user-a").await;
        let tasks = engine.tasks().with_user("user-a");

        for n in 0..5 {
            let mut task = Task::new(branch.id, "user-a", format!("task-{n}"));
            task.status = if n % 2 == 0 {
                TaskStatus::Todo
            } else {
                TaskStatus::InProgress
            };
            task.priority = Priority::High;
            tasks.create(task).await.unwrap();
        }

        let filter = TaskFilter {
            status: Some(TaskStatus::Todo),
            priority: Some(Priority::High),
            limit: Some(2),
            ..TaskFilter::default()
        };
        let listed = tasks.list(&filter).await.unwrap();
        assert_eq!(listed.len(), 2);
        assert!(listed.iter().all(|t| t.status == TaskStatus::Todo));
    }

    #[tokio::test]
    async fn search_is_case_insensitive_over_title_and_description() {
        let engine = engine();
        let branch = seed_branch(&engine, "user-a").await;
        let tasks = engine.tasks().with_user("user-a");

        let mut with_desc = Task::new(branch.id, "user-a", "irrelevant");
        with_desc.description = "Fix the JWT refresh flow".into();
        tasks.create(with_desc).await.unwrap();
        tasks
            .create(Task::new(branch.id, "user-a", "JWT expiry bug"))
            .await
            .unwrap();
        tasks
            .create(Task::new(branch.id, "user-a", "unrelated"))
            .await
            .unwrap();

        let hits = tasks.search("jwt", 10).await.unwrap();
        assert_eq!(hits.len(), 2);

        let capped = tasks.search("jwt", 1).await.unwrap();
        assert_eq!(capped.len(), 1);
    }

    #[tokio::test]
    async fn search_does_not_cross_users() {
        let engine = engine();
        let branch = seed_branch(&engine, "user-a").await;
        engine
            .tasks()
            .with_user("user-a")
            .create(Task::new(branch.id, "user-a", "secret rotation"))
            .await
            .unwrap();

        let hits = engine
            .tasks()
            .with_user("user-b")
            .search("secret", 10)
            .await
            .unwrap();
        assert!(hits.is_empty());
    }

    // -- tokens ----------------------------------------------------------

    #[tokio::test]
    async fn token_hash_unique_across_users() {
        let engine = engine();
        let mk = |user: &str| ApiToken {
            id: Uuid::new_v4(),
            user_id: user.to_string(),
            name: "ci".into(),
            token_hash: "same-hash".into(),
            scopes: Default::default(),
            created_at: Utc::now(),
            expires_at: None,
            last_used_at: None,
            usage_count: 0,
            rate_limit: None,
            is_active: true,
        };

        let a = engine.tokens().with_user("user-a");
        a.create(mk("user-a")).await.unwrap();
        let b = engine.tokens().with_user("user-b");
        let err = b.create(mk("user-b")).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::Conflict);
    }

    #[tokio::test]
    async fn token_store_lookup_crosses_users() {
        let engine = engine();
        let repo = engine.tokens();
        let scoped = repo.with_user("user-a");
        let token = ApiToken {
            id: Uuid::new_v4(),
            user_id: "user-a".into(),
            name: "ci".into(),
            token_hash: "abc123".into(),
            scopes: Default::default(),
            created_at: Utc::now(),
            expires_at: None,
            last_used_at: None,
            usage_count: 0,
            rate_limit: None,
            is_active: true,
        };
        scoped.create(token.clone()).await.unwrap();

        // The pre-auth lookup has no user scope to work with.
        let found = repo.find_by_hash("abc123").await.unwrap().unwrap();
        assert_eq!(found.user_id, "user-a");

        repo.record_usage(found.id, Utc::now()).await.unwrap();
        let after = repo.find_by_hash("abc123").await.unwrap().unwrap();
        assert_eq!(after.usage_count, 1);
    }
}
