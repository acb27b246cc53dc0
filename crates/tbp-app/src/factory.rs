// SPDX-License-Identifier: MIT OR Apache-2.0
//! The facade factory.
//!
//! Builds facades from already-scoped repositories and caches them per
//! `(aggregate, project, branch, user)` so request handling does not
//! reassemble the object graph on every call.  Reads are lock-free
//! (`DashMap` shards); a miss takes a short shard write lock.

use crate::{
    BranchFacade, ContextFacade, ProjectFacade, SubtaskFacade, TaskFacade,
};
use dashmap::DashMap;
use std::sync::Arc;
use tbp_context::UnifiedContextService;
use tbp_events::EventBus;
use tbp_storage::{InvalidationEmitter, RepositoryFactory};
use uuid::Uuid;

/// Cache key: one facade per aggregate, scope pair, and user.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FacadeKey {
    /// Project scope, when the aggregate is project-bound.
    pub project_id: Option<Uuid>,
    /// Branch scope, when the aggregate is branch-bound.
    pub git_branch_id: Option<Uuid>,
    /// The caller.
    pub user_id: String,
}

impl FacadeKey {
    fn for_user(user_id: &str) -> Self {
        Self {
            project_id: None,
            git_branch_id: None,
            user_id: user_id.to_string(),
        }
    }

    fn for_branch(user_id: &str, git_branch_id: Option<Uuid>) -> Self {
        Self {
            project_id: None,
            git_branch_id,
            user_id: user_id.to_string(),
        }
    }
}

/// Builds and caches application facades.
pub struct FacadeFactory {
    repos: Arc<RepositoryFactory>,
    context_root: UnifiedContextService,
    bus: EventBus,
    task_facades: DashMap<FacadeKey, Arc<TaskFacade>>,
    subtask_facades: DashMap<FacadeKey, Arc<SubtaskFacade>>,
    context_facades: DashMap<FacadeKey, Arc<ContextFacade>>,
    project_facades: DashMap<FacadeKey, Arc<ProjectFacade>>,
    branch_facades: DashMap<FacadeKey, Arc<BranchFacade>>,
}

impl FacadeFactory {
    /// Assemble the factory over the repository factory and bus.
    pub fn new(repos: Arc<RepositoryFactory>, bus: EventBus) -> Self {
        let emitter = InvalidationEmitter::new(bus.clone());
        let context_root = UnifiedContextService::new(
            repos.engine().audit().clone(),
            repos.engine().branches(),
            emitter,
        );
        Self {
            repos,
            context_root,
            bus,
            task_facades: DashMap::new(),
            subtask_facades: DashMap::new(),
            context_facades: DashMap::new(),
            project_facades: DashMap::new(),
            branch_facades: DashMap::new(),
        }
    }

    /// The unscoped context service root (server wiring, diagnostics).
    pub fn context_root(&self) -> &UnifiedContextService {
        &self.context_root
    }

    /// Task facade for a user, optionally pinned to a branch.
    pub fn task_facade(&self, user_id: &str, git_branch_id: Option<Uuid>) -> Arc<TaskFacade> {
        let key = FacadeKey::for_branch(user_id, git_branch_id);
        if let Some(existing) = self.task_facades.get(&key) {
            return existing.clone();
        }
        let facade = Arc::new(TaskFacade::new(
            self.repos.task_repository(user_id),
            self.repos.subtask_repository(user_id),
            Arc::new(self.context_root.with_user(user_id)),
            self.bus.clone(),
            user_id.to_string(),
        ));
        self.task_facades.insert(key, facade.clone());
        facade
    }

    /// Subtask facade for a user, pinned to the parent task's branch.
    ///
    /// Callers resolve the branch from the parent task before asking here;
    /// passing a task id as the branch id is the classic wiring bug this
    /// signature exists to catch in review.
    pub fn subtask_facade(&self, user_id: &str, git_branch_id: Option<Uuid>) -> Arc<SubtaskFacade> {
        let key = FacadeKey::for_branch(user_id, git_branch_id);
        if let Some(existing) = self.subtask_facades.get(&key) {
            return existing.clone();
        }
        let facade = Arc::new(SubtaskFacade::new(
            self.repos.task_repository(user_id),
            self.repos.subtask_repository(user_id),
            self.bus.clone(),
            user_id.to_string(),
        ));
        self.subtask_facades.insert(key, facade.clone());
        facade
    }

    /// Context facade for a user.
    pub fn context_facade(&self, user_id: &str) -> Arc<ContextFacade> {
        let key = FacadeKey::for_user(user_id);
        if let Some(existing) = self.context_facades.get(&key) {
            return existing.clone();
        }
        let facade = Arc::new(ContextFacade::new(
            Arc::new(self.context_root.with_user(user_id)),
            self.bus.clone(),
            user_id.to_string(),
        ));
        self.context_facades.insert(key, facade.clone());
        facade
    }

    /// Project facade for a user.
    pub fn project_facade(&self, user_id: &str) -> Arc<ProjectFacade> {
        let key = FacadeKey::for_user(user_id);
        if let Some(existing) = self.project_facades.get(&key) {
            return existing.clone();
        }
        let facade = Arc::new(ProjectFacade::new(
            self.repos.project_repository(user_id),
            self.bus.clone(),
            user_id.to_string(),
        ));
        self.project_facades.insert(key, facade.clone());
        facade
    }

    /// Branch facade for a user, optionally pinned to a project.
    pub fn branch_facade(&self, user_id: &str, project_id: Option<Uuid>) -> Arc<BranchFacade> {
        let key = FacadeKey {
            project_id,
            git_branch_id: None,
            user_id: user_id.to_string(),
        };
        if let Some(existing) = self.branch_facades.get(&key) {
            return existing.clone();
        }
        let facade = Arc::new(BranchFacade::new(
            self.repos.branch_repository(user_id),
            self.bus.clone(),
            user_id.to_string(),
        ));
        self.branch_facades.insert(key, facade.clone());
        facade
    }

    /// Total cached facades across all aggregates.
    pub fn cached_facades(&self) -> usize {
        self.task_facades.len()
            + self.subtask_facades.len()
            + self.context_facades.len()
            + self.project_facades.len()
            + self.branch_facades.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tbp_cache::{CacheConfig, MultiLevelCache};
    use tbp_storage::EnvironmentConfig;

    fn factory() -> FacadeFactory {
        let repos = Arc::new(RepositoryFactory::new(
            EnvironmentConfig::for_tests(),
            InvalidationEmitter::disabled(),
            Arc::new(MultiLevelCache::new(CacheConfig::default())),
        ));
        let bus = EventBus::default();
        bus.start();
        FacadeFactory::new(repos, bus)
    }

    #[tokio::test]
    async fn same_key_returns_cached_instance() {
        let factory = factory();
        let branch = Uuid::new_v4();
        let a = factory.task_facade("user-a", Some(branch));
        let b = factory.task_facade("user-a", Some(branch));
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(factory.cached_facades(), 1);
    }

    #[tokio::test]
    async fn distinct_users_get_distinct_facades() {
        let factory = factory();
        let branch = Uuid::new_v4();
        let a = factory.task_facade("user-a", Some(branch));
        let b = factory.task_facade("user-b", Some(branch));
        assert!(!Arc::ptr_eq(&a, &b));
    }

    #[tokio::test]
    async fn distinct_branches_get_distinct_facades() {
        let factory = factory();
        let a = factory.task_facade("user-a", Some(Uuid::new_v4()));
        let b = factory.task_facade("user-a", Some(Uuid::new_v4()));
        assert!(!Arc::ptr_eq(&a, &b));
        assert_eq!(factory.cached_facades(), 2);
    }

    #[tokio::test]
    async fn aggregates_cache_independently() {
        let factory = factory();
        factory.task_facade("user-a", None);
        factory.subtask_facade("user-a", None);
        factory.context_facade("user-a");
        factory.project_facade("user-a");
        assert_eq!(factory.cached_facades(), 4);
    }
}
