// SPDX-License-Identifier: MIT OR Apache-2.0
//! Caching decorator over the task repository.
//!
//! Reads go through the multi-level cache under the same key scheme the
//! invalidation fan-out uses; writes delegate first and then invalidate
//! inline, so correctness never depends on the bus being wired.
//! Bootstrap (unscoped) instances pass straight through — nothing is cached
//! without a user to key on.

use crate::{TaskFilter, TaskRepository};
use std::sync::Arc;
use std::time::Duration;
use tbp_cache::{entity_key, list_prefix, MultiLevelCache};
use tbp_core::Task;
use tbp_error::TbpError;
use uuid::Uuid;

/// Cache-through [`TaskRepository`] decorator.
pub struct CachedTaskRepository {
    inner: Arc<dyn TaskRepository>,
    cache: Arc<MultiLevelCache>,
    user_id: Option<String>,
    ttl: Duration,
}

impl CachedTaskRepository {
    /// Default entry TTL.
    pub const DEFAULT_TTL: Duration = Duration::from_secs(300);

    /// Wrap `inner`, caching under `user_id`'s keys.
    pub fn new(
        inner: Arc<dyn TaskRepository>,
        cache: Arc<MultiLevelCache>,
        user_id: Option<String>,
    ) -> Self {
        Self {
            inner,
            cache,
            user_id,
            ttl: Self::DEFAULT_TTL,
        }
    }

    fn task_key(&self, id: Uuid) -> Option<String> {
        self.user_id
            .as_deref()
            .map(|user| entity_key("task", user, &id.to_string()))
    }

    fn list_key(&self, filter: &TaskFilter) -> Option<String> {
        let user = self.user_id.as_deref()?;
        // Deterministic fingerprint of the filter fields.
        let assignees: Vec<&str> = filter.assignees.iter().map(|a| a.as_str()).collect();
        Some(format!(
            "{}list:{}:{}:{}:{}:{}:{}",
            list_prefix("task", user),
            filter
                .git_branch_id
                .map(|b| b.to_string())
                .unwrap_or_default(),
            filter.status.map(|s| s.as_str()).unwrap_or_default(),
            filter.priority.map(|p| p.as_str()).unwrap_or_default(),
            assignees.join(","),
            filter.labels.join(","),
            filter.limit.map(|l| l.to_string()).unwrap_or_default(),
        ))
    }

    fn search_key(&self, query: &str, limit: usize) -> Option<String> {
        let user = self.user_id.as_deref()?;
        Some(format!(
            "{}search:{limit}:{}",
            list_prefix("task", user),
            query.to_lowercase()
        ))
    }

    async fn cached_tasks(&self, key: &str) -> Option<Vec<Task>> {
        let value = self.cache.get_json(key).await?;
        serde_json::from_value(value).ok()
    }

    async fn store_tasks(&self, key: &str, tasks: &[Task]) {
        if let Ok(value) = serde_json::to_value(tasks) {
            self.cache.put_json(key, &value, Some(self.ttl)).await;
        }
    }

    async fn invalidate_for(&self, id: Uuid) {
        if let Some(key) = self.task_key(id) {
            self.cache.invalidate(&key).await;
        }
        if let Some(user) = self.user_id.as_deref() {
            self.cache.invalidate_prefix(&list_prefix("task", user)).await;
        }
    }
}

#[async_trait::async_trait]
impl TaskRepository for CachedTaskRepository {
    fn with_user(&self, user_id: &str) -> Arc<dyn TaskRepository> {
        Arc::new(Self {
            inner: self.inner.with_user(user_id),
            cache: self.cache.clone(),
            user_id: Some(user_id.to_string()),
            ttl: self.ttl,
        })
    }

    async fn create(&self, task: Task) -> Result<Task, TbpError> {
        let created = self.inner.create(task).await?;
        self.invalidate_for(created.id).await;
        Ok(created)
    }

    async fn get(&self, id: Uuid) -> Result<Task, TbpError> {
        let key = self.task_key(id);
        if let Some(key) = &key {
            if let Some(value) = self.cache.get_json(key).await {
                if let Ok(task) = serde_json::from_value::<Task>(value) {
                    return Ok(task);
                }
            }
        }
        let task = self.inner.get(id).await?;
        if let Some(key) = &key {
            if let Ok(value) = serde_json::to_value(&task) {
                self.cache.put_json(key, &value, Some(self.ttl)).await;
            }
        }
        Ok(task)
    }

    async fn find(&self, id: Uuid) -> Result<Option<Task>, TbpError> {
        match self.get(id).await {
            Ok(task) => Ok(Some(task)),
            Err(err) if err.code == tbp_error::ErrorCode::NotFound => Ok(None),
            Err(err) => Err(err),
        }
    }

    async fn list(&self, filter: &TaskFilter) -> Result<Vec<Task>, TbpError> {
        let key = self.list_key(filter);
        if let Some(key) = &key {
            if let Some(tasks) = self.cached_tasks(key).await {
                return Ok(tasks);
            }
        }
        let tasks = self.inner.list(filter).await?;
        if let Some(key) = &key {
            self.store_tasks(key, &tasks).await;
        }
        Ok(tasks)
    }

    async fn search(&self, query: &str, limit: usize) -> Result<Vec<Task>, TbpError> {
        let key = self.search_key(query, limit);
        if let Some(key) = &key {
            if let Some(tasks) = self.cached_tasks(key).await {
                return Ok(tasks);
            }
        }
        let tasks = self.inner.search(query, limit).await?;
        if let Some(key) = &key {
            self.store_tasks(key, &tasks).await;
        }
        Ok(tasks)
    }

    async fn save(&self, task: Task) -> Result<Task, TbpError> {
        let saved = self.inner.save(task).await?;
        self.invalidate_for(saved.id).await;
        Ok(saved)
    }

    async fn delete(&self, id: Uuid) -> Result<Task, TbpError> {
        let deleted = self.inner.delete(id).await?;
        self.invalidate_for(id).await;
        Ok(deleted)
    }
}
