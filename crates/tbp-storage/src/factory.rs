// SPDX-License-Identifier: MIT OR Apache-2.0
//! Environment-keyed repository factory.
//!
//! The central switch: `ENVIRONMENT` picks the engine (test environments
//! get the deterministic in-memory backend), `DATABASE_TYPE` picks the
//! driver slot, and `REDIS_ENABLED`/`USE_CACHE` decide whether repositories
//! are wrapped in the caching decorator.  Outside bootstrap, every
//! repository handed out is already bound to a user.

use crate::table::InvalidationEmitter;
use crate::{
    BranchRepository, CachedTaskRepository, InMemoryTokenRepository, ProjectRepository,
    StorageEngine, SubtaskRepository, TaskRepository,
};
use std::sync::Arc;
use tbp_cache::MultiLevelCache;
use tracing::info;

// ---------------------------------------------------------------------------
// Environment config
// ---------------------------------------------------------------------------

/// Deployment environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Environment {
    /// Deterministic in-memory repositories, no cache wrapping.
    Test,
    /// Pre-production.
    Staging,
    /// Default.
    #[default]
    Production,
}

impl Environment {
    fn parse(raw: &str) -> Self {
        match raw.to_ascii_lowercase().as_str() {
            "test" => Self::Test,
            "staging" => Self::Staging,
            _ => Self::Production,
        }
    }
}

/// Storage driver slot.
///
/// The SQL drivers are external collaborators; every slot currently binds
/// the shared in-memory engine behind the same repository traits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DatabaseKind {
    /// Embedded SQLite.
    Sqlite,
    /// Self-hosted PostgreSQL.
    Postgresql,
    /// Managed Supabase Postgres.
    #[default]
    Supabase,
}

impl DatabaseKind {
    fn parse(raw: &str) -> Self {
        match raw.to_ascii_lowercase().as_str() {
            "sqlite" => Self::Sqlite,
            "postgresql" | "postgres" => Self::Postgresql,
            _ => Self::Supabase,
        }
    }
}

/// Parsed environment contract.
#[derive(Debug, Clone, PartialEq)]
pub struct EnvironmentConfig {
    /// Deployment environment.
    pub environment: Environment,
    /// Driver slot.
    pub database_type: DatabaseKind,
    /// Full connection string; preferred over per-field settings when set.
    pub database_url: Option<String>,
    /// Whether an external L2 cache is reachable.
    pub redis_enabled: bool,
    /// Whether repositories should be cache-wrapped at all.
    pub use_cache: bool,
}

impl EnvironmentConfig {
    /// Read `ENVIRONMENT`, `DATABASE_TYPE`, `DATABASE_URL`, `REDIS_ENABLED`,
    /// and `USE_CACHE` from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Parse from an arbitrary lookup (tests pass a map).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let truthy =
            |key: &str, default: bool| lookup(key).map_or(default, |v| v.to_lowercase() == "true");
        Self {
            environment: lookup("ENVIRONMENT")
                .map(|v| Environment::parse(&v))
                .unwrap_or_default(),
            database_type: lookup("DATABASE_TYPE")
                .map(|v| DatabaseKind::parse(&v))
                .unwrap_or_default(),
            database_url: lookup("DATABASE_URL"),
            redis_enabled: truthy("REDIS_ENABLED", true),
            use_cache: truthy("USE_CACHE", true),
        }
    }

    /// Configuration the test environment uses.
    pub fn for_tests() -> Self {
        Self {
            environment: Environment::Test,
            database_type: DatabaseKind::Sqlite,
            database_url: None,
            redis_enabled: false,
            use_cache: false,
        }
    }

    /// Cache wrapping applies outside the test environment only.
    pub fn cache_enabled(&self) -> bool {
        self.redis_enabled && self.use_cache && self.environment != Environment::Test
    }
}

// ---------------------------------------------------------------------------
// RepositoryFactory
// ---------------------------------------------------------------------------

/// Hands out user-bound repositories per the environment contract.
pub struct RepositoryFactory {
    config: EnvironmentConfig,
    engine: StorageEngine,
    cache: Arc<MultiLevelCache>,
}

impl RepositoryFactory {
    /// Build a factory.  Mutations emit invalidations through `emitter`.
    pub fn new(
        config: EnvironmentConfig,
        emitter: InvalidationEmitter,
        cache: Arc<MultiLevelCache>,
    ) -> Self {
        info!(
            environment = ?config.environment,
            database_type = ?config.database_type,
            cache_enabled = config.cache_enabled(),
            "repository factory initialised"
        );
        Self {
            engine: StorageEngine::new(emitter),
            config,
            cache,
        }
    }

    /// The parsed environment contract.
    pub fn config(&self) -> &EnvironmentConfig {
        &self.config
    }

    /// The underlying engine (bootstrap and diagnostics).
    pub fn engine(&self) -> &StorageEngine {
        &self.engine
    }

    /// Task repository bound to `user_id`, cache-wrapped when enabled.
    pub fn task_repository(&self, user_id: &str) -> Arc<dyn TaskRepository> {
        let scoped = self.engine.tasks().with_user(user_id);
        if self.config.cache_enabled() {
            Arc::new(CachedTaskRepository::new(
                scoped,
                self.cache.clone(),
                Some(user_id.to_string()),
            ))
        } else {
            scoped
        }
    }

    /// Subtask repository bound to `user_id`.
    pub fn subtask_repository(&self, user_id: &str) -> Arc<dyn SubtaskRepository> {
        self.engine.subtasks().with_user(user_id)
    }

    /// Project repository bound to `user_id`.
    pub fn project_repository(&self, user_id: &str) -> Arc<dyn ProjectRepository> {
        self.engine.projects().with_user(user_id)
    }

    /// Branch repository bound to `user_id`.
    pub fn branch_repository(&self, user_id: &str) -> Arc<dyn BranchRepository> {
        self.engine.branches().with_user(user_id)
    }

    /// Unscoped token repository for the pre-auth validation path.
    pub fn token_store(&self) -> Arc<InMemoryTokenRepository> {
        self.engine.tokens()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tbp_cache::CacheConfig;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_are_production_supabase_cached() {
        let config = EnvironmentConfig::from_lookup(|_| None);
        assert_eq!(config.environment, Environment::Production);
        assert_eq!(config.database_type, DatabaseKind::Supabase);
        assert!(config.redis_enabled);
        assert!(config.use_cache);
        assert!(config.cache_enabled());
    }

    #[test]
    fn test_environment_disables_cache_wrapping() {
        let config = EnvironmentConfig::from_lookup(lookup(&[
            ("ENVIRONMENT", "test"),
            ("REDIS_ENABLED", "true"),
            ("USE_CACHE", "true"),
        ]));
        assert_eq!(config.environment, Environment::Test);
        assert!(!config.cache_enabled());
    }

    #[test]
    fn database_kind_parsing() {
        for (raw, expected) in [
            ("sqlite", DatabaseKind::Sqlite),
            ("postgresql", DatabaseKind::Postgresql),
            ("postgres", DatabaseKind::Postgresql),
            ("supabase", DatabaseKind::Supabase),
            ("anything-else", DatabaseKind::Supabase),
        ] {
            let config = EnvironmentConfig::from_lookup(lookup(&[("DATABASE_TYPE", raw)]));
            assert_eq!(config.database_type, expected, "{raw}");
        }
    }

    #[test]
    fn database_url_is_carried() {
        let config = EnvironmentConfig::from_lookup(lookup(&[(
            "DATABASE_URL",
            "postgresql://plane:pw@db/plane",
        )]));
        assert_eq!(
            config.database_url.as_deref(),
            Some("postgresql://plane:pw@db/plane")
        );
    }

    #[tokio::test]
    async fn factory_hands_out_user_bound_repositories() {
        let factory = RepositoryFactory::new(
            EnvironmentConfig::for_tests(),
            InvalidationEmitter::disabled(),
            Arc::new(MultiLevelCache::new(CacheConfig::default())),
        );

        let a = factory.project_repository("user-a");
        let b = factory.project_repository("user-b");
        a.create(tbp_core::Project::new("user-a", "p")).await.unwrap();
        assert_eq!(a.list().await.unwrap().len(), 1);
        assert!(b.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn production_config_wraps_tasks_in_cache() {
        let config = EnvironmentConfig::from_lookup(|_| None);
        let factory = RepositoryFactory::new(
            config,
            InvalidationEmitter::disabled(),
            Arc::new(MultiLevelCache::new(CacheConfig::default())),
        );
        // Smoke: the wrapped repository behaves like the plain one.
        let project = factory
            .project_repository("user-a")
            .create(tbp_core::Project::new("user-a", "p"))
            .await
            .unwrap();
        let branch = factory
            .branch_repository("user-a")
            .create(tbp_core::GitBranch::new(project.id, "user-a", "main"))
            .await
            .unwrap();
        let tasks = factory.task_repository("user-a");
        let task = tasks
            .create(tbp_core::Task::new(branch.id, "user-a", "t"))
            .await
            .unwrap();
        assert_eq!(tasks.get(task.id).await.unwrap().id, task.id);
    }
}
