// SPDX-License-Identifier: MIT OR Apache-2.0
//! Plane assembly and server configuration.

use std::sync::Arc;
use std::time::Duration;
use tbp_app::{
    EnforcementLevel, FacadeFactory, ParameterEnforcementService,
};
use tbp_auth::TokenValidator;
use tbp_cache::{
    register_invalidation_subscriber, AlertThresholds, CacheConfig, CacheMonitor,
    MultiLevelCache,
};
use tbp_controllers::{
    ConnectionController, ContextController, SubtaskController, TaskController, ToolRegistry,
};
use tbp_events::{BusConfig, EventBus};
use tbp_flags::FeatureFlagService;
use tbp_protocol::ResponseOptimizer;
use tbp_storage::{EnvironmentConfig, InvalidationEmitter, RepositoryFactory};

/// HTTP-facing configuration read from the environment.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind host (`MCP_HOST`, default `127.0.0.1`).
    pub host: String,
    /// Bind port (`MCP_PORT`, default `8000`).
    pub port: u16,
    /// `AUTH_ENABLED` (default `true`).  When disabled, `/health` stays up
    /// and every tool endpoint rejects.
    pub auth_enabled: bool,
}

impl ServerConfig {
    /// Read `MCP_HOST`, `MCP_PORT`, and `AUTH_ENABLED`.
    pub fn from_env() -> Self {
        Self {
            host: std::env::var("MCP_HOST").unwrap_or_else(|_| "127.0.0.1".into()),
            port: std::env::var("MCP_PORT")
                .ok()
                .and_then(|raw| raw.parse().ok())
                .unwrap_or(8000),
            auth_enabled: std::env::var("AUTH_ENABLED")
                .map(|raw| raw.to_lowercase() != "false")
                .unwrap_or(true),
        }
    }

    /// The bind address string.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// The fully wired control plane, transport excluded.
pub struct Backplane {
    /// The shared event bus (started).
    pub bus: EventBus,
    /// The shared multi-level cache.
    pub cache: Arc<MultiLevelCache>,
    /// Env-keyed repository factory.
    pub repos: Arc<RepositoryFactory>,
    /// Cached facade factory.
    pub facades: Arc<FacadeFactory>,
    /// The enforcement gate.
    pub enforcement: Arc<ParameterEnforcementService>,
    /// The response optimizer.
    pub optimizer: Arc<ResponseOptimizer>,
    /// The tool registry.
    pub registry: ToolRegistry,
    /// Keeps the cache monitor sampling for the process lifetime.
    monitor: CacheMonitor,
}

impl Backplane {
    /// Assemble and start the plane.  `flags` is optional so embedded and
    /// test wiring can skip the persisted store.
    pub fn new(
        env: EnvironmentConfig,
        enforcement_level: EnforcementLevel,
        auth_enabled: bool,
        flags: Option<Arc<FeatureFlagService>>,
    ) -> Self {
        let bus = EventBus::new(BusConfig::default());
        bus.start();

        let cache = Arc::new(MultiLevelCache::new(CacheConfig::default()));
        register_invalidation_subscriber(&bus, cache.clone());
        let monitor = CacheMonitor::start(
            cache.clone(),
            Duration::from_secs(1),
            AlertThresholds::default(),
        );

        let repos = Arc::new(RepositoryFactory::new(
            env,
            InvalidationEmitter::new(bus.clone()),
            cache.clone(),
        ));
        let facades = Arc::new(FacadeFactory::new(repos.clone(), bus.clone()));
        let enforcement = Arc::new(ParameterEnforcementService::new(enforcement_level));
        let optimizer = Arc::new(ResponseOptimizer::new());

        let registry = ToolRegistry::new(
            TaskController::new(facades.clone(), enforcement.clone(), optimizer.clone()),
            SubtaskController::new(facades.clone(), enforcement.clone(), optimizer.clone()),
            ContextController::new(facades.clone(), optimizer.clone()),
            ConnectionController::new(
                bus.clone(),
                cache.clone(),
                enforcement.clone(),
                optimizer.clone(),
                repos.engine().audit().clone(),
                flags,
                auth_enabled,
                tbp_controllers::TOOL_NAMES.to_vec(),
            ),
        );

        Self {
            bus,
            cache,
            repos,
            facades,
            enforcement,
            optimizer,
            registry,
            monitor,
        }
    }

    /// Stop background work (bus workers, cache monitor).
    pub async fn shutdown(&self) {
        self.monitor.stop();
        self.bus.stop().await;
    }
}

/// Shared axum state.
pub struct AppState {
    /// The wired plane.
    pub backplane: Arc<Backplane>,
    /// Bearer-token validator.
    pub validator: Arc<dyn TokenValidator>,
    /// Whether tool endpoints accept any credentials at all.
    pub auth_enabled: bool,
}
