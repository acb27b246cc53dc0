// SPDX-License-Identifier: MIT OR Apache-2.0
//! The `manage_connection` controller: health, capabilities, diagnostics.

use crate::common::{finish, RequestContext};
use chrono::Utc;
use dashmap::DashMap;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Instant;
use tbp_app::ParameterEnforcementService;
use tbp_cache::MultiLevelCache;
use tbp_core::PLANE_VERSION;
use tbp_error::TbpError;
use tbp_events::EventBus;
use tbp_flags::FeatureFlagService;
use tbp_protocol::coerce;
use tbp_protocol::{error_envelope, success_envelope, ResponseOptimizer, ToolCall};
use tbp_storage::AuditLog;

/// Closed action set for `manage_connection`.
const ACTIONS: &[&str] = &[
    "health_check",
    "server_capabilities",
    "connection_health",
    "status",
    "register_updates",
];

/// Session id used when `register_updates` omits one.
const DEFAULT_SESSION: &str = "default_session";

/// Controller behind the `manage_connection` tool.
pub struct ConnectionController {
    bus: EventBus,
    cache: Arc<MultiLevelCache>,
    enforcement: Arc<ParameterEnforcementService>,
    optimizer: Arc<ResponseOptimizer>,
    audit: AuditLog,
    flags: Option<Arc<FeatureFlagService>>,
    auth_enabled: bool,
    tool_names: Vec<&'static str>,
    started_at: Instant,
    sessions: DashMap<String, Value>,
}

impl ConnectionController {
    /// Assemble the controller over the shared infrastructure.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        bus: EventBus,
        cache: Arc<MultiLevelCache>,
        enforcement: Arc<ParameterEnforcementService>,
        optimizer: Arc<ResponseOptimizer>,
        audit: AuditLog,
        flags: Option<Arc<FeatureFlagService>>,
        auth_enabled: bool,
        tool_names: Vec<&'static str>,
    ) -> Self {
        Self {
            bus,
            cache,
            enforcement,
            optimizer,
            audit,
            flags,
            auth_enabled,
            tool_names,
            started_at: Instant::now(),
            sessions: DashMap::new(),
        }
    }

    /// The unauthenticated `/health` payload (shared with the HTTP route).
    pub fn health_payload(&self) -> Value {
        json!({
            "status": "healthy",
            "database": { "status": "connected" },
            "auth": { "provider": "keycloak", "enabled": self.auth_enabled },
            "mcp_tools": true,
        })
    }

    /// Handle one `manage_connection` invocation end to end.
    pub async fn handle(&self, call: ToolCall, ctx: &RequestContext) -> Value {
        let operation = call.action.clone();
        if !ACTIONS.contains(&operation.as_str()) {
            let envelope =
                error_envelope(&operation, &TbpError::unknown_action(&operation, ACTIONS));
            return finish(&self.optimizer, &operation, envelope, ctx, None);
        }

        let envelope = match self.dispatch(&operation, &call).await {
            Ok(data) => success_envelope(&operation, data),
            Err(err) => error_envelope(&operation, &err),
        };
        finish(&self.optimizer, &operation, envelope, ctx, None)
    }

    async fn dispatch(&self, action: &str, call: &ToolCall) -> Result<Value, TbpError> {
        match action {
            "health_check" => Ok(self.health_payload()),
            "server_capabilities" => Ok(json!({
                "version": PLANE_VERSION,
                "tools": self.tool_names,
                "profiles": ["minimal", "standard", "detailed", "debug"],
                "auth": { "enabled": self.auth_enabled },
            })),
            "connection_health" => {
                let bus_metrics = self.bus.metrics();
                let cache_metrics = self.cache.metrics();
                Ok(json!({
                    "event_bus": {
                        "running": self.bus.is_running(),
                        "events_published": bus_metrics.events_published,
                        "events_processed": bus_metrics.events_processed,
                        "dead_letters": bus_metrics.dead_letter_count,
                        "handlers": bus_metrics.handler_count,
                    },
                    "cache": {
                        "hit_rate": cache_metrics.hit_rate,
                        "size": cache_metrics.cache_size,
                        "evictions": cache_metrics.eviction_count,
                    },
                    "audit_records": self.audit.len(),
                }))
            }
            "status" => {
                let migration = self.flags.as_ref().map(|f| f.migration_status());
                Ok(json!({
                    "version": PLANE_VERSION,
                    "uptime_seconds": self.started_at.elapsed().as_secs(),
                    "active_sessions": self.sessions.len(),
                    "compliance": self.enforcement.compliance_report(),
                    "optimizer": self.optimizer.metrics(),
                    "migration": migration,
                }))
            }
            "register_updates" => {
                let session_id = call
                    .get_str("session_id")
                    .filter(|s| !s.is_empty())
                    .unwrap_or(DEFAULT_SESSION)
                    .to_string();
                // client_info often arrives as a JSON string.
                let client_info = match call.get("client_info") {
                    Some(value) => coerce::coerce_embedded_json("client_info", value)?,
                    None => json!({}),
                };
                self.sessions.insert(
                    session_id.clone(),
                    json!({
                        "client_info": client_info,
                        "registered_at": Utc::now(),
                    }),
                );
                Ok(json!({ "registered": true, "session_id": session_id }))
            }
            _ => unreachable!("action validated against the closed set"),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tbp_app::EnforcementLevel;
    use tbp_cache::CacheConfig;
    use tbp_events::BusConfig;

    fn controller() -> ConnectionController {
        let bus = EventBus::new(BusConfig::default());
        bus.start();
        ConnectionController::new(
            bus,
            Arc::new(MultiLevelCache::new(CacheConfig::default())),
            Arc::new(ParameterEnforcementService::new(EnforcementLevel::Warning)),
            Arc::new(ResponseOptimizer::new()),
            AuditLog::new(),
            None,
            true,
            vec!["manage_task", "manage_subtask", "manage_context", "manage_connection"],
        )
    }

    fn call(args: Value) -> ToolCall {
        ToolCall::from_arguments(args)
    }

    #[tokio::test]
    async fn health_check_reports_subsystems() {
        let controller = controller();
        let response = controller
            .handle(call(json!({"action": "health_check"})), &RequestContext::default())
            .await;
        assert_eq!(response["success"], json!(true));
        assert_eq!(response["data"]["status"], json!("healthy"));
        assert_eq!(response["data"]["database"]["status"], json!("connected"));
        assert_eq!(response["data"]["auth"]["enabled"], json!(true));
        assert_eq!(response["data"]["mcp_tools"], json!(true));
    }

    #[tokio::test]
    async fn capabilities_list_tools() {
        let controller = controller();
        let response = controller
            .handle(
                call(json!({"action": "server_capabilities"})),
                &RequestContext::default(),
            )
            .await;
        let tools = response["data"]["tools"].as_array().unwrap();
        assert!(tools.iter().any(|t| t == "manage_task"));
        assert_eq!(response["data"]["version"], json!(PLANE_VERSION));
    }

    #[tokio::test]
    async fn unknown_action_lists_valid_set() {
        let controller = controller();
        let response = controller
            .handle(call(json!({"action": "reboot"})), &RequestContext::default())
            .await;
        assert_eq!(response["success"], json!(false));
        assert_eq!(response["error"]["code"], json!("UNKNOWN_ACTION"));
        let valid = response["error"]["context"]["valid_actions"].as_array().unwrap();
        assert_eq!(valid.len(), ACTIONS.len());
    }

    #[tokio::test]
    async fn register_updates_defaults_session_id() {
        let controller = controller();
        let response = controller
            .handle(
                call(json!({"action": "register_updates"})),
                &RequestContext::default(),
            )
            .await;
        assert_eq!(response["data"]["session_id"], json!(DEFAULT_SESSION));
        assert_eq!(controller.sessions.len(), 1);
    }

    #[tokio::test]
    async fn register_updates_parses_stringified_client_info() {
        let controller = controller();
        let response = controller
            .handle(
                call(json!({
                    "action": "register_updates",
                    "session_id": "s-1",
                    "client_info": r#"{"name": "cli", "version": "2.0"}"#,
                })),
                &RequestContext::default(),
            )
            .await;
        assert_eq!(response["success"], json!(true));
        let stored = controller.sessions.get("s-1").unwrap();
        assert_eq!(stored["client_info"]["name"], json!("cli"));
    }

    #[tokio::test]
    async fn register_updates_rejects_broken_client_info() {
        let controller = controller();
        let response = controller
            .handle(
                call(json!({
                    "action": "register_updates",
                    "client_info": "{broken",
                })),
                &RequestContext::default(),
            )
            .await;
        assert_eq!(response["success"], json!(false));
        assert_eq!(response["error"]["code"], json!("INVALID_PARAMETER_FORMAT"));
    }

    #[tokio::test]
    async fn status_reports_uptime_and_compliance() {
        let controller = controller();
        let response = controller
            .handle(call(json!({"action": "status"})), &RequestContext::default())
            .await;
        assert!(response["data"]["version"].is_string());
        assert!(response["data"]["uptime_seconds"].is_number());
    }
}
