// SPDX-License-Identifier: MIT OR Apache-2.0
//! The `manage_context` controller.

use crate::common::{authenticated_user, finish, RequestContext};
use serde_json::{json, Value};
use std::sync::Arc;
use tbp_app::FacadeFactory;
use tbp_context::ContextLevel;
use tbp_error::{ErrorCode, TbpError};
use tbp_protocol::coerce;
use tbp_protocol::{error_envelope, success_envelope, ResponseOptimizer, ToolCall};

/// Closed action set for `manage_context`.
const ACTIONS: &[&str] = &[
    "create",
    "get",
    "update",
    "delete",
    "add_insight",
    "delegate",
    "list",
];

/// Controller behind the `manage_context` tool.
pub struct ContextController {
    facades: Arc<FacadeFactory>,
    optimizer: Arc<ResponseOptimizer>,
}

impl ContextController {
    /// Assemble the controller.
    pub fn new(facades: Arc<FacadeFactory>, optimizer: Arc<ResponseOptimizer>) -> Self {
        Self { facades, optimizer }
    }

    /// Handle one `manage_context` invocation end to end.
    pub async fn handle(&self, call: ToolCall, ctx: &RequestContext) -> Value {
        let operation = call.action.clone();
        if !ACTIONS.contains(&operation.as_str()) {
            let envelope =
                error_envelope(&operation, &TbpError::unknown_action(&operation, ACTIONS));
            return finish(&self.optimizer, &operation, envelope, ctx, None);
        }

        let user_id = match authenticated_user(&operation) {
            Ok(user_id) => user_id,
            Err(envelope) => return finish(&self.optimizer, &operation, envelope, ctx, None),
        };

        let envelope = match self.dispatch(&operation, &call, &user_id).await {
            Ok(data) => success_envelope(&operation, data),
            Err(err) => error_envelope(&operation, &err),
        };
        finish(&self.optimizer, &operation, envelope, ctx, None)
    }

    async fn dispatch(
        &self,
        action: &str,
        call: &ToolCall,
        user_id: &str,
    ) -> Result<Value, TbpError> {
        let facade = self.facades.context_facade(user_id);
        let level = parse_level(call.get("level"))?;
        // The global level derives its id from the caller; every other
        // level requires an explicit context_id.
        let context_id = match call.get_str("context_id") {
            Some(raw) => raw.to_string(),
            None if level == ContextLevel::Global => String::new(),
            None => return Err(TbpError::missing_field("context_id")),
        };

        match action {
            "create" => {
                let data = match call.get("data") {
                    Some(value) => coerce::coerce_embedded_json("data", value)?,
                    None => json!({}),
                };
                let view = facade.create_context(level, &context_id, data).await?;
                Ok(json!({ "context": view }))
            }
            "get" => {
                let include_inherited = coerce::coerce_boolean_or(
                    "include_inherited",
                    call.get("include_inherited"),
                    false,
                )?;
                let view = facade
                    .get_context(level, &context_id, include_inherited)
                    .await?;
                Ok(json!({ "context": view }))
            }
            "update" => {
                let data = match call.get("data") {
                    Some(value) => coerce::coerce_embedded_json("data", value)?,
                    None => return Err(TbpError::missing_field("data")),
                };
                let propagate = coerce::coerce_boolean_or(
                    "propagate_changes",
                    call.get("propagate_changes"),
                    false,
                )?;
                let view = facade
                    .update_context(level, &context_id, data, propagate)
                    .await?;
                Ok(json!({ "context": view }))
            }
            "delete" => {
                facade.delete_context(level, &context_id).await?;
                Ok(json!({ "deleted": true, "level": level, "context_id": context_id }))
            }
            "add_insight" => {
                let content = call.require_str("content")?;
                let view = facade
                    .add_insight(
                        &context_id,
                        content,
                        call.get_str("category"),
                        call.get_str("importance"),
                    )
                    .await?;
                Ok(json!({ "context": view }))
            }
            "delegate" => {
                let raw_target = call.require_str("delegate_to")?;
                let delegate_to = ContextLevel::parse(raw_target).ok_or_else(|| {
                    TbpError::new(
                        ErrorCode::ValidationError,
                        format!("unknown delegation level: {raw_target}"),
                    )
                    .with_field("delegate_to")
                    .with_expected("global, project, branch")
                })?;
                let fields =
                    coerce::coerce_string_list("delegate_fields", call.get("delegate_fields"))?;
                let outcome = facade
                    .delegate(level, &context_id, delegate_to, &fields)
                    .await?;
                Ok(json!({
                    "source": outcome.source,
                    "target": outcome.target,
                }))
            }
            "list" => {
                let contexts = facade.list_contexts(level).await?;
                let count = contexts.len();
                Ok(json!({ "contexts": contexts, "count": count, "level": level }))
            }
            _ => unreachable!("action validated against the closed set"),
        }
    }
}

fn parse_level(value: Option<&Value>) -> Result<ContextLevel, TbpError> {
    match value {
        None | Some(Value::Null) => Err(TbpError::missing_field("level")),
        Some(Value::String(raw)) => ContextLevel::parse(raw).ok_or_else(|| {
            TbpError::new(ErrorCode::ValidationError, format!("unknown level: {raw}"))
                .with_field("level")
                .with_expected("global, project, branch, task")
        }),
        Some(_) => Err(TbpError::invalid_parameter("level", "a level string")),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
