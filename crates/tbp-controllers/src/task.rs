// SPDX-License-Identifier: MIT OR Apache-2.0
//! The `manage_task` controller.

use crate::common::{
    agent_for_tracking, authenticated_user, enforcement_blocked_envelope, finish, optional_uuid,
    require_uuid, RequestContext,
};
use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use std::sync::Arc;
use tbp_app::{FacadeFactory, NewTask, ParameterEnforcementService, TaskPatch};
use tbp_core::agent::validate_assignees;
use tbp_core::{Priority, TaskStatus};
use tbp_error::{ErrorCode, TbpError};
use tbp_protocol::coerce;
use tbp_protocol::{error_envelope, success_envelope, ResponseOptimizer, ToolCall};
use tbp_storage::TaskFilter;

/// Closed action set for `manage_task`.
const ACTIONS: &[&str] = &[
    "create",
    "update",
    "complete",
    "get",
    "list",
    "search",
    "next",
    "add_dependency",
    "remove_dependency",
    "delete",
];

/// Controller behind the `manage_task` tool.
pub struct TaskController {
    facades: Arc<FacadeFactory>,
    enforcement: Arc<ParameterEnforcementService>,
    optimizer: Arc<ResponseOptimizer>,
}

impl TaskController {
    /// Assemble the controller.
    pub fn new(
        facades: Arc<FacadeFactory>,
        enforcement: Arc<ParameterEnforcementService>,
        optimizer: Arc<ResponseOptimizer>,
    ) -> Self {
        Self {
            facades,
            enforcement,
            optimizer,
        }
    }

    /// Handle one `manage_task` invocation end to end.
    pub async fn handle(&self, call: ToolCall, ctx: &RequestContext) -> Value {
        let operation = call.action.clone();
        if !ACTIONS.contains(&operation.as_str()) {
            let envelope = error_envelope(&operation, &TbpError::unknown_action(&operation, ACTIONS));
            return finish(&self.optimizer, &operation, envelope, ctx, None);
        }

        let user_id = match authenticated_user(&operation) {
            Ok(user_id) => user_id,
            Err(envelope) => return finish(&self.optimizer, &operation, envelope, ctx, None),
        };

        // Enforcement gate before any facade work.
        let enforcement = self.enforcement.enforce(
            &operation,
            &call.params,
            agent_for_tracking(&call, ctx).as_deref(),
            ctx.enforcement_override,
        );
        if !enforcement.allowed {
            let envelope = enforcement_blocked_envelope(&operation, &enforcement);
            return finish(&self.optimizer, &operation, envelope, ctx, Some(&enforcement));
        }

        let envelope = match self.dispatch(&operation, &call, &user_id).await {
            Ok(data) => success_envelope(&operation, data),
            Err(err) => error_envelope(&operation, &err),
        };
        finish(&self.optimizer, &operation, envelope, ctx, Some(&enforcement))
    }

    async fn dispatch(
        &self,
        action: &str,
        call: &ToolCall,
        user_id: &str,
    ) -> Result<Value, TbpError> {
        match action {
            "create" => self.create(call, user_id).await,
            "update" => self.update(call, user_id).await,
            "complete" => self.complete(call, user_id).await,
            "get" => self.get(call, user_id).await,
            "list" => self.list(call, user_id).await,
            "search" => self.search(call, user_id).await,
            "next" => self.next(call, user_id).await,
            "add_dependency" => self.change_dependency(call, user_id, true).await,
            "remove_dependency" => self.change_dependency(call, user_id, false).await,
            "delete" => self.delete(call, user_id).await,
            _ => unreachable!("action validated against the closed set"),
        }
    }

    async fn create(&self, call: &ToolCall, user_id: &str) -> Result<Value, TbpError> {
        let git_branch_id = require_uuid(call, "git_branch_id")?;
        let title = call.require_str("title")?.to_string();
        let priority = parse_priority(call.get("priority"))?;
        let assignees = coerce::coerce_string_list("assignees", call.get("assignees"))?;
        let labels = coerce::coerce_string_list("labels", call.get("labels"))?;
        let due_date = parse_datetime(call.get("due_date"))?;

        let facade = self.facades.task_facade(user_id, Some(git_branch_id));
        let task = facade
            .create_task(NewTask {
                git_branch_id,
                title,
                description: call.get_str("description").map(str::to_string),
                priority,
                assignees,
                labels,
                due_date,
                estimated_effort: call.get_str("estimated_effort").map(str::to_string),
            })
            .await?;
        Ok(json!({ "task": task }))
    }

    async fn update(&self, call: &ToolCall, user_id: &str) -> Result<Value, TbpError> {
        let task_id = require_uuid(call, "task_id")?;
        let status = parse_status(call.get("status"))?;
        let priority = parse_priority(call.get("priority"))?;
        let progress = coerce::coerce_progress(call.get("progress_percentage"))?;
        let assignees = match call.get("assignees") {
            Some(value) => Some(coerce::coerce_string_list("assignees", Some(value))?),
            None => None,
        };
        let labels = match call.get("labels") {
            Some(value) => Some(coerce::coerce_string_list("labels", Some(value))?),
            None => None,
        };

        let facade = self.facades.task_facade(user_id, None);
        let task = facade
            .update_task(
                task_id,
                TaskPatch {
                    title: call.get_str("title").map(str::to_string),
                    description: call.get_str("description").map(str::to_string),
                    status,
                    priority,
                    assignees,
                    labels,
                    progress_percentage: progress,
                    due_date: parse_datetime(call.get("due_date"))?,
                    estimated_effort: call.get_str("estimated_effort").map(str::to_string),
                },
            )
            .await?;
        Ok(json!({ "task": task }))
    }

    async fn complete(&self, call: &ToolCall, user_id: &str) -> Result<Value, TbpError> {
        let task_id = require_uuid(call, "task_id")?;
        let summary = call.require_str("completion_summary")?;
        let force = coerce::coerce_boolean_or("force", call.get("force"), false)?;

        let facade = self.facades.task_facade(user_id, None);
        let task = facade.complete_task(task_id, summary, force).await?;
        Ok(json!({ "task": task }))
    }

    async fn get(&self, call: &ToolCall, user_id: &str) -> Result<Value, TbpError> {
        let task_id = require_uuid(call, "task_id")?;
        let include_context =
            coerce::coerce_boolean_or("include_context", call.get("include_context"), false)?;
        let facade = self.facades.task_facade(user_id, None);
        let result = facade.get_task(task_id, include_context).await?;
        serde_json::to_value(result)
            .map_err(|e| TbpError::internal("task serialization failed").with_source(e))
    }

    async fn list(&self, call: &ToolCall, user_id: &str) -> Result<Value, TbpError> {
        let git_branch_id = optional_uuid(call, "git_branch_id")?;
        let status = parse_status(call.get("status"))?;
        let priority = parse_priority(call.get("priority"))?;
        let assignees =
            validate_assignees(coerce::coerce_string_list("assignees", call.get("assignees"))?)?;
        let labels = coerce::coerce_string_list("labels", call.get("labels"))?;
        let limit = coerce::coerce_limit(call.get("limit"))?;

        let facade = self.facades.task_facade(user_id, git_branch_id);
        let tasks = facade
            .list_tasks(&TaskFilter {
                git_branch_id,
                status,
                priority,
                assignees: assignees.into_iter().collect(),
                labels,
                limit,
            })
            .await?;
        let count = tasks.len();
        Ok(json!({ "tasks": tasks, "count": count }))
    }

    async fn search(&self, call: &ToolCall, user_id: &str) -> Result<Value, TbpError> {
        let query = call.require_str("query")?;
        // Search results are capped at 100 regardless of the requested limit.
        let limit = coerce::coerce_limit(call.get("limit"))?
            .unwrap_or(50)
            .min(100);

        let facade = self.facades.task_facade(user_id, None);
        let tasks = facade.search_tasks(query, limit).await?;
        let count = tasks.len();
        Ok(json!({ "tasks": tasks, "count": count, "query": query }))
    }

    async fn next(&self, call: &ToolCall, user_id: &str) -> Result<Value, TbpError> {
        let git_branch_id = optional_uuid(call, "git_branch_id")?;
        let facade = self.facades.task_facade(user_id, git_branch_id);
        let next = facade.next_task(git_branch_id).await?;
        Ok(json!({ "task": next }))
    }

    async fn change_dependency(
        &self,
        call: &ToolCall,
        user_id: &str,
        add: bool,
    ) -> Result<Value, TbpError> {
        let task_id = require_uuid(call, "task_id")?;
        let dependency_id = require_uuid(call, "dependency_id")?;
        let facade = self.facades.task_facade(user_id, None);
        let task = if add {
            facade.add_dependency(task_id, dependency_id).await?
        } else {
            facade.remove_dependency(task_id, dependency_id).await?
        };
        Ok(json!({ "task": task }))
    }

    async fn delete(&self, call: &ToolCall, user_id: &str) -> Result<Value, TbpError> {
        let task_id = require_uuid(call, "task_id")?;
        let facade = self.facades.task_facade(user_id, None);
        let task = facade.delete_task(task_id).await?;
        Ok(json!({ "deleted": true, "task_id": task.id }))
    }
}

fn parse_status(value: Option<&Value>) -> Result<Option<TaskStatus>, TbpError> {
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(raw)) => TaskStatus::parse(raw).map(Some).ok_or_else(|| {
            TbpError::new(ErrorCode::ValidationError, format!("unknown status: {raw}"))
                .with_field("status")
                .with_expected("todo, in_progress, blocked, review, done, cancelled")
        }),
        Some(_) => Err(TbpError::invalid_parameter("status", "a status string")),
    }
}

fn parse_priority(value: Option<&Value>) -> Result<Option<Priority>, TbpError> {
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(raw)) => Priority::parse(raw).map(Some).ok_or_else(|| {
            TbpError::new(ErrorCode::ValidationError, format!("unknown priority: {raw}"))
                .with_field("priority")
                .with_expected("low, medium, high, urgent, critical")
        }),
        Some(_) => Err(TbpError::invalid_parameter("priority", "a priority string")),
    }
}

fn parse_datetime(value: Option<&Value>) -> Result<Option<DateTime<Utc>>, TbpError> {
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(raw)) => raw
            .parse::<DateTime<Utc>>()
            .map(Some)
            .map_err(|_| TbpError::invalid_parameter("due_date", "an RFC 3339 timestamp")),
        Some(_) => Err(TbpError::invalid_parameter(
            "due_date",
            "an RFC 3339 timestamp string",
        )),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
