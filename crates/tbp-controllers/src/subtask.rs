// SPDX-License-Identifier: MIT OR Apache-2.0
//! The `manage_subtask` controller.
//!
//! Every action takes the parent `task_id`.  Facade resolution goes
//! `task_id → parent task → git_branch_id`; handing `task_id` to the
//! factory as a branch id is the critical wiring bug this controller's
//! tests pin down.

use crate::common::{
    agent_for_tracking, authenticated_user, enforcement_blocked_envelope, finish, require_uuid,
    RequestContext,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tbp_app::{FacadeFactory, ParameterEnforcementService, SubtaskFacade, SubtaskPatch};
use tbp_error::TbpError;
use tbp_protocol::coerce;
use tbp_protocol::{error_envelope, success_envelope, ResponseOptimizer, ToolCall};
use uuid::Uuid;

/// Closed action set for `manage_subtask`.
const ACTIONS: &[&str] = &["create", "update", "complete", "list", "get", "delete"];

/// Controller behind the `manage_subtask` tool.
pub struct SubtaskController {
    facades: Arc<FacadeFactory>,
    enforcement: Arc<ParameterEnforcementService>,
    optimizer: Arc<ResponseOptimizer>,
}

impl SubtaskController {
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

    /// Handle one `manage_subtask` invocation end to end.
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

        // Subtask actions map onto their own enforcement entries.
        let enforcement_action = match operation.as_str() {
            "update" => "subtask_update",
            "complete" => "subtask_complete",
            other => other,
        };
        let enforcement = self.enforcement.enforce(
            enforcement_action,
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

    /// Resolve the facade for a parent task: look the task up, extract its
    /// branch, and bind the facade to that branch — never to the task id.
    async fn facade_for_task(
        &self,
        user_id: &str,
        task_id: Uuid,
    ) -> Result<Arc<SubtaskFacade>, TbpError> {
        let parent = self
            .facades
            .task_facade(user_id, None)
            .get_task(task_id, false)
            .await?;
        let git_branch_id = parent.task.git_branch_id;
        debug_assert_ne!(git_branch_id, task_id, "task id leaked into branch scope");
        Ok(self.facades.subtask_facade(user_id, Some(git_branch_id)))
    }

    async fn dispatch(
        &self,
        action: &str,
        call: &ToolCall,
        user_id: &str,
    ) -> Result<Value, TbpError> {
        let task_id = require_uuid(call, "task_id")?;
        let facade = self.facade_for_task(user_id, task_id).await?;

        match action {
            "create" => {
                let title = call.require_str("title")?;
                let assignees = match call.get("assignees") {
                    Some(value) => Some(coerce::coerce_string_list("assignees", Some(value))?),
                    None => None,
                };
                let subtask = facade
                    .create_subtask(
                        task_id,
                        title,
                        call.get_str("description").map(str::to_string),
                        assignees,
                    )
                    .await?;
                Ok(json!({ "subtask": subtask }))
            }
            "update" => {
                let subtask_id = require_uuid(call, "subtask_id")?;
                let progress = coerce::coerce_progress(call.get("progress_percentage"))?;
                let assignees = match call.get("assignees") {
                    Some(value) => Some(coerce::coerce_string_list("assignees", Some(value))?),
                    None => None,
                };
                let insights = match call.get("insights_found") {
                    Some(value) => Some(coerce::coerce_string_list("insights_found", Some(value))?),
                    None => None,
                };
                let subtask = facade
                    .update_subtask(
                        task_id,
                        subtask_id,
                        SubtaskPatch {
                            title: call.get_str("title").map(str::to_string),
                            description: call.get_str("description").map(str::to_string),
                            progress_percentage: progress,
                            assignees,
                            insights_found: insights,
                            completion_summary: call
                                .get_str("completion_summary")
                                .map(str::to_string),
                        },
                    )
                    .await?;
                Ok(json!({ "subtask": subtask }))
            }
            "complete" => {
                let subtask_id = require_uuid(call, "subtask_id")?;
                let summary = call.require_str("completion_summary")?;
                let insights = match call.get("insights_found") {
                    Some(value) => Some(coerce::coerce_string_list("insights_found", Some(value))?),
                    None => None,
                };
                let subtask = facade
                    .complete_subtask(task_id, subtask_id, summary, insights)
                    .await?;
                Ok(json!({ "subtask": subtask }))
            }
            "list" => {
                let subtasks = facade.list_subtasks(task_id).await?;
                let count = subtasks.len();
                Ok(json!({ "subtasks": subtasks, "count": count, "task_id": task_id }))
            }
            "get" => {
                let subtask_id = require_uuid(call, "subtask_id")?;
                let subtask = facade.get_subtask(task_id, subtask_id).await?;
                Ok(json!({ "subtask": subtask }))
            }
            "delete" => {
                let subtask_id = require_uuid(call, "subtask_id")?;
                facade.delete_subtask(task_id, subtask_id).await?;
                Ok(json!({ "deleted": true, "subtask_id": subtask_id }))
            }
            _ => unreachable!("action validated against the closed set"),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
