// SPDX-License-Identifier: MIT OR Apache-2.0
//! The tool registry: one dispatch point for every MCP tool.

use crate::{
    ConnectionController, ContextController, RequestContext, SubtaskController, TaskController,
};
use serde_json::{json, Value};
use tbp_protocol::ToolCall;
use tracing::debug;

/// Names of the tools this plane serves.
pub const TOOL_NAMES: &[&str] = &[
    "manage_task",
    "manage_subtask",
    "manage_context",
    "manage_connection",
];

/// Routes `tools/call` requests to their controller.
pub struct ToolRegistry {
    task: TaskController,
    subtask: SubtaskController,
    context: ContextController,
    connection: ConnectionController,
}

impl ToolRegistry {
    /// Assemble the registry.
    pub fn new(
        task: TaskController,
        subtask: SubtaskController,
        context: ContextController,
        connection: ConnectionController,
    ) -> Self {
        Self {
            task,
            subtask,
            context,
            connection,
        }
    }

    /// The connection controller (shared with the `/health` route).
    pub fn connection(&self) -> &ConnectionController {
        &self.connection
    }

    /// Tool descriptors for `tools/list`.
    pub fn tool_descriptors(&self) -> Value {
        let tools: Vec<Value> = TOOL_NAMES
            .iter()
            .map(|name| {
                json!({
                    "name": name,
                    "description": tool_description(name),
                    "inputSchema": {
                        "type": "object",
                        "properties": {
                            "action": { "type": "string" }
                        },
                        "required": ["action"],
                        "additionalProperties": true
                    }
                })
            })
            .collect();
        json!({ "tools": tools })
    }

    /// Dispatch one tool call.  Returns `None` for unknown tool names (the
    /// transport maps that to `-32601`).
    pub async fn dispatch(
        &self,
        tool_name: &str,
        arguments: Value,
        ctx: &RequestContext,
    ) -> Option<Value> {
        let call = ToolCall::from_arguments(arguments);
        debug!(tool = tool_name, action = %call.action, "dispatching tool call");
        let response = match tool_name {
            "manage_task" => self.task.handle(call, ctx).await,
            "manage_subtask" => self.subtask.handle(call, ctx).await,
            "manage_context" => self.context.handle(call, ctx).await,
            "manage_connection" => self.connection.handle(call, ctx).await,
            _ => return None,
        };
        Some(response)
    }
}

fn tool_description(name: &str) -> &'static str {
    match name {
        "manage_task" => "Create, query, and complete orchestrated tasks",
        "manage_subtask" => "Manage subtasks under a parent task",
        "manage_context" => "Read and write the hierarchical context store",
        "manage_connection" => "Health, capabilities, and connection diagnostics",
        _ => "",
    }
}
