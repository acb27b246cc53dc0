// SPDX-License-Identifier: MIT OR Apache-2.0
//! The JSON-RPC endpoint: `initialize`, `tools/list`, `tools/call`.

use crate::state::AppState;
use axum::{
    extract::{Request, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tbp_controllers::RequestContext;
use tbp_core::PLANE_VERSION;
use tbp_protocol::{
    JsonRpcRequest, JsonRpcResponse, ResponseProfile, INTERNAL_ERROR, METHOD_NOT_FOUND,
    PARSE_ERROR,
};
use tracing::debug;

/// MCP protocol revision this server speaks.
const PROTOCOL_VERSION: &str = "2024-11-05";

/// `POST /mcp/` — one JSON-RPC request per call.
pub async fn handle_mcp(State(state): State<Arc<AppState>>, req: Request) -> Response {
    let debug_header = req
        .headers()
        .get("x-debug")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.eq_ignore_ascii_case("true"));

    let body = match axum::body::to_bytes(req.into_body(), 2 * 1024 * 1024).await {
        Ok(body) => body,
        Err(_) => {
            return Json(JsonRpcResponse::error(
                Value::Null,
                INTERNAL_ERROR,
                "failed to read request body",
            ))
            .into_response();
        }
    };

    let request: JsonRpcRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(_) => {
            return Json(JsonRpcResponse::error(Value::Null, PARSE_ERROR, "Parse error"))
                .into_response();
        }
    };

    let id = request.id.clone();
    debug!(method = %request.method, "json-rpc request");

    // Notifications get no response body.
    if id.is_none() {
        return StatusCode::ACCEPTED.into_response();
    }
    let id = id.unwrap_or(Value::Null);

    let response = match request.method.as_str() {
        "initialize" => JsonRpcResponse::success(
            id,
            json!({
                "protocolVersion": PROTOCOL_VERSION,
                "capabilities": { "tools": {} },
                "serverInfo": { "name": "task-backplane", "version": PLANE_VERSION },
            }),
        ),
        "tools/list" => {
            JsonRpcResponse::success(id, state.backplane.registry.tool_descriptors())
        }
        "tools/call" => handle_tool_call(&state, id, request.params, debug_header).await,
        other => JsonRpcResponse::error(id, METHOD_NOT_FOUND, format!("unknown method: {other}")),
    };
    Json(response).into_response()
}

async fn handle_tool_call(
    state: &Arc<AppState>,
    id: Value,
    params: Option<Value>,
    debug_header: bool,
) -> JsonRpcResponse {
    let Some(params) = params else {
        return JsonRpcResponse::error(id, INTERNAL_ERROR, "tools/call requires params");
    };
    let Some(tool_name) = params.get("name").and_then(Value::as_str).map(str::to_string) else {
        return JsonRpcResponse::error(id, INTERNAL_ERROR, "tools/call requires params.name");
    };
    let arguments = params.get("arguments").cloned().unwrap_or(json!({}));

    let ctx = request_context(&arguments, debug_header);
    match state
        .backplane
        .registry
        .dispatch(&tool_name, arguments, &ctx)
        .await
    {
        Some(envelope) => JsonRpcResponse::success(id, envelope),
        None => JsonRpcResponse::error(id, METHOD_NOT_FOUND, format!("unknown tool: {tool_name}")),
    }
}

/// Extract per-request shaping signals from the tool arguments and headers.
fn request_context(arguments: &Value, debug_header: bool) -> RequestContext {
    let profile_override = arguments
        .get("profile")
        .and_then(Value::as_str)
        .and_then(ResponseProfile::parse);
    let debug_param = arguments.get("debug").map(is_truthy).unwrap_or(false);
    RequestContext {
        profile_override,
        agent: arguments
            .get("agent")
            .and_then(Value::as_str)
            .map(str::to_string),
        debug: debug_header || debug_param,
        enforcement_override: None,
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::String(s) => matches!(s.to_lowercase().as_str(), "true" | "1" | "yes" | "on"),
        _ => false,
    }
}
