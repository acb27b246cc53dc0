// SPDX-License-Identifier: MIT OR Apache-2.0
//! stdio ↔ HTTP bridge for MCP clients.
//!
//! Reads newline-delimited JSON-RPC from stdin, forwards each request to the
//! plane's HTTP endpoint, and writes the response to stdout.  Requests are
//! processed strictly in order — MCP peers require in-order responses — and
//! request ids are preserved end to end.  EOF terminates cleanly.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use serde_json::{json, Value};
use tbp_protocol::{INTERNAL_ERROR, PARSE_ERROR};
use tracing::{debug, error, info};

/// Client identity injected into `initialize` requests that omit one.
pub const BRIDGE_CLIENT_NAME: &str = "mcp-bridge";

/// Bridge configuration.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Base URL of the plane (e.g. `http://localhost:8000`).
    pub server_url: String,
    /// Bearer token forwarded on every request.
    pub token: Option<String>,
}

impl BridgeConfig {
    /// The MCP endpoint (trailing slash matters — the server redirects
    /// `/mcp` to `/mcp/`).
    pub fn mcp_endpoint(&self) -> String {
        format!("{}/mcp/", self.server_url.trim_end_matches('/'))
    }

    /// The health probe URL.
    pub fn health_endpoint(&self) -> String {
        format!("{}/health", self.server_url.trim_end_matches('/'))
    }
}

/// Build the HTTP client with the redirect and timeout contract.
pub fn build_client() -> reqwest::Result<reqwest::Client> {
    reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::limited(10))
        .timeout(std::time::Duration::from_secs(30))
        .build()
}

/// Inject the bridge's `clientInfo` into an `initialize` request missing
/// one.  Every other request passes through untouched.
pub fn prepare_request(mut request: Value) -> Value {
    let is_initialize = request.get("method").and_then(Value::as_str) == Some("initialize");
    if !is_initialize {
        return request;
    }
    let Some(params) = request.get_mut("params").and_then(Value::as_object_mut) else {
        return request;
    };
    if !params.contains_key("clientInfo") {
        params.insert(
            "clientInfo".into(),
            json!({
                "name": BRIDGE_CLIENT_NAME,
                "version": env!("CARGO_PKG_VERSION"),
            }),
        );
        debug!("injected missing clientInfo into initialize request");
    }
    request
}

/// JSON-RPC error response for the given request id.
pub fn error_response(id: Value, code: i64, message: impl Into<String>) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "error": { "code": code, "message": message.into() },
    })
}

/// Process one stdin line into the response line to write, or `None` for
/// blank lines.
pub async fn handle_line(
    client: &reqwest::Client,
    config: &BridgeConfig,
    line: &str,
) -> Option<String> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }

    let request: Value = match serde_json::from_str(line) {
        Ok(request) => request,
        Err(err) => {
            error!(error = %err, "invalid JSON on stdin");
            return Some(error_response(Value::Null, PARSE_ERROR, "Parse error").to_string());
        }
    };
    let id = request.get("id").cloned().unwrap_or(Value::Null);
    let response = forward(client, config, prepare_request(request), id).await;
    Some(response.to_string())
}

/// Forward one request to the MCP endpoint, mapping transport failures onto
/// JSON-RPC errors.
async fn forward(
    client: &reqwest::Client,
    config: &BridgeConfig,
    request: Value,
    id: Value,
) -> Value {
    let mut builder = client
        .post(config.mcp_endpoint())
        .header("Content-Type", "application/json")
        // Required by the streamable HTTP transport.
        .header("Accept", "application/json, text/event-stream")
        .json(&request);
    if let Some(token) = &config.token {
        builder = builder.bearer_auth(token);
    }

    let response = match builder.send().await {
        Ok(response) => response,
        Err(err) => {
            error!(error = %err, "request to MCP server failed");
            return error_response(id, INTERNAL_ERROR, format!("Internal error: {err}"));
        }
    };

    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    if !status.is_success() {
        // Pass the HTTP status through as the JSON-RPC error code.
        return error_response(
            id,
            i64::from(status.as_u16()),
            format!("HTTP {}: {body}", status.as_u16()),
        );
    }

    match serde_json::from_str(&body) {
        Ok(parsed) => parsed,
        Err(err) => error_response(
            id,
            INTERNAL_ERROR,
            format!("Server returned invalid JSON: {err}"),
        ),
    }
}

/// Probe `/health` once; the bridge refuses to start against a dead server.
pub async fn probe_health(client: &reqwest::Client, config: &BridgeConfig) -> bool {
    match client.get(config.health_endpoint()).send().await {
        Ok(response) if response.status().is_success() => {
            info!("connected to MCP server");
            true
        }
        Ok(response) => {
            error!(status = %response.status(), "MCP server health probe failed");
            false
        }
        Err(err) => {
            error!(error = %err, "cannot reach MCP server");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoints_normalize_trailing_slash() {
        let config = BridgeConfig {
            server_url: "http://localhost:8000/".into(),
            token: None,
        };
        assert_eq!(config.mcp_endpoint(), "http://localhost:8000/mcp/");
        assert_eq!(config.health_endpoint(), "http://localhost:8000/health");
    }

    #[test]
    fn initialize_without_client_info_gets_one() {
        let request = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "initialize",
            "params": {"protocolVersion": "2024-11-05", "capabilities": {}},
        });
        let prepared = prepare_request(request);
        assert_eq!(
            prepared["params"]["clientInfo"]["name"],
            json!(BRIDGE_CLIENT_NAME)
        );
    }

    #[test]
    fn initialize_with_client_info_is_untouched() {
        let request = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "initialize",
            "params": {"clientInfo": {"name": "real-client", "version": "9.9"}},
        });
        let prepared = prepare_request(request);
        assert_eq!(prepared["params"]["clientInfo"]["name"], json!("real-client"));
    }

    #[test]
    fn non_initialize_requests_pass_through() {
        let request = json!({"jsonrpc": "2.0", "id": 2, "method": "tools/list", "params": {}});
        let prepared = prepare_request(request.clone());
        assert_eq!(prepared, request);
    }

    #[test]
    fn error_response_shape() {
        let response = error_response(json!(7), PARSE_ERROR, "Parse error");
        assert_eq!(response["jsonrpc"], json!("2.0"));
        assert_eq!(response["id"], json!(7));
        assert_eq!(response["error"]["code"], json!(-32700));
    }

    #[tokio::test]
    async fn blank_lines_are_skipped() {
        let client = build_client().unwrap();
        let config = BridgeConfig {
            server_url: "http://localhost:1".into(),
            token: None,
        };
        assert!(handle_line(&client, &config, "   ").await.is_none());
    }

    #[tokio::test]
    async fn garbage_lines_answer_parse_error() {
        let client = build_client().unwrap();
        let config = BridgeConfig {
            server_url: "http://localhost:1".into(),
            token: None,
        };
        let response = handle_line(&client, &config, "{not json").await.unwrap();
        let parsed: Value = serde_json::from_str(&response).unwrap();
        assert_eq!(parsed["error"]["code"], json!(-32700));
        assert_eq!(parsed["id"], Value::Null);
    }

    #[tokio::test]
    async fn unreachable_server_maps_to_internal_error() {
        let client = build_client().unwrap();
        let config = BridgeConfig {
            // Port 1 is never listening.
            server_url: "http://127.0.0.1:1".into(),
            token: None,
        };
        let response = handle_line(
            &client,
            &config,
            r#"{"jsonrpc":"2.0","id":3,"method":"tools/list"}"#,
        )
        .await
        .unwrap();
        let parsed: Value = serde_json::from_str(&response).unwrap();
        assert_eq!(parsed["error"]["code"], json!(-32603));
        // The request id is preserved even on transport failure.
        assert_eq!(parsed["id"], json!(3));
    }
}
