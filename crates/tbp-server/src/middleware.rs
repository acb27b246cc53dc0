// SPDX-License-Identifier: MIT OR Apache-2.0
//! Middleware stack for the daemon.

use crate::state::AppState;
use axum::{
    extract::{Request, State},
    http::{HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::sync::Arc;
use tbp_auth::TokenValidator as _;
use tracing::{info, warn};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// RequestId
// ---------------------------------------------------------------------------

/// A unique request identifier, available as an axum extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestId(pub Uuid);

/// Generates a [`RequestId`] per request, sets the `X-Request-Id` response
/// header, and logs the request outcome with structured fields.
pub async fn request_id_middleware(mut req: Request, next: Next) -> Response {
    let id = RequestId(Uuid::new_v4());
    req.extensions_mut().insert(id);

    let method = req.method().clone();
    let path = req.uri().path().to_owned();
    let start = std::time::Instant::now();

    let mut resp = next.run(req).await;

    if let Ok(value) = HeaderValue::from_str(&id.0.to_string()) {
        resp.headers_mut().insert("x-request-id", value);
    }
    info!(
        http.method = %method,
        http.path = %path,
        http.status = resp.status().as_u16(),
        http.duration_ms = start.elapsed().as_millis() as u64,
        request_id = %id.0,
        "request completed"
    );
    resp
}

// ---------------------------------------------------------------------------
// Authentication
// ---------------------------------------------------------------------------

/// Bearer-token gate for every tool endpoint.
///
/// `/health` is wired outside this layer.  With authentication disabled the
/// tool endpoints reject everything — there is no anonymous fallback
/// identity to scope data by.
pub async fn auth_middleware(
    State(state): State<Arc<AppState>>,
    mut req: Request,
    next: Next,
) -> Response {
    if !state.auth_enabled {
        return unauthorized("authentication is disabled; tool endpoints reject all calls");
    }

    let Some(token) = bearer_token(&req) else {
        return unauthorized("missing bearer token");
    };

    let auth = match state.validator.validate(&token).await {
        Ok(auth) => auth,
        Err(err) => {
            warn!(error = %err, "bearer token rejected");
            return unauthorized("invalid bearer token");
        }
    };

    req.extensions_mut().insert(auth.clone());
    // Bind the identity for the whole request future so any code below can
    // resolve the caller with one lookup.
    tbp_auth::with_auth(auth, next.run(req)).await
}

fn bearer_token(req: &Request) -> Option<String> {
    let header = req.headers().get(axum::http::header::AUTHORIZATION)?;
    let raw = header.to_str().ok()?;
    raw.strip_prefix("Bearer ")
        .or_else(|| raw.strip_prefix("bearer "))
        .map(str::to_string)
}

fn unauthorized(message: &str) -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(json!({
            "error": "unauthorized",
            "message": message,
        })),
    )
        .into_response()
}
