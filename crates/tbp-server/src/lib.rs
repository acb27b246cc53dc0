// SPDX-License-Identifier: MIT OR Apache-2.0
//! HTTP daemon for the task backplane.
//!
//! Wires the whole plane together — bus, cache, repositories, facades,
//! controllers — and serves it over two routes: an unauthenticated
//! `GET /health` and the bearer-gated JSON-RPC endpoint at `POST /mcp/`.

#![deny(unsafe_code)]

mod middleware;
mod rpc;
mod state;

pub use middleware::{auth_middleware, request_id_middleware, RequestId};
pub use state::{AppState, Backplane, ServerConfig};

use axum::{
    extract::State,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use std::sync::Arc;
use tower_http::cors::CorsLayer;

/// Build the axum router with all routes and middleware.
pub fn build_app(state: Arc<AppState>) -> Router {
    let protected = Router::new()
        .route("/mcp", post(rpc::handle_mcp))
        .route("/mcp/", post(rpc::handle_mcp))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ));

    Router::new()
        .merge(protected)
        .route("/health", get(health))
        .layer(axum::middleware::from_fn(request_id_middleware))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// `GET /health` — unauthenticated liveness and wiring probe.
async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.backplane.registry.connection().health_payload())
}
