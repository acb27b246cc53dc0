// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tbp_app::EnforcementLevel;
use tbp_auth::ApiTokenValidator;
use tbp_flags::FeatureFlagService;
use tbp_server::{build_app, AppState, Backplane, ServerConfig};
use tbp_storage::EnvironmentConfig;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "tbp-server", version, about = "Task backplane control-plane daemon")]
struct Args {
    /// Bind address; overrides MCP_HOST/MCP_PORT when set.
    #[arg(long)]
    bind: Option<String>,

    /// Path to the persisted feature-flag store.
    #[arg(long, default_value = ".task-backplane/flags.json")]
    flags_path: PathBuf,

    /// Default parameter-enforcement level.
    #[arg(long, default_value = "warning")]
    enforcement: String,

    /// Enable request/response debug logging.
    #[arg(long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let filter = if args.debug {
        EnvFilter::new("tbp=debug")
    } else {
        EnvFilter::new("tbp=info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let server_config = ServerConfig::from_env();
    let env = EnvironmentConfig::from_env();
    let enforcement_level =
        EnforcementLevel::parse(&args.enforcement).unwrap_or(EnforcementLevel::Warning);

    let keycloak = tbp_auth::KeycloakConfig::from_env();
    if keycloak.is_configured() {
        info!(
            url = keycloak.url.as_deref().unwrap_or("-"),
            realm = keycloak.realm.as_deref().unwrap_or("-"),
            "keycloak identity provider configured"
        );
    }

    let flags = Arc::new(
        FeatureFlagService::load(&args.flags_path)
            .with_context(|| format!("load feature flags from {}", args.flags_path.display()))?,
    );
    info!(
        migration_pct = flags.migration_status().percentage,
        "feature flags loaded"
    );

    let backplane = Arc::new(Backplane::new(
        env,
        enforcement_level,
        server_config.auth_enabled,
        Some(flags),
    ));
    let validator = Arc::new(ApiTokenValidator::new(
        backplane.repos.token_store(),
        backplane.cache.clone(),
    ));

    let state = Arc::new(AppState {
        backplane: backplane.clone(),
        validator,
        auth_enabled: server_config.auth_enabled,
    });
    let app = build_app(state);

    let bind = args.bind.unwrap_or_else(|| server_config.bind_addr());
    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .with_context(|| format!("bind {bind}"))?;
    info!(
        bind = %bind,
        auth_enabled = server_config.auth_enabled,
        "tbp-server listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serve")?;

    // Drain in-flight events before exiting.
    let metrics = backplane.bus.metrics();
    info!(
        events_published = metrics.events_published,
        events_processed = metrics.events_processed,
        "shutting down"
    );
    backplane.shutdown().await;
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("shutdown signal received");
}
