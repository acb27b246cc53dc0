// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]

use anyhow::{Context, Result};
use clap::Parser;
use tbp_bridge::{build_client, handle_line, probe_health, BridgeConfig};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "tbp-bridge", version, about = "stdio to HTTP bridge for the task backplane")]
struct Args {
    /// Base URL of the MCP server.
    #[arg(long, default_value = "http://localhost:8000")]
    server_url: String,

    /// Bearer token; falls back to the TBP_TOKEN environment variable.
    #[arg(long)]
    token: Option<String>,

    /// Enable request/response debug logging (to stderr).
    #[arg(long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // stdout is the protocol channel; logs go to stderr only.
    let filter = if args.debug {
        EnvFilter::new("tbp_bridge=debug")
    } else {
        EnvFilter::new("tbp_bridge=info")
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let config = BridgeConfig {
        server_url: args.server_url,
        token: args.token.or_else(|| std::env::var("TBP_TOKEN").ok()),
    };
    let client = build_client().context("build http client")?;

    if !probe_health(&client, &config).await {
        anyhow::bail!("cannot connect to MCP server at {}", config.server_url);
    }
    info!(server = %config.server_url, "bridge ready");

    let stdin = BufReader::new(tokio::io::stdin());
    let mut stdout = tokio::io::stdout();
    let mut lines = stdin.lines();
    let mut request_count = 0u64;

    // One request at a time: MCP peers require in-order responses.
    while let Some(line) = lines.next_line().await.context("read stdin")? {
        request_count += 1;
        info!(request = request_count, bytes = line.len(), "request received");

        if let Some(response) = handle_line(&client, &config, &line).await {
            stdout
                .write_all(response.as_bytes())
                .await
                .context("write stdout")?;
            stdout.write_all(b"\n").await.context("write stdout")?;
            stdout.flush().await.context("flush stdout")?;
        }
    }

    info!("EOF received, shutting down");
    Ok(())
}
