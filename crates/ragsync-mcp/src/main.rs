//! ragsync MCP server: exposes store operations as MCP tools for AI agents
//!
//! Talks to the File Search API directly, over stdio or streamable HTTP.
//! Uploads here deduplicate against remote document metadata, not the local
//! catalog.

use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};
use rmcp::{transport::stdio, ServiceExt};
use secrecy::SecretString;
use std::path::PathBuf;
use std::sync::Arc;

use ragsync_core::config::{expand_tilde, RagsyncConfig};
use ragsync_core::RagsyncError;
use ragsync_remote::{GeminiClient, PollConfig};

mod http;
mod server;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Transport {
    Stdio,
    Http,
}

#[derive(Parser, Debug)]
#[command(name = "ragsync-mcp", version, about = "ragsync MCP server")]
struct Cli {
    /// Config file path
    #[arg(
        long,
        env = "RAGSYNC_CONFIG",
        default_value = "~/.config/ragsync/config.toml"
    )]
    config: PathBuf,

    /// Transport to serve on
    #[arg(long, value_enum, default_value = "stdio")]
    transport: Transport,

    /// Port for the HTTP transport
    #[arg(long, default_value_t = 8080)]
    port: u16,

    /// API key HTTP clients must present
    #[arg(long, env = "RAGSYNC_SERVE_API_KEY", hide_env_values = true)]
    serve_api_key: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = RagsyncConfig::load(&expand_tilde(&cli.config))?;
    config.validate()?;

    init_logging(&config.log.level, &config.log.format);
    tracing::info!("ragsync-mcp starting");

    let api_key = std::env::var("GEMINI_API_KEY")
        .ok()
        .filter(|k| !k.trim().is_empty())
        .ok_or_else(|| RagsyncError::Config("GEMINI_API_KEY is not set".into()))?;
    let client = GeminiClient::new(&config.remote, SecretString::from(api_key))
        .context("building API client")?;

    let default_store = std::env::var("RAGSYNC_STORE").ok().filter(|s| !s.is_empty());
    let server = server::RagsyncMcp::new(
        Arc::new(client),
        default_store,
        config.query.model.clone(),
        PollConfig::from(&config.upload),
    );

    match cli.transport {
        Transport::Stdio => {
            let service = server.serve(stdio()).await.inspect_err(|e| {
                tracing::error!("MCP server error: {:?}", e);
            })?;
            service.waiting().await?;
        }
        Transport::Http => {
            let Some(key) = cli.serve_api_key.filter(|k| !k.trim().is_empty()) else {
                bail!(RagsyncError::Config(
                    "HTTP transport requires --serve-api-key or RAGSYNC_SERVE_API_KEY".into()
                ));
            };
            let addr = format!("0.0.0.0:{}", cli.port);
            let listener = tokio::net::TcpListener::bind(&addr)
                .await
                .with_context(|| format!("binding {addr}"))?;
            tracing::info!(%addr, path = http::MCP_PATH, "serving MCP over HTTP");
            axum::serve(listener, http::router(server, key))
                .with_graceful_shutdown(async {
                    let _ = tokio::signal::ctrl_c().await;
                    tracing::info!("shutting down");
                })
                .await
                .context("MCP HTTP server")?;
        }
    }
    Ok(())
}

fn init_logging(level: &str, format: &str) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    // Logging MUST go to stderr: stdout carries JSON-RPC
    if format == "json" {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_writer(std::io::stderr).with_ansi(false))
            .init();
    }
}
