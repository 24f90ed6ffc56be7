mod cache;
mod error;
mod fanout;
mod frontmatter;
mod paths;
mod resources;
mod rpc;
mod server;
mod template;
mod tools;
mod upstream;
mod vault;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "vaultgate")]
#[command(about = "remote json-rpc gateway exposing an obsidian-style note vault to tool-calling agents")]
struct Args {
    /// Host to bind to
    #[arg(long, env = "GATEWAY_HOST", default_value = "localhost")]
    host: String,

    /// Port to bind to
    #[arg(short, long, env = "GATEWAY_PORT", default_value = "3000")]
    port: u16,

    /// Base URL of the note plugin's REST API
    #[arg(long, env = "UPSTREAM_URL", default_value = "http://127.0.0.1:27123")]
    upstream_url: String,

    /// Bearer credential for the note plugin
    #[arg(long, env = "UPSTREAM_KEY")]
    upstream_key: String,

    /// Local vault root, enables filesystem-fallback discovery when the
    /// plugin's listing endpoint is unavailable
    #[arg(long, env = "VAULT_ROOT")]
    vault_root: Option<PathBuf>,

    /// Namespace prefix applied to every tool name except ping
    #[arg(long, env = "TOOL_PREFIX", default_value = "obs_")]
    tool_prefix: String,

    /// Bearer token clients must present. Unset means no authentication -
    /// only sensible behind a trusted proxy
    #[arg(long, env = "GATEWAY_AUTH_TOKEN")]
    auth_token: Option<String>,

    /// Vault structure cache TTL in seconds
    #[arg(long, env = "STRUCTURE_TTL_SECS", default_value = "300")]
    structure_ttl_secs: u64,

    /// Discovered note list cache TTL in seconds
    #[arg(long, env = "NOTES_TTL_SECS", default_value = "180")]
    notes_ttl_secs: u64,

    /// Concurrent upstream reads per enrichment batch
    #[arg(long, env = "BATCH_SIZE", default_value = "15")]
    batch_size: usize,

    /// Characters of context on each side of a keyword hit
    #[arg(long, env = "SNIPPET_RADIUS", default_value = "80")]
    snippet_radius: usize,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file if present
    let _ = dotenvy::dotenv();

    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "vaultgate=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    tracing::info!("Connecting to note plugin at {}", args.upstream_url);
    let api = upstream::VaultApi::new(&args.upstream_url, &args.upstream_key)?;
    api.probe().await?;
    tracing::info!("Upstream reachable");

    let caches = cache::VaultCaches::new(
        Duration::from_secs(args.structure_ttl_secs),
        Duration::from_secs(args.notes_ttl_secs),
    );
    let vault = vault::Vault::new(
        api,
        caches,
        vault::VaultConfig {
            fs_root: args.vault_root.clone(),
            batch_size: args.batch_size,
            snippet_radius: args.snippet_radius,
        },
    );

    let registry = Arc::new(tools::ToolRegistry::new(&args.tool_prefix));
    tracing::info!(
        "Registered {} tools with prefix '{}'",
        registry.len(),
        args.tool_prefix
    );

    let state = server::AppState {
        gateway: Arc::new(tools::Gateway { vault }),
        registry,
    };

    if args.auth_token.is_some() {
        tracing::info!("Bearer authentication enabled");
    } else {
        tracing::warn!("WARNING: No authentication enabled. Server is publicly accessible!");
    }

    let app = server::router(state, args.auth_token);

    let bind_addr = format!("{}:{}", args.host, args.port);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!("Gateway ready at http://{}", bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    // In-flight requests (vault writes included) run to completion; we only
    // stop accepting new connections.
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("Shutting down");
}
