//! Orchestrator server - HTTP surface over the debug-session orchestrator.

mod routes;
mod state;

use std::net::SocketAddr;
use std::path::PathBuf;

use axum::Router;
use clap::Parser;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use orchestrator::config::load_config;

use crate::state::AppState;

#[derive(Parser)]
#[command(name = "orchestrator-ui")]
#[command(about = "HTTP API for the debug-session orchestrator")]
struct Args {
    /// Address to bind the server to
    #[arg(long, default_value = "127.0.0.1")]
    bind: String,

    /// Port to listen on
    #[arg(long, default_value = "8000")]
    port: u16,

    /// Workspace root (contains code/ and logs/)
    #[arg(long, default_value = ".")]
    root: PathBuf,

    /// Config file (defaults to <root>/orchestrator.toml)
    #[arg(long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("orchestrator_ui=info".parse()?)
                .add_directive("orchestrator=info".parse()?),
        )
        .init();

    let args = Args::parse();

    let root = args.root.canonicalize().unwrap_or(args.root);
    let config_path = args
        .config
        .unwrap_or_else(|| root.join("orchestrator.toml"));
    let mut config = load_config(&config_path)?;
    config.apply_env();
    info!(root = %root.display(), "starting orchestrator-ui");

    let state = AppState::new(root, config);

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .nest("/api", routes::api_router())
        .layer(cors)
        .with_state(state);

    let addr: SocketAddr = format!("{}:{}", args.bind, args.port).parse()?;
    info!(addr = %addr, "listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
