mod error;
mod routes;
mod state;

use axum::routing::{get, post};
use axum::Router;
use clap::Parser;
use state::{AppState, SharedState};
use std::path::PathBuf;
use std::sync::Arc;
use symbols_core::Config;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "symbols-service")]
#[command(about = "HTTP symbol search over per-commit indexes")]
#[command(version)]
struct Args {
    /// TOML config file; flags below override it
    #[arg(long, env = "SYMBOLS_CONFIG")]
    config: Option<PathBuf>,

    #[arg(long, env = "SYMBOLS_BIND", default_value = "127.0.0.1")]
    bind: String,

    #[arg(long, env = "SYMBOLS_PORT", default_value_t = 3000)]
    port: u16,

    #[arg(long, env = "SYMBOLS_CACHE_DIR")]
    cache_dir: Option<PathBuf>,

    #[arg(long, env = "SYMBOLS_REPOS_ROOT")]
    repos_root: Option<PathBuf>,

    #[arg(long, env = "SYMBOLS_CACHE_SIZE_MB")]
    cache_size_mb: Option<u64>,
}

impl Args {
    fn config(&self) -> symbols_core::Result<Config> {
        let mut config = match &self.config {
            Some(path) => Config::load(path)?,
            None => Config::default(),
        };
        if let Some(dir) = &self.cache_dir {
            config.cache.dir = dir.clone();
        }
        if let Some(root) = &self.repos_root {
            config.git.repos_root = root.clone();
        }
        if let Some(mb) = self.cache_size_mb {
            config.cache.max_size_mb = mb;
        }
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let config = args.config()?;
    std::fs::create_dir_all(&config.cache.dir)?;

    let state: SharedState = Arc::new(AppState::new(&config));
    tokio::spawn(state::run_janitor(Arc::clone(&state)));

    let app = Router::new()
        .route("/search", post(routes::search))
        .route("/healthz", get(routes::healthz))
        .route("/status", get(routes::status))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr = format!("{}:{}", args.bind, args.port);
    tracing::info!(
        %addr,
        cache_dir = %config.cache.dir.display(),
        repos_root = %config.git.repos_root.display(),
        "symbols-service listening"
    );

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
