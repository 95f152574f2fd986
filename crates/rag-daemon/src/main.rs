// SPDX-License-Identifier: MIT OR Apache-2.0
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use rag_daemon::middleware::{request_id_middleware, CorsConfig, RateLimiter, RequestLogger};
use rag_daemon::{build_app, AppState, GlobalPolicyConfig};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "rag-daemon", version, about = "RAG pipeline HTTP control plane")]
struct Args {
    /// Bind address.
    #[arg(long, default_value = "127.0.0.1:8089")]
    bind: String,

    /// Directory pipeline YAML files are loaded from.
    #[arg(long, default_value = "pipelines")]
    pipelines_root: PathBuf,

    /// Expose `/pipeline/stream/dev` (unauthenticated).
    #[arg(long)]
    dev: bool,

    /// Bearer token required for `/pipeline/stream/prod`. Read from
    /// `RAG_DAEMON_PROD_TOKEN` if unset; prod auth is skipped if neither is
    /// set.
    #[arg(long)]
    prod_bearer_token: Option<String>,

    /// Maximum requests per client window, enforced ahead of every route.
    #[arg(long, default_value_t = 120)]
    rate_limit_per_minute: u32,

    /// Enable verbose logging.
    #[arg(long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let filter = if args.debug { EnvFilter::new("rag=debug,rag_daemon=debug") } else { EnvFilter::new("rag=info") };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let prod_bearer_token = args.prod_bearer_token.or_else(|| std::env::var("RAG_DAEMON_PROD_TOKEN").ok());

    let state = Arc::new(AppState::new(
        args.pipelines_root.clone(),
        GlobalPolicyConfig::default(),
        args.dev,
        prod_bearer_token,
    ));

    spawn_sweeper(Arc::clone(&state.broker));

    let rate_limiter = RateLimiter::new(args.rate_limit_per_minute, Duration::from_secs(60));

    let app = build_app(state)
        .layer(axum::middleware::from_fn(request_id_middleware))
        .layer(axum::middleware::from_fn(RequestLogger::layer))
        .layer(rate_limiter.into_layer())
        .layer(CorsConfig::default().to_cors_layer());

    let listener = tokio::net::TcpListener::bind(&args.bind).await.with_context(|| format!("bind {}", args.bind))?;
    info!(bind = %args.bind, pipelines_root = %args.pipelines_root.display(), dev = args.dev, "rag-daemon listening");

    axum::serve(listener, app).await.context("serve")
}

fn spawn_sweeper(broker: Arc<rag_broker::Broker>) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(60));
        loop {
            interval.tick().await;
            let removed = broker.sweep(chrono::Utc::now());
            if removed > 0 {
                tracing::debug!(removed, "swept stale closed runs");
            }
        }
    });
}
