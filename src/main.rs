//! Portico - Dataverse API proxy and cache server
//!
//! An HTTP proxy that sits between a browser UI and a remote Dataverse
//! repository, with:
//! - Stale-while-revalidate caching so clients stop waiting on upstream
//!   latency once an entry has been seen
//! - Collection fan-out search merging configured sub-collections into one
//!   deduplicated result set
//! - Cached image thumbnails and streaming passthrough for full downloads
//! - Prometheus metrics

mod cache;
mod config;
mod error;
mod metrics;
mod routes;
mod services;
mod state;

use crate::cache::{RevalidationTracker, TtlCache};
use crate::config::Config;
use crate::metrics::{create_metrics, SharedMetrics};
use crate::services::dataverse::api::DataverseApi;
use crate::state::AppState;
use axum::extract::State;
use axum::http::{header, HeaderValue};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Portico - Dataverse API proxy
#[derive(Parser, Debug)]
#[command(name = "portico")]
#[command(author, version, about = "Dataverse API proxy and cache server", long_about = None)]
struct Args {
    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Enable JSON logging output
    #[arg(long)]
    json_logs: bool,

    /// Enable debug logging for upstream API requests
    #[arg(long)]
    debug_requests: bool,

    /// Server port (overrides PORT env var)
    #[arg(short, long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file first (before parsing args, so env vars are available)
    dotenvy::dotenv().ok();

    let args = Args::parse();

    init_logging(&args.log_level, args.json_logs, args.debug_requests)?;

    info!("Starting Portico v{}", env!("CARGO_PKG_VERSION"));

    // Load config (CLI port overrides env var)
    let mut config = Config::from_env()?;
    if let Some(port) = args.port {
        config.server.port = port;
    }
    let config = Arc::new(config);

    info!(upstream = %config.dataverse.base_url, "Proxying to Dataverse");
    info!(
        has_api_token = config.dataverse.api_token.is_some(),
        show_hidden = config.show_hidden_active(),
        "Upstream credentials"
    );
    if config.dataverse.collections.is_empty() {
        info!("Searching all collections (no filter)");
    } else {
        info!(
            collections = ?config.dataverse.collections,
            "Searching configured collections"
        );
    }

    let metrics = create_metrics();
    let api = DataverseApi::new(
        &config.dataverse.base_url,
        config.dataverse.api_token.clone(),
        metrics.clone(),
    );
    let cache = TtlCache::new(config.cache.fresh_ttl, config.cache.stale_ttl);
    let revalidations = RevalidationTracker::new();

    // Create shutdown channel
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Periodic eviction of entries past their stale deadline
    spawn_sweeper(
        cache.clone(),
        metrics.clone(),
        config.cache.sweep_interval,
        shutdown_rx,
    );

    let state = AppState {
        config: config.clone(),
        api,
        cache,
        revalidations,
        metrics,
    };

    // Setup Router
    let app = Router::new()
        .route("/api/search", get(routes::search::search))
        .route(
            "/api/datasets/{persistent_id}/versions/{version}",
            get(routes::datasets::dataset_version),
        )
        .route(
            "/api/datasets/{id_or_pid}/versions/{version}/files",
            get(routes::datasets::dataset_files),
        )
        .route("/api/files/{file_id}", get(routes::files::file_metadata))
        .route(
            "/api/access/datafile/{file_id}",
            get(routes::files::datafile),
        )
        .route("/api/cache/stats", get(routes::diag::cache_stats))
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .layer(cors_layer(&config))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    // Start Server
    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    info!(
        "Listening on http://{} (API: /api, Metrics: /metrics, Health: /health)",
        addr
    );

    // Setup graceful shutdown
    let shutdown_signal = async move {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to listen for ctrl-c");
        info!("Shutdown signal received, initiating graceful shutdown...");
        let _ = shutdown_tx.send(true);
    };

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal)
        .await?;

    info!("Portico shutdown complete");
    Ok(())
}

/// Evict expired cache entries on a fixed interval until shutdown.
fn spawn_sweeper(
    cache: TtlCache,
    metrics: SharedMetrics,
    interval: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // The first tick fires immediately; skip it so sweeps start one
        // full interval after boot
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let removed = cache.sweep().await;
                    if removed > 0 {
                        debug!(removed, "Swept expired cache entries");
                    }
                    metrics.cache_entries.set(cache.len().await as f64);
                }
                _ = shutdown_rx.changed() => break,
            }
        }
    });
}

/// CORS for the browser client. `X-Cache` is exposed so the UI can show
/// cache provenance.
fn cors_layer(config: &Config) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods(Any)
        .allow_headers(Any)
        .expose_headers([routes::X_CACHE]);

    match &config.server.cors_origin {
        Some(origin) => match origin.parse::<HeaderValue>() {
            Ok(value) => cors.allow_origin([value]),
            Err(_) => {
                warn!(origin = %origin, "Invalid CORS_ORIGIN, allowing any origin");
                cors.allow_origin(Any)
            }
        },
        None => cors.allow_origin(Any),
    }
}

/// Health check endpoint
async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let config = &state.config;
    let body = serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "dataverse_url": config.dataverse.base_url,
        "has_api_token": config.dataverse.api_token.is_some(),
        "show_hidden": config.show_hidden_active(),
        "collections": config.dataverse.collections,
        "collections_configured": !config.dataverse.collections.is_empty(),
    });

    axum::Json(body)
}

/// Metrics endpoint handler
async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.render(),
    )
}

fn init_logging(level: &str, json: bool, debug_requests: bool) -> anyhow::Result<()> {
    let level = level.parse::<Level>().unwrap_or(Level::INFO);

    // Set portico to the requested level, and optionally surface upstream
    // request debugging
    let filter = if debug_requests {
        EnvFilter::new(format!(
            "portico={},portico::services::dataverse::api=debug,tower_http=debug,hyper=warn",
            level
        ))
    } else {
        EnvFilter::new(format!("portico={},tower_http=info,hyper=warn", level))
    };

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            )
            .init();
    }

    Ok(())
}
