//! Economic-impact analysis server.
//!
//! Submits causal analyses to a background worker pool and serves their
//! results for polling.
//!
//! # Endpoints
//!
//! - `POST /v1/analyses`     — analysis request JSON → `{id, status}`
//! - `GET  /v1/analyses/:id` — status, result or error
//! - `GET  /v1/health`       — server status and version

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use axum::Router;
use axum::extract::DefaultBodyLimit;
use clap::Parser;
use ei_core::Warehouse;
use ei_panel::{SnapshotWarehouse, WarehouseSnapshot};
use ei_server::{AnalysisService, AnalysisStore, AppState, Config, MemoryStore, SqliteStore, routes};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,tower_http=debug")),
        )
        .init();

    let cli = Config::parse();

    // Configure Rayon thread pool
    if cli.threads > 0 {
        rayon::ThreadPoolBuilder::new().num_threads(cli.threads).build_global().ok();
    }

    let warehouse: Arc<dyn Warehouse> = match &cli.warehouse_snapshot {
        Some(path) => Arc::new(
            SnapshotWarehouse::from_json_file(path)
                .with_context(|| format!("loading warehouse snapshot {}", path.display()))?,
        ),
        None => {
            tracing::warn!("no warehouse snapshot configured; every panel build will be empty");
            Arc::new(SnapshotWarehouse::new("empty", WarehouseSnapshot::default()))
        }
    };

    let store: Arc<dyn AnalysisStore> = match &cli.sqlite_path {
        Some(path) => Arc::new(
            SqliteStore::open(path).with_context(|| format!("opening {}", path.display()))?,
        ),
        None => Arc::new(MemoryStore::new()),
    };

    let engine = cli.engine();
    let service = AnalysisService::new(store, warehouse, engine.clone());
    service.recover().await?;

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let workers = service.spawn_workers(shutdown_rx);

    let state = Arc::new(AppState::new(service));
    let app = Router::new()
        .merge(routes::router())
        .layer(DefaultBodyLimit::max(cli.max_body_bytes()))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state);

    let addr: SocketAddr = format!("{}:{}", cli.host, cli.port).parse()?;
    tracing::info!(
        %addr,
        workers = engine.workers,
        synthetic_control = engine.synthetic_control,
        warehouse_timeout_ms = engine.warehouse_timeout.as_millis() as u64,
        version = ei_core::VERSION,
        "ei-server starting"
    );

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
            tracing::info!("shutdown requested");
        })
        .await?;

    shutdown_tx.send(true).ok();
    for w in workers {
        w.await.ok();
    }
    Ok(())
}
