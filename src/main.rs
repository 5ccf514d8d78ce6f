//! Fleet Risk Pipeline
//!
//! Scans vehicle telemetry for risky driving, raises alerts, keeps driver
//! scores current and pushes all of it to dashboards over WebSocket.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                        FLEET RISK PIPELINE                       │
//! ├──────────────────────────────────────────────────────────────────┤
//! │  ┌──────────────┐   ┌──────────────┐                             │
//! │  │ Batch Scanner│   │    Score     │   periodic tasks            │
//! │  │ + Classifier │   │  Aggregator  │                             │
//! │  │ + Alerts     │   │              │                             │
//! │  └──────┬───────┘   └──────┬───────┘                             │
//! │         │    PostgreSQL    │                                     │
//! │         └────────┬─────────┘                                     │
//! │                  ▼                                               │
//! │           ┌─────────────┐     ┌─────────┐     ┌──────────────┐   │
//! │           │  Event Bus  │────▶│   Hub   │────▶│  /ws clients │   │
//! │           │ (mem/Redis) │     │ (actor) │     │  (Axum)      │   │
//! │           └─────────────┘     └─────────┘     └──────────────┘   │
//! └──────────────────────────────────────────────────────────────────┘
//! ```

mod bus;
mod config;
mod db;
mod engine;
mod error;
mod handlers;
mod hub;
mod models;
mod scheduler;
mod store;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use axum::{routing::get, Router};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tower::ServiceBuilder;
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::bus::{EventBus, EventPublisher, MemoryBus, RedisBus};
use crate::config::Config;
use crate::engine::{AlertEmitter, BatchScanner, FixedEfficiency, ScoreAggregator};
use crate::hub::Hub;
use crate::store::PgStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing(Config::development_from_env());

    let config = Config::from_env();

    tracing::info!(
        environment = %config.environment,
        development = config.is_development(),
        "Fleet Risk Pipeline starting..."
    );
    tracing::info!("Database: {}", config.database_url.split('@').last().unwrap_or("***"));

    let pool = db::create_pool(&config.database_url)
        .await
        .context("Failed to create database pool")?;
    let store = PgStore::new(pool);

    let bus = connect_bus(&config).await;
    let ctx = CancellationToken::new();
    let (hub, hub_task) = Hub::spawn(ctx.clone());

    let mut workers = vec![
        hub_task,
        hub::spawn_relay(bus.clone(), hub.clone(), ctx.clone()),
    ];
    workers.extend(spawn_pipeline(&config, &store, bus, &ctx));

    let connections = TaskTracker::new();
    let state = AppState {
        store: store.clone(),
        hub,
        connections: connections.clone(),
    };
    let app = create_router(state);

    tokio::spawn(shutdown_signal(ctx.clone()));

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    tracing::info!("🚀 Server listening on http://{}", addr);

    let server_ctx = ctx.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { server_ctx.cancelled().await })
        .await
        .context("Server error")?;

    scheduler::drain(workers, &connections, config.shutdown_grace).await;
    store.close().await;

    tracing::info!("Fleet Risk Pipeline stopped");
    Ok(())
}

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub store: PgStore,
    pub hub: Hub,
    /// Upgraded sockets, waited on at shutdown
    pub connections: TaskTracker,
}

/// Pretty logs in development, JSON everywhere else
fn init_tracing(development: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "fleet_risk=debug,tower_http=debug".into());

    let registry = tracing_subscriber::registry().with(filter);
    if development {
        registry.with(tracing_subscriber::fmt::layer()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    }
}

/// Redis when configured and reachable, otherwise the in-process bus
async fn connect_bus(config: &Config) -> Arc<dyn EventBus> {
    if let Some(url) = &config.redis_url {
        match RedisBus::connect(url).await {
            Ok(bus) => {
                tracing::info!("Event bus: Redis");
                return Arc::new(bus);
            }
            Err(e) => {
                tracing::warn!(error = %e, "Redis unavailable, falling back to in-process event bus");
            }
        }
    }

    tracing::info!(capacity = config.bus_capacity, "Event bus: in-process");
    Arc::new(MemoryBus::new(config.bus_capacity))
}

fn spawn_pipeline(
    config: &Config,
    store: &PgStore,
    bus: Arc<dyn EventBus>,
    ctx: &CancellationToken,
) -> Vec<JoinHandle<()>> {
    let shared = Arc::new(store.clone());
    let publisher = EventPublisher::new(bus);

    let scanner = BatchScanner::new(
        shared.clone(),
        shared.clone(),
        shared.clone(),
        AlertEmitter::new(shared.clone()),
        publisher.clone(),
        config.thresholds,
        config.scanner.clone(),
    );

    let aggregator = ScoreAggregator::new(
        shared.clone(),
        shared.clone(),
        shared,
        Arc::new(FixedEfficiency::default()),
        publisher,
        config.scoring.clone(),
    );

    vec![
        scheduler::spawn_periodic(Arc::new(scanner), config.scanner.interval, ctx.clone()),
        scheduler::spawn_periodic(Arc::new(aggregator), config.scoring.interval, ctx.clone()),
    ]
}

/// Create the main router with all routes
fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(handlers::ws::connect))
        .route("/health", get(handlers::health::check))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CompressionLayer::new())
                .layer(
                    CorsLayer::new()
                        .allow_origin(Any)
                        .allow_methods(Any)
                        .allow_headers(Any),
                ),
        )
        .with_state(state)
}

/// Cancel `ctx` on Ctrl+C or SIGTERM
async fn shutdown_signal(ctx: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Error setting up signal handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("Error setting up SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received shutdown signal"),
        _ = terminate => tracing::info!("Received SIGTERM signal"),
    }

    ctx.cancel();
}
