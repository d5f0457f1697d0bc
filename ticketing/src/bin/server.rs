//! Keygate server.
//!
//! # Environment Variables
//!
//! See [`keygate_ticketing::config`]. The essentials:
//!
//! - `DATABASE_URL`: `PostgreSQL` connection string
//! - `ADMIN_TOKEN`: bearer token for `/api/admin` (empty disables it)
//! - `GATEWAY_SECRET`: shared secret for signing with the payment gateway
//! - `TIER_THRESHOLDS`: `name:lower_bound:price,...`
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin keygate-server
//! ```

use axum::{routing::get, Router};
use keygate_core::CapacityState;
use keygate_postgres::PostgresLedgerStore;
use keygate_ticketing::{
    bootstrap::build_engine,
    config::Config,
    metrics::register_business_metrics,
    server::{build_router, spawn_maintenance, AppState},
};
use metrics_exporter_prometheus::PrometheusBuilder;
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,keygate_ticketing=debug,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Keygate server");

    let config = Config::from_env();
    let policy = config.event_policy()?;
    info!(
        max_capacity = policy.settings.max_capacity,
        tiers = policy.settings.tiers.len(),
        addons = policy.pricing.addons.len(),
        "Configuration loaded"
    );

    // Ledger
    let pool = PgPoolOptions::new()
        .max_connections(config.postgres.max_connections)
        .min_connections(config.postgres.min_connections)
        .acquire_timeout(Duration::from_secs(config.postgres.connect_timeout))
        .connect(&config.postgres.url)
        .await?;
    let store = PostgresLedgerStore::from_pool(pool);
    store.migrate().await?;
    let initial = CapacityState::new(policy.settings.clone(), chrono::Utc::now());
    if !store.seed_capacity(&initial).await? {
        info!("Capacity state already present; keeping stored settings");
    }

    // Metrics
    let metrics_handle = PrometheusBuilder::new().install_recorder()?;
    register_business_metrics();
    let metrics_app = Router::new().route(
        "/metrics",
        get(move || {
            let handle = metrics_handle.clone();
            async move { handle.render() }
        }),
    );
    let metrics_listener = tokio::net::TcpListener::bind(config.metrics_addr()).await?;
    info!(address = %config.metrics_addr(), "Serving metrics");
    tokio::spawn(async move {
        if let Err(e) = axum::serve(metrics_listener, metrics_app).await {
            warn!(error = %e, "Metrics server stopped");
        }
    });

    // Engine and background work
    let engine = Arc::new(build_engine(Arc::new(store), &config, policy));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let maintenance = spawn_maintenance(
        Arc::clone(&engine),
        Duration::from_secs(config.event.maintenance_interval_secs.max(1)),
        shutdown_rx,
    );

    if config.admin.token.is_empty() {
        warn!("ADMIN_TOKEN is empty; admin routes are disabled");
    }
    let app = build_router(AppState::new(engine, &config.admin.token));

    let addr = config.server_addr();
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(address = %addr, "Starting HTTP server");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    shutdown_tx.send(true).ok();
    if tokio::time::timeout(Duration::from_secs(config.server.shutdown_timeout), maintenance)
        .await
        .is_err()
    {
        warn!("Maintenance task did not stop in time");
    }

    info!("Server stopped");
    Ok(())
}

/// Resolve on Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received Ctrl+C signal, shutting down gracefully...");
        },
        () = terminate => {
            info!("Received SIGTERM signal, shutting down gracefully...");
        },
    }
}
