//! Warden Server - access decisions for login and game servers
//!
//! This server handles:
//! - Login and registration access decisions
//! - Machine ident taint and per-site bans
//! - Free account quotas per machine
//! - Login attempt throttling

use axum::Router;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use warden_common::SiteTable;
use warden_server::abuse::{spawn_reset_task, AccessEngine, LoginThrottle};
use warden_server::store::{PgStore, Store};
use warden_server::{config, db, routes};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,warden_server=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = config::Config::from_env()?;
    tracing::info!("Starting Warden server on {}:{}", config.host, config.port);
    tracing::info!("Primary site: {}", config.primary_site_id);

    let sites = SiteTable::builtin();
    sites.validate()?;
    tracing::info!("Loaded {} sites", sites.len());

    // Initialize database
    tracing::info!("Connecting to database...");
    let db_pool = db::init_pool(&config.database_url, config.database_max_connections).await?;
    tracing::info!("Running database migrations...");
    db::run_migrations(&db_pool).await?;

    let store: Arc<dyn Store> = Arc::new(PgStore::new(db_pool));
    let engine = AccessEngine::new(store, Arc::new(sites.clone()), config.quota());

    let throttle = Arc::new(LoginThrottle::new(config.throttle()));
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let reset_handle = spawn_reset_task(throttle.clone(), shutdown_rx);

    // Create app state
    let state = routes::AppState::new(engine, throttle, config.admin_token.clone());

    let app: Router = routes::app(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    tracing::info!("Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let result = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    if let Err(e) = &result {
        tracing::error!("Server error: {}", e);
    }

    let _ = shutdown_tx.send(true);
    if let Err(e) = reset_handle.await {
        tracing::error!("Throttle reset task failed: {}", e);
    }

    result?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
