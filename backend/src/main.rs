//! Fitcoach Backend
//!
//! Adaptive training scheduler and real-time telemetry pipeline.
//!
//! ## Architecture
//!
//! - Routes: HTTP and WebSocket handling
//! - Services: scheduling, live sessions, telemetry ingest and fanout
//! - Repositories: PostgreSQL (sqlx) or in-memory stores
//! - Background ticker: reconciliation, telemetry flushing, connection pruning

use anyhow::Result;
use fitcoach_backend::{
    clock::SystemClock,
    config::{self, StorageBackend},
    db,
    repositories::{MemoryStore, Storage},
    routes,
    services::{broadcast, Backplane, LocalBackplane, RedisBackplane, Services, Ticker, TickerConfig},
    state::AppState,
};
use metrics_exporter_prometheus::PrometheusBuilder;
use redis::aio::ConnectionManager;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    init_tracing();

    let config = config::AppConfig::load()?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        env = if config::AppConfig::is_production() { "production" } else { "development" },
        storage = ?config.storage.backend,
        "Starting Fitcoach Backend"
    );

    if config::AppConfig::is_production() {
        validate_production_config(&config)?;
    }

    let (storage, pool) = match config.storage.backend {
        StorageBackend::Postgres => {
            info!("Connecting to database...");
            let pool = db::create_pool(&config.database).await?;
            // Production runs migrations as a separate job
            if !config::AppConfig::is_production() {
                db::run_migrations(&pool).await?;
            }
            (Storage::postgres(pool.clone()), Some(pool))
        }
        StorageBackend::Memory => {
            warn!("Using the in-memory store; data is lost on restart");
            (Storage::memory(Arc::new(MemoryStore::new())), None)
        }
    };

    // Redis is optional: without it live updates stay on this instance
    let redis = if config.redis.enabled {
        connect_redis(&config.redis.url).await
    } else {
        None
    };
    let backplane: Arc<dyn Backplane> = match &redis {
        Some((_, conn)) => Arc::new(RedisBackplane::new(conn.clone(), config.redis.channel.clone())),
        None => Arc::new(LocalBackplane),
    };
    info!(backplane = backplane.name(), "Live fanout configured");

    let services = Services::init(storage, Arc::new(SystemClock), backplane, &config);
    let ticker = Ticker::start(services.clone(), TickerConfig::from(&config));

    let relay = redis.map(|(client, _)| {
        broadcast::spawn_relay(
            client,
            config.redis.channel.clone(),
            services.broadcaster.clone(),
            ticker.shutdown_signal(),
        )
    });

    let mut state = AppState::new(services, config.clone());
    if let Some(pool) = pool {
        state = state.with_db(pool);
    }
    match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => state = state.with_metrics(handle),
        Err(e) => warn!("Failed to install metrics recorder: {}. /metrics is disabled.", e),
    }

    let app = routes::create_router(state);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    info!(address = %addr, "Server listening");

    let listener = tokio::net::TcpListener::bind(&addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    ticker.shutdown().await;
    if let Some(relay) = relay {
        if let Err(e) = relay.await {
            warn!(error = %e, "Backplane relay ended abnormally");
        }
    }

    info!("Server shutdown complete");
    Ok(())
}

/// Connect to Redis with graceful fallback
///
/// Returns None if Redis is unavailable, leaving live fanout in-process
async fn connect_redis(url: &str) -> Option<(redis::Client, ConnectionManager)> {
    info!("Connecting to Redis...");

    match redis::Client::open(url) {
        Ok(client) => match ConnectionManager::new(client.clone()).await {
            Ok(conn) => {
                info!("Redis connection established");
                Some((client, conn))
            }
            Err(e) => {
                warn!("Failed to connect to Redis: {}. Live fanout stays local.", e);
                None
            }
        },
        Err(e) => {
            warn!("Invalid Redis URL: {}. Live fanout stays local.", e);
            None
        }
    }
}

/// Initialize tracing/logging
fn init_tracing() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if config::AppConfig::is_production() {
            "fitcoach_backend=info,tower_http=info".into()
        } else {
            "fitcoach_backend=debug,tower_http=debug,sqlx=warn".into()
        }
    });

    let subscriber = tracing_subscriber::registry().with(env_filter);

    if config::AppConfig::is_production() {
        // JSON logging for production (better for log aggregation)
        subscriber
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        subscriber
            .with(tracing_subscriber::fmt::layer().pretty())
            .init();
    }
}

/// Validate configuration for production deployment
fn validate_production_config(config: &config::AppConfig) -> Result<()> {
    let errors = config.production_errors();

    if config.database.url.contains("localhost") || config.database.url.contains("127.0.0.1") {
        warn!("Database URL contains localhost - ensure this is intentional for production");
    }

    if !errors.is_empty() {
        for err in &errors {
            error!("Configuration error: {}", err);
        }
        anyhow::bail!("Invalid production configuration");
    }

    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, starting graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
