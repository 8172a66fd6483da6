//! Match service
//!
//! Entry point for the anonymous conversation-partner matchmaking service.

use match_service::config::Config;
use match_service::observability::metrics::init_metrics_recorder;
use match_service::repositories::{InMemoryMatchStore, MatchStore, PgMatchStore};
use match_service::routes::{self, AppState};
use match_service::services::{LiveKitTokenIssuer, Matchmaker};
use match_service::tasks::{start_searching_expiry, SearchingExpiryConfig};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "match_service=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting match service");

    let config = Config::from_env().map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;

    info!(
        region = %config.region,
        bind_address = %config.bind_address,
        jwt_clock_skew_seconds = config.jwt_clock_skew_seconds,
        credential_timeout_ms = config.credential_timeout_ms,
        search_ttl_seconds = ?config.search_ttl_seconds,
        "Configuration loaded successfully"
    );

    let metrics_handle = init_metrics_recorder().map_err(|e| {
        error!("Failed to initialize metrics recorder: {}", e);
        e
    })?;

    let store: Arc<dyn MatchStore> = match &config.database_url {
        Some(database_url) => {
            info!("Connecting to database...");
            let pool = sqlx::postgres::PgPoolOptions::new()
                .max_connections(20)
                .min_connections(2)
                .acquire_timeout(Duration::from_secs(5))
                .idle_timeout(Duration::from_secs(600))
                .max_lifetime(Duration::from_secs(1800))
                .connect(&add_query_timeout(database_url, 5))
                .await
                .map_err(|e| {
                    error!("Failed to connect to database: {}", e);
                    e
                })?;

            sqlx::migrate!("../../migrations")
                .run(&pool)
                .await
                .map_err(|e| {
                    error!("Failed to run migrations: {}", e);
                    e
                })?;

            info!("Database connection established");
            Arc::new(PgMatchStore::new(pool))
        }
        None => {
            warn!("DATABASE_URL not set, using in-memory store (state is lost on restart)");
            Arc::new(InMemoryMatchStore::new())
        }
    };

    let issuer = Arc::new(LiveKitTokenIssuer::new(
        config.livekit_api_key.clone(),
        config.livekit_api_secret.clone(),
        config.livekit_url.clone(),
        Duration::from_secs(config.credential_ttl_seconds),
    ));

    let matchmaker = Arc::new(Matchmaker::new(
        store,
        issuer,
        config.credential_timeout(),
    ));

    let cancel_token = CancellationToken::new();
    let expiry_handle = config.search_ttl_seconds.map(|ttl| {
        tokio::spawn(start_searching_expiry(
            matchmaker.clone(),
            SearchingExpiryConfig {
                ttl: Duration::from_secs(ttl),
                interval: Duration::from_secs(config.search_expiry_interval_seconds),
            },
            cancel_token.clone(),
        ))
    });

    let addr: SocketAddr = config.bind_address.parse().map_err(|e| {
        error!("Invalid bind address: {}", e);
        e
    })?;
    let drain = Duration::from_secs(config.drain_seconds);

    let state = Arc::new(AppState { config, matchmaker });
    let app = routes::build_routes(state, metrics_handle);

    info!("Match service listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal(drain))
    .await?;

    cancel_token.cancel();
    if let Some(handle) = expiry_handle {
        if let Err(e) = handle.await {
            warn!("Searching expiry task ended abnormally: {}", e);
        }
    }

    info!("Match service shutdown complete");

    Ok(())
}

/// Listens for shutdown signals (SIGTERM, SIGINT).
/// Returns when a shutdown signal is received and the drain period is complete.
async fn shutdown_signal(drain: Duration) {
    let ctrl_c = async {
        match signal::ctrl_c().await {
            Ok(()) => info!("Received SIGINT, starting graceful shutdown..."),
            Err(e) => error!("Failed to listen for SIGINT: {}", e),
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
                info!("Received SIGTERM, starting graceful shutdown...");
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    if drain.is_zero() {
        info!("Skipping drain period (MATCH_DRAIN_SECONDS=0)");
    } else {
        warn!("Draining connections for {} seconds...", drain.as_secs());
        tokio::time::sleep(drain).await;
        info!("Drain period complete");
    }
}

/// Adds statement_timeout to the database URL.
fn add_query_timeout(url: &str, timeout_secs: u32) -> String {
    let separator = if url.contains('?') { '&' } else { '?' };
    format!(
        "{}{}options=-c%20statement_timeout%3D{}s",
        url, separator, timeout_secs
    )
}
