//! Searching expiry background task.
//!
//! A client that gives up polling never calls stop, so its user would stay in
//! the pool forever. When a TTL is configured this task periodically clears
//! `searching` for users whose heartbeat is older than the TTL. Users in a
//! call are never touched.
//!
//! # Graceful Shutdown
//!
//! The task exits when the cancellation token is triggered.

use crate::services::Matchmaker;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};

/// Configuration for the searching expiry task.
#[derive(Debug, Clone, Copy)]
pub struct SearchingExpiryConfig {
    /// Heartbeat age after which a searching user is dropped.
    pub ttl: Duration,
    /// Time between sweeps.
    pub interval: Duration,
}

/// Start the searching expiry task.
///
/// Runs until `cancel_token` is cancelled.
#[instrument(skip_all, name = "match.task.searching_expiry")]
pub async fn start_searching_expiry(
    matchmaker: Arc<Matchmaker>,
    config: SearchingExpiryConfig,
    cancel_token: CancellationToken,
) {
    info!(
        target: "match.task.searching_expiry",
        ttl_seconds = config.ttl.as_secs(),
        interval_seconds = config.interval.as_secs(),
        "Starting searching expiry task"
    );

    let mut interval = tokio::time::interval(config.interval);

    loop {
        tokio::select! {
            _ = interval.tick() => {
                if let Err(e) = matchmaker.expire_searching(config.ttl).await {
                    // Store may recover; try again next tick
                    tracing::error!(
                        target: "match.task.searching_expiry",
                        error = %e,
                        "Failed to expire searching users"
                    );
                }
            }
            _ = cancel_token.cancelled() => {
                info!(
                    target: "match.task.searching_expiry",
                    "Searching expiry task received shutdown signal, exiting"
                );
                break;
            }
        }
    }

    info!(target: "match.task.searching_expiry", "Searching expiry task stopped");
}
