//! Health check handler.

use crate::models::HealthResponse;
use crate::routes::AppState;
use axum::extract::State;
use axum::Json;
use std::sync::Arc;
use tracing::instrument;

/// Handler for GET /health
///
/// Pings the store and reports the service status. Always answers 200 so
/// orchestrators can read the body.
///
/// ## Example Response
///
/// ```json
/// {
///   "status": "healthy",
///   "region": "us-east-1",
///   "store": "postgres",
///   "database": "healthy"
/// }
/// ```
#[instrument(skip_all, name = "match.health.check")]
pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let store = state.matchmaker.store();

    let healthy = match store.ping().await {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!(target: "match.handlers.health", error = %e, "Store ping failed");
            false
        }
    };
    let status = if healthy { "healthy" } else { "unhealthy" };

    Json(HealthResponse {
        status: status.to_string(),
        region: state.config.region.clone(),
        store: store.backend().to_string(),
        database: status.to_string(),
    })
}
