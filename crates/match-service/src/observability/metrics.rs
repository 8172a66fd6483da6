//! Metrics definitions for the match service.
//!
//! All metrics follow Prometheus naming conventions:
//! - `match_` prefix
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Cardinality
//!
//! Labels are bounded to prevent cardinality explosion:
//! - `method`: 7 values max (GET, POST, PATCH, DELETE, PUT, HEAD, OPTIONS)
//! - `endpoint`: ~10 values (parameterized paths)
//! - `outcome`: matched, waiting, already_in_call, error
//! - `status`: success, error, timeout
//! - `reason`: stopped, disconnected
//!
//! User and session ids are never used as labels.

use metrics::{counter, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::time::Duration;

/// Initialize Prometheus metrics recorder and return the handle
/// for serving metrics via HTTP.
///
/// Must be called before any metrics are recorded.
///
/// # Errors
///
/// Returns error if Prometheus recorder fails to install (e.g., already installed).
pub fn init_metrics_recorder() -> Result<PrometheusHandle, String> {
    PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Prefix("match_http_request".to_string()),
            &[
                0.005, 0.010, 0.025, 0.050, 0.100, 0.150, 0.200, 0.300, 0.500, 1.000, 2.000,
            ],
        )
        .map_err(|e| format!("Failed to set HTTP request buckets: {e}"))?
        .set_buckets_for_metric(
            Matcher::Full("match_credential_issuance_duration_seconds".to_string()),
            &[0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.000, 5.000],
        )
        .map_err(|e| format!("Failed to set credential issuance buckets: {e}"))?
        // Call lengths: from "skipped immediately" to an hour-long conversation
        .set_buckets_for_metric(
            Matcher::Full("match_session_duration_seconds".to_string()),
            &[
                5.0, 15.0, 30.0, 60.0, 120.0, 300.0, 600.0, 1200.0, 1800.0, 3600.0,
            ],
        )
        .map_err(|e| format!("Failed to set session duration buckets: {e}"))?
        .install_recorder()
        .map_err(|e| format!("Failed to install Prometheus recorder: {e}"))
}

// ============================================================================
// HTTP Request Metrics
// ============================================================================

/// Record HTTP request completion
///
/// Metric: `match_http_requests_total`, `match_http_request_duration_seconds`
/// Labels: `method`, `endpoint`, `status`
pub fn record_http_request(method: &str, endpoint: &str, status_code: u16, duration: Duration) {
    let normalized_endpoint = normalize_endpoint(endpoint);
    let status = categorize_status_code(status_code);

    histogram!("match_http_request_duration_seconds",
        "method" => method.to_string(),
        "endpoint" => normalized_endpoint.clone(),
        "status" => status.to_string()
    )
    .record(duration.as_secs_f64());

    counter!("match_http_requests_total",
        "method" => method.to_string(),
        "endpoint" => normalized_endpoint,
        "status_code" => status_code.to_string()
    )
    .increment(1);
}

/// Categorize HTTP status code into success/error/timeout
fn categorize_status_code(status_code: u16) -> &'static str {
    match status_code {
        200..=299 => "success",
        408 | 504 => "timeout",
        _ => "error",
    }
}

/// Normalize endpoint path to prevent label cardinality explosion
fn normalize_endpoint(path: &str) -> String {
    match path {
        "/health"
        | "/metrics"
        | "/api/v1/match/start"
        | "/api/v1/match/status"
        | "/api/v1/match/stop"
        | "/api/v1/transport/token"
        | "/internal/v1/users" => path.to_string(),
        _ => normalize_dynamic_endpoint(path),
    }
}

/// Replace session ids with a placeholder.
fn normalize_dynamic_endpoint(path: &str) -> String {
    // /internal/v1/sessions/{session_id}/end
    let parts: Vec<&str> = path.split('/').collect();
    if parts.len() == 6
        && path.starts_with("/internal/v1/sessions/")
        && parts.last() == Some(&"end")
    {
        return "/internal/v1/sessions/{session_id}/end".to_string();
    }

    "/other".to_string()
}

// ============================================================================
// Matchmaking Metrics
// ============================================================================

/// Record the outcome of a start request
///
/// Metric: `match_requests_total`
/// Labels: `outcome`
pub fn record_match_request(outcome: &str) {
    counter!("match_requests_total",
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

/// Record a lost claim race (candidate taken by another request)
///
/// Metric: `match_claim_conflicts_total`
pub fn record_claim_conflict() {
    counter!("match_claim_conflicts_total").increment(1);
}

/// Record one credential issuance round (both participants, or a re-issue)
///
/// Metric: `match_credential_issuance_total`, `match_credential_issuance_duration_seconds`
/// Labels: `status`
pub fn record_credential_issuance(status: &str, duration: Duration) {
    histogram!("match_credential_issuance_duration_seconds",
        "status" => status.to_string()
    )
    .record(duration.as_secs_f64());

    counter!("match_credential_issuance_total",
        "status" => status.to_string()
    )
    .increment(1);
}

/// Record a session ending
///
/// Metric: `match_sessions_ended_total`, `match_session_duration_seconds`
/// Labels: `reason`
pub fn record_session_ended(reason: &str, duration_seconds: i64) {
    counter!("match_sessions_ended_total",
        "reason" => reason.to_string()
    )
    .increment(1);

    #[allow(clippy::cast_precision_loss)]
    histogram!("match_session_duration_seconds").record(duration_seconds.max(0) as f64);
}

/// Record users dropped from the pool by the searching expiry task
///
/// Metric: `match_searching_expired_total`
pub fn record_searching_expired(count: u64) {
    counter!("match_searching_expired_total").increment(count);
}

// ============================================================================
// Tests
// ============================================================================
