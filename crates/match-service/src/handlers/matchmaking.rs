//! Matchmaking handlers.
//!
//! - `POST /api/v1/match/start` - Find a partner or join the pool
//! - `GET /api/v1/match/status` - Poll the caller's state
//! - `POST /api/v1/match/stop` - Leave the pool or end the session
//!
//! The caller is always the token subject; no handler accepts a user id
//! from the body.

use crate::auth::Claims;
use crate::errors::MatchError;
use crate::models::{MatchStatusResponse, MatchedResponse, OkResponse, WaitingResponse};
use crate::routes::AppState;
use crate::services::MatchStatus;
use axum::{extract::State, Extension, Json};
use std::sync::Arc;
use tracing::instrument;

impl From<MatchStatus> for MatchStatusResponse {
    fn from(status: MatchStatus) -> Self {
        match status {
            MatchStatus::Matched(m) => MatchStatusResponse::Matched(MatchedResponse {
                matched: true,
                session_id: m.session_id,
                credential: m.credential.token,
                expires_in: m.credential.expires_in,
                transport_endpoint: m.transport_endpoint,
                partner: m.partner,
            }),
            MatchStatus::Waiting { searching } => MatchStatusResponse::Waiting(WaitingResponse {
                matched: false,
                searching,
            }),
        }
    }
}

/// Handler for POST /api/v1/match/start
///
/// # Response
///
/// - 200 with the matched shape, or `{"matched":false,"searching":true}`
/// - 404 if the caller has no presence
/// - 409 if the caller is already in a call
/// - 503 + `Retry-After` if credentials could not be issued (claim rolled back)
#[instrument(skip_all, name = "match.handlers.start")]
pub async fn start_match(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<MatchStatusResponse>, MatchError> {
    let user_id = claims.user_id();
    let status = state.matchmaker.request_match(&user_id).await?;

    tracing::debug!(
        target: "match.handlers.matchmaking",
        user_id = %user_id,
        matched = matches!(status, MatchStatus::Matched(_)),
        "Start handled"
    );

    Ok(Json(status.into()))
}

/// Handler for GET /api/v1/match/status
#[instrument(skip_all, name = "match.handlers.status")]
pub async fn match_status(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<MatchStatusResponse>, MatchError> {
    let status = state.matchmaker.poll_status(&claims.user_id()).await?;
    Ok(Json(status.into()))
}

/// Handler for POST /api/v1/match/stop
///
/// Always `{"ok":true}` unless the store fails.
#[instrument(skip_all, name = "match.handlers.stop")]
pub async fn stop_match(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<OkResponse>, MatchError> {
    state.matchmaker.end_session(&claims.user_id()).await?;
    Ok(Json(OkResponse::ok()))
}
