//! Transport credential handler.
//!
//! `POST /api/v1/transport/token` re-issues a credential for the session the
//! caller currently belongs to, e.g. after a client reconnect.

use crate::auth::Claims;
use crate::errors::MatchError;
use crate::models::{TransportTokenRequest, TransportTokenResponse};
use crate::routes::AppState;
use axum::{extract::State, Extension, Json};
use std::sync::Arc;
use tracing::instrument;

/// Handler for POST /api/v1/transport/token
///
/// # Response
///
/// - 200 with a fresh credential
/// - 403 if the caller is not a participant of an active `sessionId`
/// - 503 if issuance failed
#[instrument(skip_all, name = "match.handlers.transport_token")]
pub async fn transport_token(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<Claims>,
    Json(request): Json<TransportTokenRequest>,
) -> Result<Json<TransportTokenResponse>, MatchError> {
    let issued = state
        .matchmaker
        .refresh_credential(&claims.user_id(), &request.session_id)
        .await?;

    Ok(Json(TransportTokenResponse {
        credential: issued.credential.token,
        expires_in: issued.credential.expires_in,
        transport_endpoint: issued.transport_endpoint,
        session_id: issued.session_id,
    }))
}
