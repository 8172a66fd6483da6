//! Internal handlers called by other services.
//!
//! - `POST /internal/v1/users` - Register or update a user's presence
//!   (scope `presence:write`, called by the auth service after signup/login)
//! - `POST /internal/v1/sessions/:session_id/end` - Transport disconnect
//!   signal (scope `session:end`)

use crate::auth::{Claims, SCOPE_PRESENCE_WRITE, SCOPE_SESSION_END};
use crate::errors::MatchError;
use crate::middleware::require_scope;
use crate::models::{
    OkResponse, PresenceResponse, RegisterUserRequest, UserProfile, DEFAULT_LANGUAGE,
    MAX_HANDLE_LENGTH, MAX_USER_ID_LENGTH,
};
use crate::routes::AppState;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Extension, Json,
};
use common::types::{SessionId, UserId};
use std::sync::Arc;
use tracing::instrument;

/// Handler for POST /internal/v1/users
///
/// Creates the presence on first call; later calls update display fields and
/// the heartbeat without touching matchmaking state.
#[instrument(skip_all, name = "match.handlers.register_user")]
pub async fn register_user(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<Claims>,
    Json(request): Json<RegisterUserRequest>,
) -> Result<(StatusCode, Json<PresenceResponse>), MatchError> {
    require_scope(&claims, SCOPE_PRESENCE_WRITE)?;

    let profile = validate_registration(request)?;
    let presence = state.matchmaker.register_user(profile).await?;

    Ok((StatusCode::CREATED, Json(presence.into())))
}

/// Handler for POST /internal/v1/sessions/:session_id/end
///
/// Idempotent; unknown sessions answer `{"ok":true}` too.
#[instrument(skip_all, name = "match.handlers.end_session")]
pub async fn end_session(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<Claims>,
    Path(session_id): Path<String>,
) -> Result<Json<OkResponse>, MatchError> {
    require_scope(&claims, SCOPE_SESSION_END)?;

    state
        .matchmaker
        .end_session_by_id(&SessionId::from(session_id.as_str()))
        .await?;

    Ok(Json(OkResponse::ok()))
}

fn validate_registration(request: RegisterUserRequest) -> Result<UserProfile, MatchError> {
    let user_id = request.user_id.trim();
    let handle = request.handle.trim();

    if user_id.is_empty() || user_id.len() > MAX_USER_ID_LENGTH {
        return Err(MatchError::BadRequest("Invalid userId".to_string()));
    }
    if handle.is_empty() || handle.chars().count() > MAX_HANDLE_LENGTH {
        return Err(MatchError::BadRequest("Invalid handle".to_string()));
    }

    let language = |value: Option<String>| {
        value
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| DEFAULT_LANGUAGE.to_string())
    };

    Ok(UserProfile {
        user_id: UserId::from(user_id),
        handle: handle.to_string(),
        native_language: language(request.native_language),
        learning_language: language(request.learning_language),
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn request(user_id: &str, handle: &str) -> RegisterUserRequest {
        RegisterUserRequest {
            user_id: user_id.to_string(),
            handle: handle.to_string(),
            native_language: None,
            learning_language: None,
        }
    }

    #[test]
    fn test_languages_default_when_absent_or_blank() {
        let mut req = request("u1", "Ana");
        req.learning_language = Some("  ".to_string());
        let profile = validate_registration(req).unwrap();

        assert_eq!(profile.native_language, DEFAULT_LANGUAGE);
        assert_eq!(profile.learning_language, DEFAULT_LANGUAGE);
    }

    #[test]
    fn test_values_are_trimmed() {
        let mut req = request(" u1 ", " Ana ");
        req.native_language = Some(" Spanish ".to_string());
        let profile = validate_registration(req).unwrap();

        assert_eq!(profile.user_id, UserId::from("u1"));
        assert_eq!(profile.handle, "Ana");
        assert_eq!(profile.native_language, "Spanish");
    }

    #[test]
    fn test_invalid_registrations_rejected() {
        assert!(validate_registration(request("", "Ana")).is_err());
        assert!(validate_registration(request("u1", "   ")).is_err());
        assert!(validate_registration(request("u1", &"x".repeat(MAX_HANDLE_LENGTH + 1))).is_err());
        assert!(
            validate_registration(request(&"u".repeat(MAX_USER_ID_LENGTH + 1), "Ana")).is_err()
        );
    }
}
