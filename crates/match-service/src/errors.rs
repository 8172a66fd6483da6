//! Match service error types.
//!
//! All errors map to HTTP status codes via the `IntoResponse` impl.
//! Messages returned to clients are generic; the underlying cause is
//! logged server-side.

use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Match service error type.
///
/// Maps to HTTP status codes:
/// - Database, Internal: 500 Internal Server Error
/// - InvalidToken: 401 Unauthorized
/// - Forbidden: 403 Forbidden
/// - NotFound: 404 Not Found
/// - AlreadyInCall: 409 Conflict
/// - BadRequest: 400 Bad Request
/// - CredentialIssuance, ServiceUnavailable: 503 Service Unavailable
///
/// A lost claim race is not an error; it is reported through
/// [`crate::repositories::ClaimOutcome`] and retried internally.
#[derive(Debug, Error)]
pub enum MatchError {
    /// Caller is bound to a session and must stop it first.
    #[error("User is already in a call")]
    AlreadyInCall,

    /// The transport credential could not be minted after a claim.
    /// The claim has been rolled back; the request is retryable.
    #[error("Credential issuance failed: {0}")]
    CredentialIssuance(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Invalid token: {0}")]
    InvalidToken(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("Internal server error")]
    Internal,
}

impl MatchError {
    /// Returns the HTTP status code for this error (for metrics recording).
    pub fn status_code(&self) -> u16 {
        match self {
            MatchError::Database(_) | MatchError::Internal => 500,
            MatchError::InvalidToken(_) => 401,
            MatchError::Forbidden(_) => 403,
            MatchError::NotFound(_) => 404,
            MatchError::AlreadyInCall => 409,
            MatchError::BadRequest(_) => 400,
            MatchError::CredentialIssuance(_) | MatchError::ServiceUnavailable(_) => 503,
        }
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

impl IntoResponse for MatchError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            MatchError::AlreadyInCall => (
                StatusCode::CONFLICT,
                "ALREADY_IN_CALL",
                "Already in a call. Stop the current call first.".to_string(),
            ),
            MatchError::CredentialIssuance(reason) => {
                tracing::warn!(target: "match.transport", reason = %reason, "Credential issuance failed");
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "CREDENTIAL_ISSUANCE_FAILED",
                    "Could not set up the call. Please try again.".to_string(),
                )
            }
            MatchError::Database(err) => {
                // Log actual error server-side, return generic message to client
                tracing::error!(target: "match.database", error = %err, "Database operation failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "DATABASE_ERROR",
                    "An internal database error occurred".to_string(),
                )
            }
            MatchError::InvalidToken(reason) => {
                (StatusCode::UNAUTHORIZED, "INVALID_TOKEN", reason.clone())
            }
            MatchError::NotFound(resource) => {
                (StatusCode::NOT_FOUND, "NOT_FOUND", resource.clone())
            }
            MatchError::Forbidden(reason) => (StatusCode::FORBIDDEN, "FORBIDDEN", reason.clone()),
            MatchError::BadRequest(reason) => {
                (StatusCode::BAD_REQUEST, "BAD_REQUEST", reason.clone())
            }
            MatchError::ServiceUnavailable(reason) => {
                tracing::warn!(target: "match.availability", reason = %reason, "Service unavailable");
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "SERVICE_UNAVAILABLE",
                    "Service temporarily unavailable".to_string(),
                )
            }
            MatchError::Internal => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                "An internal error occurred".to_string(),
            ),
        };

        let error_response = ErrorResponse {
            error: ErrorDetail {
                code: code.to_string(),
                message,
            },
        };

        let mut response = (status, Json(error_response)).into_response();

        if status == StatusCode::UNAUTHORIZED {
            response.headers_mut().insert(
                header::WWW_AUTHENTICATE,
                HeaderValue::from_static("Bearer realm=\"match-api\", error=\"invalid_token\""),
            );
        }

        if matches!(self, MatchError::CredentialIssuance(_)) {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from_static("1"));
        }

        response
    }
}

/// Convert sqlx errors to MatchError
impl From<sqlx::Error> for MatchError {
    fn from(err: sqlx::Error) -> Self {
        MatchError::Database(err.to_string())
    }
}
