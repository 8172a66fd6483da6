//! Authentication middleware for protected routes.
//!
//! Extracts the Bearer token from the Authorization header, validates it and
//! injects the claims into request extensions.

use crate::auth::{Claims, JwtValidator};
use crate::errors::MatchError;
use axum::{
    extract::{Request, State},
    middleware::Next,
    response::IntoResponse,
};
use std::sync::Arc;
use tracing::instrument;

/// State for the authentication middleware.
#[derive(Clone)]
pub struct AuthState {
    pub jwt_validator: Arc<JwtValidator>,
}

/// Authentication middleware that validates JWT tokens.
///
/// # Authorization Header Format
///
/// ```text
/// Authorization: Bearer <token>
/// ```
///
/// # Response
///
/// - 401 Unauthorized with `WWW-Authenticate` if the token is missing or invalid
/// - Otherwise continues with `Claims` in request extensions
#[instrument(skip(state, req, next), name = "match.middleware.auth")]
pub async fn require_auth(
    State(state): State<Arc<AuthState>>,
    mut req: Request,
    next: Next,
) -> Result<impl IntoResponse, MatchError> {
    let auth_header = req
        .headers()
        .get("authorization")
        .and_then(|h| h.to_str().ok())
        .ok_or_else(|| {
            tracing::debug!(target: "match.middleware.auth", "Missing Authorization header");
            MatchError::InvalidToken("Missing Authorization header".to_string())
        })?;

    let token = auth_header.strip_prefix("Bearer ").ok_or_else(|| {
        tracing::debug!(target: "match.middleware.auth", "Invalid Authorization header format");
        MatchError::InvalidToken("Invalid Authorization header format".to_string())
    })?;

    let claims = state.jwt_validator.validate(token)?;
    req.extensions_mut().insert(claims);

    Ok(next.run(req).await)
}

/// Reject callers whose token lacks `scope`.
pub fn require_scope(claims: &Claims, scope: &str) -> Result<(), MatchError> {
    if claims.has_scope(scope) {
        return Ok(());
    }

    tracing::debug!(
        target: "match.middleware.auth",
        required_scope = scope,
        "Token lacks required scope"
    );
    Err(MatchError::Forbidden("Insufficient scope".to_string()))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use axum::{
        body::Body,
        http::{header, Request as HttpRequest, StatusCode},
        middleware,
        routing::get,
        Extension, Router,
    };
    use common::secret::SecretString;
    use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
    use serde_json::json;
    use std::time::Duration;
    use tower::ServiceExt;

    const SECRET: &str = "middleware-test-secret";

    async fn whoami(Extension(claims): Extension<Claims>) -> String {
        claims.sub
    }

    fn app() -> Router {
        let auth_state = Arc::new(AuthState {
            jwt_validator: Arc::new(JwtValidator::new(
                &SecretString::from(SECRET),
                Duration::from_secs(300),
            )),
        });
        Router::new()
            .route("/whoami", get(whoami))
            .route_layer(middleware::from_fn_with_state(auth_state, require_auth))
    }

    fn token(sub: &str) -> String {
        let now = chrono::Utc::now().timestamp();
        encode(
            &Header::new(Algorithm::HS256),
            &json!({ "sub": sub, "exp": now + 600, "iat": now }),
            &EncodingKey::from_secret(SECRET.as_bytes()),
        )
        .unwrap()
    }

    async fn call(authorization: Option<String>) -> axum::response::Response {
        let mut builder = HttpRequest::builder().uri("/whoami");
        if let Some(value) = authorization {
            builder = builder.header(header::AUTHORIZATION, value);
        }
        app()
            .oneshot(builder.body(Body::empty()).unwrap())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_valid_token_injects_claims() {
        let response = call(Some(format!("Bearer {}", token("user-9")))).await;
        assert_eq!(response.status(), StatusCode::OK);

        let body = http_body_util::BodyExt::collect(response.into_body())
            .await
            .unwrap()
            .to_bytes();
        assert_eq!(&body[..], b"user-9");
    }

    #[tokio::test]
    async fn test_missing_header_is_unauthorized() {
        let response = call(None).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert!(response.headers().contains_key(header::WWW_AUTHENTICATE));
    }

    #[tokio::test]
    async fn test_non_bearer_scheme_is_unauthorized() {
        let response = call(Some(format!("Basic {}", token("user-9")))).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn test_require_scope() {
        let claims = Claims {
            sub: "svc".to_string(),
            exp: 0,
            iat: 0,
            scope: "presence:write".to_string(),
        };

        assert!(require_scope(&claims, "presence:write").is_ok());
        assert!(matches!(
            require_scope(&claims, "session:end"),
            Err(MatchError::Forbidden(_))
        ));
    }
}
