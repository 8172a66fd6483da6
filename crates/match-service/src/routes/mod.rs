//! HTTP routes for the match service.
//!
//! Defines the Axum router and application state.

use crate::auth::JwtValidator;
use crate::config::Config;
use crate::handlers;
use crate::middleware::{http_metrics_middleware, require_auth, AuthState};
use crate::services::Matchmaker;
use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;
use std::time::Duration;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    /// Service configuration.
    pub config: Config,

    /// Matchmaking coordinator (owns the store and token issuer).
    pub matchmaker: Arc<Matchmaker>,
}

/// Build the application routes.
///
/// Creates an Axum router with:
/// - `/health` - Liveness + store ping - public
/// - `/metrics` - Prometheus metrics - public
/// - `/api/v1/match/{start,status,stop}` - Matchmaking (user token)
/// - `/api/v1/transport/token` - Credential re-issue (user token)
/// - `/internal/v1/users` - Presence registration (scope `presence:write`)
/// - `/internal/v1/sessions/:session_id/end` - Disconnect signal (scope `session:end`)
/// - TraceLayer, HTTP metrics middleware and a 30 second request timeout
pub fn build_routes(state: Arc<AppState>, metrics_handle: PrometheusHandle) -> Router {
    let jwt_validator = Arc::new(JwtValidator::new(
        &state.config.jwt_secret,
        state.config.jwt_clock_skew(),
    ));
    let auth_state = Arc::new(AuthState { jwt_validator });

    let public_routes = Router::new()
        .route("/health", get(handlers::health_check))
        .with_state(state.clone());

    let metrics_routes = Router::new()
        .route("/metrics", get(handlers::metrics_handler))
        .with_state(metrics_handle);

    let protected_routes = Router::new()
        .route("/api/v1/match/start", post(handlers::start_match))
        .route("/api/v1/match/status", get(handlers::match_status))
        .route("/api/v1/match/stop", post(handlers::stop_match))
        .route("/api/v1/transport/token", post(handlers::transport_token))
        .route("/internal/v1/users", post(handlers::register_user))
        .route(
            "/internal/v1/sessions/:session_id/end",
            post(handlers::end_session),
        )
        .route_layer(middleware::from_fn_with_state(auth_state, require_auth))
        .with_state(state);

    // Layer order (bottom-to-top execution):
    // 1. TimeoutLayer - Timeout the request (innermost)
    // 2. TraceLayer - Log request details
    // 3. http_metrics_middleware - Record ALL responses (outermost)
    public_routes
        .merge(metrics_routes)
        .merge(protected_routes)
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(Duration::from_secs(30)))
        .layer(middleware::from_fn(http_metrics_middleware))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::repositories::InMemoryMatchStore;
    use crate::services::token_issuer::mock::MockTokenIssuer;
    use axum::body::Body;
    use axum::http::{header, Request, StatusCode};
    use http_body_util::BodyExt;
    use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
    use metrics_exporter_prometheus::PrometheusBuilder;
    use std::collections::HashMap;
    use tower::ServiceExt;

    const SECRET: &str = "router-test-secret";

    fn app() -> Router {
        let vars: HashMap<String, String> = [
            ("JWT_SECRET", SECRET),
            ("LIVEKIT_URL", "wss://transport.test"),
            ("LIVEKIT_API_KEY", "key"),
            ("LIVEKIT_API_SECRET", "secret"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
        let config = Config::from_vars(&vars).unwrap();

        let matchmaker = Arc::new(Matchmaker::new(
            Arc::new(InMemoryMatchStore::new()),
            Arc::new(MockTokenIssuer::succeeding()),
            config.credential_timeout(),
        ));
        let handle = PrometheusBuilder::new().build_recorder().handle();

        build_routes(Arc::new(AppState { config, matchmaker }), handle)
    }

    fn bearer(sub: &str, scope: &str) -> String {
        let now = chrono::Utc::now().timestamp();
        let token = encode(
            &Header::new(Algorithm::HS256),
            &serde_json::json!({ "sub": sub, "exp": now + 600, "iat": now, "scope": scope }),
            &EncodingKey::from_secret(SECRET.as_bytes()),
        )
        .unwrap();
        format!("Bearer {token}")
    }

    async fn json_body(response: axum::response::Response) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[test]
    fn test_app_state_is_clone() {
        fn assert_clone<T: Clone>() {}
        assert_clone::<AppState>();
    }

    #[tokio::test]
    async fn test_health_is_public() {
        let response = app()
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["store"], "memory");
        assert_eq!(body["region"], "us-east-1");
    }

    #[tokio::test]
    async fn test_user_routes_require_token() {
        let response = app()
            .oneshot(
                Request::post("/api/v1/match/start")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert!(response.headers().contains_key(header::WWW_AUTHENTICATE));
    }

    #[tokio::test]
    async fn test_registration_requires_scope() {
        let body = r#"{"userId":"u1","handle":"Ana"}"#;
        let request = |scope: &str| {
            Request::post("/internal/v1/users")
                .header(header::AUTHORIZATION, bearer("auth-service", scope))
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body))
                .unwrap()
        };

        let app = app();
        let forbidden = app.clone().oneshot(request("")).await.unwrap();
        assert_eq!(forbidden.status(), StatusCode::FORBIDDEN);

        let created = app.oneshot(request("presence:write")).await.unwrap();
        assert_eq!(created.status(), StatusCode::CREATED);
        let presence = json_body(created).await;
        assert_eq!(presence["userId"], "u1");
        assert_eq!(presence["nativeLanguage"], "Not specified");
        assert_eq!(presence["searching"], false);
    }

    #[tokio::test]
    async fn test_unregistered_start_is_not_found() {
        let response = app()
            .oneshot(
                Request::post("/api/v1/match/start")
                    .header(header::AUTHORIZATION, bearer("stranger", ""))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(json_body(response).await["error"]["code"], "NOT_FOUND");
    }

    #[tokio::test]
    async fn test_status_of_unknown_user_is_idle() {
        let response = app()
            .oneshot(
                Request::get("/api/v1/match/status")
                    .header(header::AUTHORIZATION, bearer("stranger", ""))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            json_body(response).await,
            serde_json::json!({ "matched": false, "searching": false })
        );
    }
}
