//! Test server harness for E2E testing
//!
//! Provides `TestMatchServer` for spawning real match service instances in
//! tests. Each server has its own in-memory store unless one is supplied.

use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use match_service::config::Config;
use match_service::repositories::{InMemoryMatchStore, MatchStore};
use match_service::routes::{self, AppState};
use match_service::services::token_issuer::mock::MockTokenIssuer;
use match_service::services::{Matchmaker, TokenIssuer};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::task::JoinHandle;

/// HS256 secret the test server accepts user tokens for.
pub const TEST_JWT_SECRET: &str = "match-test-utils-jwt-secret";

/// Region reported by `/health` on test servers.
pub const TEST_REGION: &str = "test-region";

/// Scopes of the token returned by [`TestMatchServer::service_token`].
pub const INTERNAL_SCOPES: &str = "presence:write session:end";

/// Test harness for spawning the match service in E2E tests.
pub struct TestMatchServer {
    addr: SocketAddr,
    config: Config,
    store: Arc<dyn MatchStore>,
    client: reqwest::Client,
    handle: JoinHandle<()>,
}

impl TestMatchServer {
    /// Spawn a server with an in-memory store and an always-succeeding
    /// mock token issuer.
    pub async fn spawn() -> Result<Self, anyhow::Error> {
        Self::spawn_with_issuer(Arc::new(MockTokenIssuer::succeeding())).await
    }

    /// Spawn a server with an in-memory store and the given issuer.
    pub async fn spawn_with_issuer(issuer: Arc<dyn TokenIssuer>) -> Result<Self, anyhow::Error> {
        Self::spawn_with(Arc::new(InMemoryMatchStore::new()), issuer).await
    }

    /// Spawn a server on top of an arbitrary store and issuer.
    ///
    /// The server will:
    /// - Bind to a random available port (127.0.0.1:0)
    /// - Start the HTTP server in the background
    pub async fn spawn_with(
        store: Arc<dyn MatchStore>,
        issuer: Arc<dyn TokenIssuer>,
    ) -> Result<Self, anyhow::Error> {
        let vars = HashMap::from([
            ("BIND_ADDRESS".to_string(), "127.0.0.1:0".to_string()),
            ("MATCH_REGION".to_string(), TEST_REGION.to_string()),
            ("JWT_SECRET".to_string(), TEST_JWT_SECRET.to_string()),
            ("LIVEKIT_URL".to_string(), "wss://transport.test".to_string()),
            ("LIVEKIT_API_KEY".to_string(), "test-api-key".to_string()),
            ("LIVEKIT_API_SECRET".to_string(), "test-api-secret".to_string()),
            ("CREDENTIAL_TIMEOUT_MS".to_string(), "500".to_string()),
        ]);

        let config = Config::from_vars(&vars)
            .map_err(|e| anyhow::anyhow!("Failed to create config: {}", e))?;

        let matchmaker = Arc::new(Matchmaker::new(
            store.clone(),
            issuer,
            config.credential_timeout(),
        ));
        let state = Arc::new(AppState {
            config: config.clone(),
            matchmaker,
        });

        let metrics_handle = PrometheusBuilder::new().build_recorder().handle();
        let app = routes::build_routes(state, metrics_handle);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .map_err(|e| anyhow::anyhow!("Failed to bind test server: {}", e))?;

        let addr = listener
            .local_addr()
            .map_err(|e| anyhow::anyhow!("Failed to get local address: {}", e))?;

        let handle = tokio::spawn(async move {
            let make_service = app.into_make_service_with_connect_info::<SocketAddr>();
            if let Err(e) = axum::serve(listener, make_service).await {
                eprintln!("Test server error: {}", e);
            }
        });

        Ok(Self {
            addr,
            config,
            store,
            client: reqwest::Client::new(),
            handle,
        })
    }

    /// Get the base URL of the test server.
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Direct access to the server's store for assertions.
    pub fn store(&self) -> &Arc<dyn MatchStore> {
        &self.store
    }

    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }

    /// Mint a user access token (no scopes) for `user_id`.
    pub fn user_token(&self, user_id: &str) -> String {
        mint_token(user_id, "")
    }

    /// Mint an internal token carrying [`INTERNAL_SCOPES`].
    pub fn service_token(&self) -> String {
        mint_token("auth-service", INTERNAL_SCOPES)
    }

    /// Register `user_id` through the internal API.
    pub async fn register_user(&self, user_id: &str, handle: &str) -> Result<(), anyhow::Error> {
        let response = self
            .client
            .post(format!("{}/internal/v1/users", self.url()))
            .bearer_auth(self.service_token())
            .json(&serde_json::json!({
                "userId": user_id,
                "handle": handle,
                "nativeLanguage": format!("{handle}-native"),
                "learningLanguage": format!("{handle}-learning"),
            }))
            .send()
            .await?;

        anyhow::ensure!(
            response.status() == reqwest::StatusCode::CREATED,
            "registration of {user_id} failed with {}",
            response.status()
        );
        Ok(())
    }

    /// POST an empty body to a user route.
    pub async fn post_as(&self, user_id: &str, path: &str) -> Result<reqwest::Response, anyhow::Error> {
        Ok(self
            .client
            .post(format!("{}{}", self.url(), path))
            .bearer_auth(self.user_token(user_id))
            .send()
            .await?)
    }

    /// GET a user route.
    pub async fn get_as(&self, user_id: &str, path: &str) -> Result<reqwest::Response, anyhow::Error> {
        Ok(self
            .client
            .get(format!("{}{}", self.url(), path))
            .bearer_auth(self.user_token(user_id))
            .send()
            .await?)
    }
}

impl Drop for TestMatchServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Mint an HS256 token accepted by test servers.
pub fn mint_token(sub: &str, scope: &str) -> String {
    let now = chrono::Utc::now().timestamp();
    let claims = serde_json::json!({
        "sub": sub,
        "iat": now,
        "exp": now + 3600,
        "scope": scope,
    });

    encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(TEST_JWT_SECRET.as_bytes()),
    )
    .expect("HS256 encoding with a static secret cannot fail")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_server_spawns_successfully() -> Result<(), anyhow::Error> {
        let server = TestMatchServer::spawn().await?;
        assert!(server.url().starts_with("http://127.0.0.1:"));

        let response = reqwest::get(format!("{}/health", server.url())).await?;
        assert_eq!(response.status(), 200);

        let body: serde_json::Value = response.json().await?;
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["region"], TEST_REGION);
        assert_eq!(body["store"], "memory");

        Ok(())
    }

    #[tokio::test]
    async fn test_register_user_creates_presence() -> Result<(), anyhow::Error> {
        let server = TestMatchServer::spawn().await?;
        server.register_user("u1", "Ana").await?;

        let presence = server
            .store()
            .get_user(&common::types::UserId::from("u1"))
            .await
            .map_err(|e| anyhow::anyhow!("{e}"))?
            .expect("registered");
        assert_eq!(presence.handle, "Ana");
        assert_eq!(presence.native_language, "Ana-native");

        Ok(())
    }

    #[tokio::test]
    async fn test_multiple_servers_different_ports() -> Result<(), anyhow::Error> {
        let server1 = TestMatchServer::spawn().await?;
        let server2 = TestMatchServer::spawn().await?;

        assert_ne!(server1.addr(), server2.addr());
        Ok(())
    }
}
