//! Transport credential issuer.
//!
//! Mints short-lived join tokens for the real-time transport provider. The
//! production issuer signs LiveKit-compatible access tokens locally (HS256
//! with the provider API secret), so issuance has no network dependency;
//! the trait keeps the seam for providers that do need a round-trip.
//!
//! # Security
//!
//! - The API secret is held as a `SecretString` and never logged
//! - Credentials are redacted in Debug output
//! - A credential grants access to exactly one room for one identity

use crate::errors::MatchError;
use common::secret::{ExposeSecret, SecretString};
use common::types::SessionId;
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tracing::instrument;
use uuid::Uuid;

/// A signed join credential for one identity in one room.
#[derive(Clone)]
pub struct Credential {
    /// Opaque signed token handed to the client.
    pub token: String,
    /// Lifetime in seconds.
    pub expires_in: u64,
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("token", &"[REDACTED]")
            .field("expires_in", &self.expires_in)
            .finish()
    }
}

/// Room permissions carried in the `video` claim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoGrant {
    pub room_join: bool,
    pub room: String,
    pub can_publish: bool,
    pub can_subscribe: bool,
    pub can_publish_data: bool,
}

/// Access token claims understood by the transport provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportClaims {
    /// API key that signed the token.
    pub iss: String,
    /// Participant identity (the user's handle).
    pub sub: String,
    /// Display name shown to the other participant.
    pub name: String,
    pub nbf: i64,
    pub exp: i64,
    pub jti: String,
    pub video: VideoGrant,
}

/// Issues transport credentials (enables mocking).
#[async_trait::async_trait]
pub trait TokenIssuer: Send + Sync {
    /// Mint a credential for `identity` in the room named by `session_id`.
    /// Safe to call repeatedly; every call returns a fresh credential.
    async fn issue_credential(
        &self,
        session_id: &SessionId,
        identity: &str,
    ) -> Result<Credential, MatchError>;

    /// Endpoint clients connect to with the credential.
    fn transport_endpoint(&self) -> &str;
}

/// LiveKit access token issuer.
pub struct LiveKitTokenIssuer {
    api_key: String,
    api_secret: SecretString,
    endpoint: String,
    ttl: Duration,
}

impl LiveKitTokenIssuer {
    /// Create an issuer.
    ///
    /// # Arguments
    ///
    /// * `api_key` - Provider API key, placed in `iss`
    /// * `api_secret` - Provider API secret used as the HS256 key
    /// * `endpoint` - Transport URL returned to clients
    /// * `ttl` - Credential lifetime
    pub fn new(api_key: String, api_secret: SecretString, endpoint: String, ttl: Duration) -> Self {
        Self {
            api_key,
            api_secret,
            endpoint,
            ttl,
        }
    }

    fn claims(&self, session_id: &SessionId, identity: &str, now: i64) -> TransportClaims {
        #[allow(clippy::cast_possible_wrap)]
        let ttl_secs = self.ttl.as_secs() as i64;

        TransportClaims {
            iss: self.api_key.clone(),
            sub: identity.to_string(),
            name: identity.to_string(),
            nbf: now,
            exp: now + ttl_secs,
            jti: Uuid::new_v4().to_string(),
            video: VideoGrant {
                room_join: true,
                room: session_id.to_string(),
                can_publish: true,
                can_subscribe: true,
                can_publish_data: true,
            },
        }
    }
}

#[async_trait::async_trait]
impl TokenIssuer for LiveKitTokenIssuer {
    #[instrument(skip_all, fields(session_id = %session_id))]
    async fn issue_credential(
        &self,
        session_id: &SessionId,
        identity: &str,
    ) -> Result<Credential, MatchError> {
        let claims = self.claims(session_id, identity, chrono::Utc::now().timestamp());

        let mut header = Header::new(Algorithm::HS256);
        header.typ = Some("JWT".to_string());

        let encoding_key = EncodingKey::from_secret(self.api_secret.expose_secret().as_bytes());
        let token = encode(&header, &claims, &encoding_key).map_err(|e| {
            tracing::error!(target: "match.services.token_issuer", error = %e, "Credential signing failed");
            MatchError::CredentialIssuance("Credential signing failed".to_string())
        })?;

        Ok(Credential {
            token,
            expires_in: self.ttl.as_secs(),
        })
    }

    fn transport_endpoint(&self) -> &str {
        &self.endpoint
    }
}

/// Mock token issuer module for testing.
///
/// Used by unit tests and by the integration test harness.
pub mod mock {

    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    /// Endpoint reported by the mock.
    pub const MOCK_TRANSPORT_ENDPOINT: &str = "wss://transport.test";

    /// Lifetime reported for mock credentials.
    pub const MOCK_CREDENTIAL_TTL_SECONDS: u64 = 7200;

    /// Mock token issuer.
    ///
    /// Tokens have the form `mock:<session_id>:<identity>` so tests can check
    /// who a credential was minted for.
    pub struct MockTokenIssuer {
        failing: AtomicBool,
        delay: Option<Duration>,
        call_count: AtomicUsize,
    }

    impl MockTokenIssuer {
        /// Create a mock that always succeeds.
        pub fn succeeding() -> Self {
            Self {
                failing: AtomicBool::new(false),
                delay: None,
                call_count: AtomicUsize::new(0),
            }
        }

        /// Create a mock that always fails.
        pub fn failing() -> Self {
            let mock = Self::succeeding();
            mock.set_failing(true);
            mock
        }

        /// Create a mock that sleeps before answering.
        pub fn slow(delay: Duration) -> Self {
            Self {
                delay: Some(delay),
                ..Self::succeeding()
            }
        }

        /// Switch between failing and succeeding.
        pub fn set_failing(&self, failing: bool) {
            self.failing.store(failing, Ordering::SeqCst);
        }

        /// Get the number of calls made.
        pub fn call_count(&self) -> usize {
            self.call_count.load(Ordering::SeqCst)
        }
    }

    #[async_trait::async_trait]
    impl TokenIssuer for MockTokenIssuer {
        async fn issue_credential(
            &self,
            session_id: &SessionId,
            identity: &str,
        ) -> Result<Credential, MatchError> {
            self.call_count.fetch_add(1, Ordering::SeqCst);

            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }

            if self.failing.load(Ordering::SeqCst) {
                return Err(MatchError::CredentialIssuance(
                    "Mock token issuer error".to_string(),
                ));
            }

            Ok(Credential {
                token: format!("mock:{session_id}:{identity}"),
                expires_in: MOCK_CREDENTIAL_TTL_SECONDS,
            })
        }

        fn transport_endpoint(&self) -> &str {
            MOCK_TRANSPORT_ENDPOINT
        }
    }

    #[cfg(test)]
    #[allow(clippy::unwrap_used, clippy::expect_used)]
    mod tests {
        use super::*;

        #[tokio::test]
        async fn test_mock_succeeding() {
            let mock = MockTokenIssuer::succeeding();
            let credential = mock
                .issue_credential(&SessionId::from("room_1"), "ana")
                .await
                .unwrap();

            assert_eq!(credential.token, "mock:room_1:ana");
            assert_eq!(mock.call_count(), 1);
        }

        #[tokio::test]
        async fn test_mock_failing_can_recover() {
            let mock = MockTokenIssuer::failing();
            let sid = SessionId::from("room_1");

            assert!(matches!(
                mock.issue_credential(&sid, "ana").await,
                Err(MatchError::CredentialIssuance(_))
            ));

            mock.set_failing(false);
            assert!(mock.issue_credential(&sid, "ana").await.is_ok());
            assert_eq!(mock.call_count(), 2);
        }

        #[tokio::test]
        async fn test_mock_slow_waits() {
            let mock = MockTokenIssuer::slow(Duration::from_millis(50));
            let started = std::time::Instant::now();

            mock.issue_credential(&SessionId::from("room_1"), "ana")
                .await
                .unwrap();

            assert!(started.elapsed() >= Duration::from_millis(50));
        }
    }
}
