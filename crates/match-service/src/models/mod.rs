//! Match service models.
//!
//! Domain types shared by the store, the matchmaker and the HTTP layer,
//! plus the request/response bodies of the public API.

use chrono::{DateTime, Utc};
use common::types::{SessionId, UserId};
use serde::{Deserialize, Serialize};

/// Profile value used when a language was not provided at registration.
pub const DEFAULT_LANGUAGE: &str = "Not specified";

/// Maximum handle length accepted at registration.
pub const MAX_HANDLE_LENGTH: usize = 64;

/// Maximum user id length accepted at registration.
pub const MAX_USER_ID_LENGTH: usize = 128;

/// Session lifecycle status.
///
/// `Waiting` is part of the persisted vocabulary but no code path creates
/// a session in that state: sessions are born `Active` by a successful
/// claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Waiting,
    Active,
    Ended,
}

impl SessionStatus {
    /// Returns the string representation of the status.
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Waiting => "waiting",
            SessionStatus::Active => "active",
            SessionStatus::Ended => "ended",
        }
    }

    /// Parse the persisted representation.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "waiting" => Some(SessionStatus::Waiting),
            "active" => Some(SessionStatus::Active),
            "ended" => Some(SessionStatus::Ended),
            _ => None,
        }
    }
}

/// Display fields supplied when a user is registered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserProfile {
    pub user_id: UserId,
    pub handle: String,
    pub native_language: String,
    pub learning_language: String,
}

/// Matchmaking state of one registered user.
///
/// Invariants held by every store implementation:
/// - `in_call` implies `current_session_id` is set, and vice versa
/// - `searching` and `in_call` are never both true
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserPresence {
    pub user_id: UserId,
    pub handle: String,
    pub native_language: String,
    pub learning_language: String,
    pub searching: bool,
    pub in_call: bool,
    pub current_session_id: Option<SessionId>,
    /// When the user entered the pool; drives oldest-first pairing.
    pub searching_since: Option<DateTime<Utc>>,
    pub total_calls: i64,
    pub last_seen_at: DateTime<Utc>,
}

impl UserPresence {
    /// A freshly registered, idle user.
    pub fn new(profile: UserProfile, now: DateTime<Utc>) -> Self {
        Self {
            user_id: profile.user_id,
            handle: profile.handle,
            native_language: profile.native_language,
            learning_language: profile.learning_language,
            searching: false,
            in_call: false,
            current_session_id: None,
            searching_since: None,
            total_calls: 0,
            last_seen_at: now,
        }
    }

    /// Waiting in the pool and available for a claim.
    pub fn is_available(&self) -> bool {
        self.searching && !self.in_call
    }

    /// Whether this user is currently bound to `session_id`.
    pub fn is_bound_to(&self, session_id: &SessionId) -> bool {
        self.in_call && self.current_session_id.as_ref() == Some(session_id)
    }

    /// Back to idle: not searching, not in a call.
    pub fn reset(&mut self) {
        self.searching = false;
        self.in_call = false;
        self.current_session_id = None;
        self.searching_since = None;
    }

    /// Bind to a session as part of a claim.
    pub fn bind(&mut self, session_id: &SessionId) {
        self.searching = false;
        self.searching_since = None;
        self.in_call = true;
        self.current_session_id = Some(session_id.clone());
    }

    /// Partner metadata as shown to the other participant.
    pub fn partner_info(&self) -> PartnerInfo {
        PartnerInfo {
            handle: self.handle.clone(),
            native_language: self.native_language.clone(),
            learning_language: self.learning_language.clone(),
        }
    }
}

/// One side of a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Participant {
    pub user_id: UserId,
    pub handle: String,
    pub joined_at: DateTime<Utc>,
}

/// A paired conversation. Always exactly two participants, initiator first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub session_id: SessionId,
    pub participants: [Participant; 2],
    pub status: SessionStatus,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    /// Whole seconds between start and end; zero until ended.
    pub duration_seconds: i64,
}

impl Session {
    /// A new active session between `initiator` and `candidate`.
    pub fn new_active(
        session_id: SessionId,
        initiator: &UserPresence,
        candidate: &UserPresence,
        now: DateTime<Utc>,
    ) -> Self {
        let participant = |presence: &UserPresence| Participant {
            user_id: presence.user_id.clone(),
            handle: presence.handle.clone(),
            joined_at: now,
        };

        Self {
            session_id,
            participants: [participant(initiator), participant(candidate)],
            status: SessionStatus::Active,
            started_at: now,
            ended_at: None,
            duration_seconds: 0,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == SessionStatus::Active
    }

    pub fn includes(&self, user_id: &UserId) -> bool {
        self.participants.iter().any(|p| &p.user_id == user_id)
    }

    /// The other participant, if `user_id` is one of the two.
    pub fn partner_of(&self, user_id: &UserId) -> Option<&Participant> {
        if !self.includes(user_id) {
            return None;
        }
        self.participants.iter().find(|p| &p.user_id != user_id)
    }

    /// Transition `active -> ended`. Returns false if not active.
    pub fn end(&mut self, now: DateTime<Utc>) -> bool {
        if !self.is_active() {
            return false;
        }
        self.status = SessionStatus::Ended;
        self.ended_at = Some(now);
        self.duration_seconds = (now - self.started_at).num_seconds().max(0);
        true
    }
}

// ============================================================================
// API Models
// ============================================================================

/// Partner metadata returned alongside a match.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartnerInfo {
    pub handle: String,
    pub native_language: String,
    pub learning_language: String,
}

/// Body of a matched start/status response.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchedResponse {
    /// Always true.
    pub matched: bool,
    pub session_id: SessionId,
    pub credential: String,
    /// Credential lifetime in seconds.
    pub expires_in: u64,
    pub transport_endpoint: String,
    pub partner: PartnerInfo,
}

/// Body of an unmatched start/status response.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WaitingResponse {
    /// Always false.
    pub matched: bool,
    pub searching: bool,
}

/// Response of `POST /api/v1/match/start` and `GET /api/v1/match/status`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MatchStatusResponse {
    Matched(MatchedResponse),
    Waiting(WaitingResponse),
}

/// Generic acknowledgement (`{"ok": true}`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OkResponse {
    pub ok: bool,
}

impl OkResponse {
    pub fn ok() -> Self {
        Self { ok: true }
    }
}

/// Request body of `POST /api/v1/transport/token`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransportTokenRequest {
    pub session_id: SessionId,
}

/// Response of `POST /api/v1/transport/token`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransportTokenResponse {
    pub credential: String,
    pub expires_in: u64,
    pub transport_endpoint: String,
    pub session_id: SessionId,
}

/// Request body of `POST /internal/v1/users`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterUserRequest {
    pub user_id: String,
    pub handle: String,
    #[serde(default)]
    pub native_language: Option<String>,
    #[serde(default)]
    pub learning_language: Option<String>,
}

/// Presence as reported by the registration endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceResponse {
    pub user_id: UserId,
    pub handle: String,
    pub native_language: String,
    pub learning_language: String,
    pub searching: bool,
    pub in_call: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_session_id: Option<SessionId>,
    pub total_calls: i64,
    pub last_seen_at: DateTime<Utc>,
}

impl From<UserPresence> for PresenceResponse {
    fn from(presence: UserPresence) -> Self {
        Self {
            user_id: presence.user_id,
            handle: presence.handle,
            native_language: presence.native_language,
            learning_language: presence.learning_language,
            searching: presence.searching,
            in_call: presence.in_call,
            current_session_id: presence.current_session_id,
            total_calls: presence.total_calls,
            last_seen_at: presence.last_seen_at,
        }
    }
}

/// Health check response.
///
/// Returned by the `/health` endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Service health status ("healthy" or "unhealthy").
    pub status: String,

    /// Deployment region.
    pub region: String,

    /// Store backend ("memory" or "postgres").
    pub store: String,

    /// Store connectivity status.
    pub database: String,
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn presence(id: &str) -> UserPresence {
        UserPresence::new(
            UserProfile {
                user_id: UserId::from(id),
                handle: format!("{id}-handle"),
                native_language: "English".to_string(),
                learning_language: "Spanish".to_string(),
            },
            Utc::now(),
        )
    }

    #[test]
    fn test_session_status_round_trip() {
        for status in [
            SessionStatus::Waiting,
            SessionStatus::Active,
            SessionStatus::Ended,
        ] {
            assert_eq!(SessionStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(SessionStatus::parse("paused"), None);
    }

    #[test]
    fn test_new_presence_is_idle() {
        let p = presence("alice");
        assert!(!p.searching);
        assert!(!p.in_call);
        assert!(p.current_session_id.is_none());
        assert_eq!(p.total_calls, 0);
    }

    #[test]
    fn test_bind_and_reset_keep_invariants() {
        let mut p = presence("alice");
        p.searching = true;
        p.searching_since = Some(Utc::now());

        let sid = SessionId::from("room_1");
        p.bind(&sid);
        assert!(p.in_call && !p.searching);
        assert!(p.is_bound_to(&sid));
        assert!(!p.is_bound_to(&SessionId::from("room_2")));

        p.reset();
        assert!(!p.in_call && !p.searching);
        assert!(p.current_session_id.is_none());
        assert!(!p.is_bound_to(&sid));
    }

    #[test]
    fn test_session_partner_lookup() {
        let a = presence("alice");
        let b = presence("bob");
        let session = Session::new_active(SessionId::generate(), &a, &b, Utc::now());

        assert_eq!(
            session.partner_of(&a.user_id).unwrap().user_id,
            b.user_id
        );
        assert_eq!(
            session.partner_of(&b.user_id).unwrap().user_id,
            a.user_id
        );
        assert!(session.partner_of(&UserId::from("carol")).is_none());
        assert_eq!(session.participants[0].user_id, a.user_id);
    }

    #[test]
    fn test_session_end_is_once_and_floors_duration() {
        let a = presence("alice");
        let b = presence("bob");
        let started = Utc::now();
        let mut session = Session::new_active(SessionId::generate(), &a, &b, started);

        let ended = started + Duration::milliseconds(61_900);
        assert!(session.end(ended));
        assert_eq!(session.status, SessionStatus::Ended);
        assert_eq!(session.duration_seconds, 61);
        assert_eq!(session.ended_at, Some(ended));

        assert!(!session.end(ended + Duration::seconds(30)));
        assert_eq!(session.duration_seconds, 61);
    }

    #[test]
    fn test_match_status_response_shapes() {
        let waiting = MatchStatusResponse::Waiting(WaitingResponse {
            matched: false,
            searching: true,
        });
        let json = serde_json::to_value(&waiting).unwrap();
        assert_eq!(json, serde_json::json!({"matched": false, "searching": true}));

        let matched = MatchStatusResponse::Matched(MatchedResponse {
            matched: true,
            session_id: SessionId::from("room_x"),
            credential: "tok".to_string(),
            expires_in: 7200,
            transport_endpoint: "wss://t".to_string(),
            partner: presence("bob").partner_info(),
        });
        let json = serde_json::to_value(&matched).unwrap();
        assert_eq!(json["sessionId"], "room_x");
        assert_eq!(json["expiresIn"], 7200);
        assert_eq!(json["transportEndpoint"], "wss://t");
        assert_eq!(json["partner"]["nativeLanguage"], "English");
        assert_eq!(json["partner"]["learningLanguage"], "Spanish");
    }

    #[test]
    fn test_register_request_languages_optional() {
        let req: RegisterUserRequest =
            serde_json::from_str(r#"{"userId":"u1","handle":"Ana"}"#).unwrap();
        assert_eq!(req.user_id, "u1");
        assert!(req.native_language.is_none());
        assert!(req.learning_language.is_none());
    }
}
