//! Common identifier types for OpenTalk components.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Prefix for session (transport room) identifiers.
pub const SESSION_ID_PREFIX: &str = "room_";

/// Opaque, stable identifier of a registered user.
///
/// Issued by the external auth service; the matchmaking service never
/// interprets its contents.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub String);

impl UserId {
    /// Borrow the raw identifier.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UserId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for UserId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Identifier of a paired session, also used as the transport room name.
///
/// Generated from a v4 UUID so it cannot be guessed by other users.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub String);

impl SessionId {
    /// Create a new random session ID (`room_<uuid>`).
    #[must_use]
    pub fn generate() -> Self {
        Self(format!("{SESSION_ID_PREFIX}{}", Uuid::new_v4()))
    }

    /// Borrow the raw identifier.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_session_ids_are_prefixed_and_unique() {
        let a = SessionId::generate();
        let b = SessionId::generate();

        assert!(a.as_str().starts_with(SESSION_ID_PREFIX));
        assert_ne!(a, b);
        assert!(Uuid::parse_str(a.as_str().trim_start_matches(SESSION_ID_PREFIX)).is_ok());
    }

    #[test]
    fn test_ids_serialize_as_plain_strings() {
        let user = UserId::from("user-42");
        assert_eq!(serde_json::to_string(&user).unwrap(), "\"user-42\"");

        let session: SessionId = serde_json::from_str("\"room_abc\"").unwrap();
        assert_eq!(session.to_string(), "room_abc");
    }
}
