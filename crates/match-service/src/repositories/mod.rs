//! Repository layer for the match service.
//!
//! [`MatchStore`] is the single synchronization boundary for presence and
//! sessions. Every operation that mutates more than one record is atomic
//! with respect to every other store operation touching those records.
//!
//! Two implementations:
//! - [`InMemoryMatchStore`] - one lock around all state (single process)
//! - [`PgMatchStore`] - PostgreSQL, row locks taken in `user_id` order

pub mod memory;
pub mod postgres;

pub use memory::InMemoryMatchStore;
pub use postgres::PgMatchStore;

use crate::errors::MatchError;
use crate::models::{Session, UserPresence, UserProfile};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::types::{SessionId, UserId};

/// Result of an atomic attempt to pair two users.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimOutcome {
    /// Both users are now bound to the session.
    Claimed,
    /// The candidate stopped searching or was claimed by someone else.
    CandidateTaken,
    /// The initiator is gone or already bound (claimed concurrently).
    InitiatorUnavailable,
}

/// Storage operations used by the matchmaker.
#[async_trait]
pub trait MatchStore: Send + Sync {
    /// Create presence if missing, otherwise update the display fields.
    /// Matchmaking flags are never touched.
    async fn register_user(&self, profile: UserProfile) -> Result<UserPresence, MatchError>;

    async fn get_user(&self, user_id: &UserId) -> Result<Option<UserPresence>, MatchError>;

    /// Refresh `last_seen_at` and return the presence.
    async fn touch_user(&self, user_id: &UserId) -> Result<Option<UserPresence>, MatchError>;

    /// Oldest waiting user that is available for a claim, never `exclude`.
    async fn find_candidate(&self, exclude: &UserId) -> Result<Option<UserPresence>, MatchError>;

    /// Atomically bind `initiator` and `candidate` to `session_id`.
    ///
    /// Succeeds only if the initiator is not in a call and the candidate is
    /// searching and not in a call.
    async fn claim_pair(
        &self,
        initiator: &UserId,
        candidate: &UserId,
        session_id: &SessionId,
    ) -> Result<ClaimOutcome, MatchError>;

    /// Reset each listed user to idle if still bound to `session_id`.
    async fn release_claim(
        &self,
        session_id: &SessionId,
        users: &[UserId],
    ) -> Result<(), MatchError>;

    /// Persist an active session and bump both call counters, only if both
    /// participants are still bound to it.
    async fn commit_session(&self, session: &Session) -> Result<bool, MatchError>;

    /// Mark the user as searching if not in a call. Returns false otherwise.
    async fn enter_pool(&self, user_id: &UserId) -> Result<bool, MatchError>;

    async fn get_session(&self, session_id: &SessionId) -> Result<Option<Session>, MatchError>;

    /// Transition an active session to ended. `None` if missing or already
    /// ended, so concurrent callers end it exactly once.
    async fn end_session(
        &self,
        session_id: &SessionId,
        now: DateTime<Utc>,
    ) -> Result<Option<Session>, MatchError>;

    /// Reset a user to idle. With `only_if_session`, only when bound to that
    /// session. Returns the presence as it was before the reset, or `None`
    /// if the user is unknown or the condition did not hold.
    async fn reset_presence(
        &self,
        user_id: &UserId,
        only_if_session: Option<&SessionId>,
    ) -> Result<Option<UserPresence>, MatchError>;

    /// Clear `searching` for users not seen since `cutoff`. Returns the
    /// number of users dropped from the pool.
    async fn expire_searching(&self, cutoff: DateTime<Utc>) -> Result<u64, MatchError>;

    /// Readiness check.
    async fn ping(&self) -> Result<(), MatchError>;

    /// Backend name reported by `/health`.
    fn backend(&self) -> &'static str;
}
