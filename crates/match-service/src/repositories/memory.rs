//! In-memory match store.
//!
//! All presence and session state sits behind one `parking_lot::Mutex`, so
//! every operation, including the two-user claim, is a single critical
//! section. No lock is ever held across an `.await`.

use super::{ClaimOutcome, MatchStore};
use crate::errors::MatchError;
use crate::models::{Session, UserPresence, UserProfile};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::types::{SessionId, UserId};
use parking_lot::Mutex;
use std::collections::HashMap;
use tracing::instrument;

#[derive(Default)]
struct State {
    users: HashMap<UserId, UserPresence>,
    sessions: HashMap<SessionId, Session>,
}

/// Single-process store used when no database is configured, and in tests.
#[derive(Default)]
pub struct InMemoryMatchStore {
    state: Mutex<State>,
}

impl InMemoryMatchStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of sessions ever committed.
    pub fn session_count(&self) -> usize {
        self.state.lock().sessions.len()
    }

    /// Snapshot of every committed session.
    pub fn sessions(&self) -> Vec<Session> {
        self.state.lock().sessions.values().cloned().collect()
    }
}

#[async_trait]
impl MatchStore for InMemoryMatchStore {
    #[instrument(skip_all, fields(user_id = %profile.user_id))]
    async fn register_user(&self, profile: UserProfile) -> Result<UserPresence, MatchError> {
        let mut state = self.state.lock();
        let now = Utc::now();

        let presence = state
            .users
            .entry(profile.user_id.clone())
            .and_modify(|p| {
                p.handle = profile.handle.clone();
                p.native_language = profile.native_language.clone();
                p.learning_language = profile.learning_language.clone();
                p.last_seen_at = now;
            })
            .or_insert_with(|| UserPresence::new(profile, now));

        Ok(presence.clone())
    }

    async fn get_user(&self, user_id: &UserId) -> Result<Option<UserPresence>, MatchError> {
        Ok(self.state.lock().users.get(user_id).cloned())
    }

    async fn touch_user(&self, user_id: &UserId) -> Result<Option<UserPresence>, MatchError> {
        let mut state = self.state.lock();
        Ok(state.users.get_mut(user_id).map(|p| {
            p.last_seen_at = Utc::now();
            p.clone()
        }))
    }

    async fn find_candidate(&self, exclude: &UserId) -> Result<Option<UserPresence>, MatchError> {
        let state = self.state.lock();
        Ok(state
            .users
            .values()
            .filter(|p| p.is_available() && &p.user_id != exclude)
            .min_by(|a, b| {
                (a.searching_since, &a.user_id).cmp(&(b.searching_since, &b.user_id))
            })
            .cloned())
    }

    #[instrument(skip_all, fields(initiator = %initiator, candidate = %candidate, session_id = %session_id))]
    async fn claim_pair(
        &self,
        initiator: &UserId,
        candidate: &UserId,
        session_id: &SessionId,
    ) -> Result<ClaimOutcome, MatchError> {
        let mut state = self.state.lock();

        match state.users.get(initiator) {
            Some(p) if !p.in_call => {}
            _ => return Ok(ClaimOutcome::InitiatorUnavailable),
        }
        if initiator == candidate {
            return Ok(ClaimOutcome::CandidateTaken);
        }
        match state.users.get(candidate) {
            Some(p) if p.is_available() => {}
            _ => return Ok(ClaimOutcome::CandidateTaken),
        }

        for user_id in [initiator, candidate] {
            if let Some(p) = state.users.get_mut(user_id) {
                p.bind(session_id);
            }
        }

        Ok(ClaimOutcome::Claimed)
    }

    #[instrument(skip_all, fields(session_id = %session_id))]
    async fn release_claim(
        &self,
        session_id: &SessionId,
        users: &[UserId],
    ) -> Result<(), MatchError> {
        let mut state = self.state.lock();
        for user_id in users {
            if let Some(p) = state.users.get_mut(user_id) {
                if p.is_bound_to(session_id) {
                    p.reset();
                }
            }
        }
        Ok(())
    }

    #[instrument(skip_all, fields(session_id = %session.session_id))]
    async fn commit_session(&self, session: &Session) -> Result<bool, MatchError> {
        let mut state = self.state.lock();

        let all_bound = session.participants.iter().all(|participant| {
            state
                .users
                .get(&participant.user_id)
                .is_some_and(|p| p.is_bound_to(&session.session_id))
        });
        if !all_bound || state.sessions.contains_key(&session.session_id) {
            return Ok(false);
        }

        for participant in &session.participants {
            if let Some(p) = state.users.get_mut(&participant.user_id) {
                p.total_calls += 1;
            }
        }
        state
            .sessions
            .insert(session.session_id.clone(), session.clone());

        Ok(true)
    }

    async fn enter_pool(&self, user_id: &UserId) -> Result<bool, MatchError> {
        let mut state = self.state.lock();
        let Some(p) = state.users.get_mut(user_id) else {
            return Ok(false);
        };
        if p.in_call {
            return Ok(false);
        }
        if !p.searching {
            p.searching = true;
            p.searching_since = Some(Utc::now());
        }
        Ok(true)
    }

    async fn get_session(&self, session_id: &SessionId) -> Result<Option<Session>, MatchError> {
        Ok(self.state.lock().sessions.get(session_id).cloned())
    }

    #[instrument(skip_all, fields(session_id = %session_id))]
    async fn end_session(
        &self,
        session_id: &SessionId,
        now: DateTime<Utc>,
    ) -> Result<Option<Session>, MatchError> {
        let mut state = self.state.lock();
        Ok(state
            .sessions
            .get_mut(session_id)
            .filter(|s| s.is_active())
            .map(|s| {
                s.end(now);
                s.clone()
            }))
    }

    async fn reset_presence(
        &self,
        user_id: &UserId,
        only_if_session: Option<&SessionId>,
    ) -> Result<Option<UserPresence>, MatchError> {
        let mut state = self.state.lock();
        let Some(p) = state.users.get_mut(user_id) else {
            return Ok(None);
        };
        if let Some(session_id) = only_if_session {
            if !p.is_bound_to(session_id) {
                return Ok(None);
            }
        }
        let previous = p.clone();
        p.reset();
        Ok(Some(previous))
    }

    async fn expire_searching(&self, cutoff: DateTime<Utc>) -> Result<u64, MatchError> {
        let mut state = self.state.lock();
        let mut expired = 0;
        for p in state.users.values_mut() {
            if p.is_available() && p.last_seen_at < cutoff {
                p.searching = false;
                p.searching_since = None;
                expired += 1;
            }
        }
        Ok(expired)
    }

    async fn ping(&self) -> Result<(), MatchError> {
        Ok(())
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}
