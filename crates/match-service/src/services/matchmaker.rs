//! Matchmaking coordinator.
//!
//! Pairs waiting users, allocates the shared session and drives the per-user
//! lifecycle `Idle -> Searching -> InCall -> Idle`.
//!
//! # Pairing flow
//!
//! 1. Find the oldest other waiting user
//! 2. Atomically claim both users for a freshly minted session id
//! 3. Issue one transport credential per participant, under a timeout
//! 4. Commit the session only if both users are still bound to it
//! 5. Otherwise fall back to the pool
//!
//! A lost claim race is retried with the next candidate (max 3 attempts).
//! A credential failure after a claim releases both users, so a failed
//! attempt is indistinguishable from one that never matched.

use crate::errors::MatchError;
use crate::models::{PartnerInfo, UserPresence, UserProfile, DEFAULT_LANGUAGE};
use crate::observability::metrics;
use crate::repositories::{ClaimOutcome, MatchStore};
use crate::services::token_issuer::{Credential, TokenIssuer};
use chrono::Utc;
use common::types::{SessionId, UserId};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, instrument, warn};

/// Interval at which clients are expected to poll `status` while searching.
pub const POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Number of polls after which the reference client gives up (~30 s).
pub const MAX_POLL_ATTEMPTS: u32 = 15;

/// Claim attempts before a caller falls back to the pool.
const MAX_CLAIM_ATTEMPTS: usize = 3;

/// A committed pairing as seen by one participant.
#[derive(Debug, Clone)]
pub struct MatchedSession {
    pub session_id: SessionId,
    pub credential: Credential,
    pub transport_endpoint: String,
    pub partner: PartnerInfo,
}

/// Answer to `start` and `status`.
#[derive(Debug, Clone)]
pub enum MatchStatus {
    Matched(MatchedSession),
    Waiting { searching: bool },
}

impl MatchStatus {
    fn idle() -> Self {
        MatchStatus::Waiting { searching: false }
    }
}

/// A re-issued credential for a session the caller belongs to.
#[derive(Debug, Clone)]
pub struct TransportCredential {
    pub session_id: SessionId,
    pub credential: Credential,
    pub transport_endpoint: String,
}

/// Why a session ended (metrics label).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndReason {
    /// A participant called stop.
    Stopped,
    /// The transport provider reported the room left with one participant.
    Disconnected,
}

impl EndReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            EndReason::Stopped => "stopped",
            EndReason::Disconnected => "disconnected",
        }
    }
}

enum PairOutcome {
    Matched(MatchedSession),
    /// Candidate left before commit; the caller may try again.
    PartnerLeft,
    /// The caller itself stopped before commit.
    CallerLeft,
}

/// Matchmaking coordinator.
pub struct Matchmaker {
    store: Arc<dyn MatchStore>,
    issuer: Arc<dyn TokenIssuer>,
    credential_timeout: Duration,
}

impl Matchmaker {
    /// Create a coordinator.
    ///
    /// # Arguments
    ///
    /// * `store` - Presence and session store
    /// * `issuer` - Transport credential issuer
    /// * `credential_timeout` - Upper bound on a credential issuance
    pub fn new(
        store: Arc<dyn MatchStore>,
        issuer: Arc<dyn TokenIssuer>,
        credential_timeout: Duration,
    ) -> Self {
        Self {
            store,
            issuer,
            credential_timeout,
        }
    }

    pub fn store(&self) -> &Arc<dyn MatchStore> {
        &self.store
    }

    /// Create or update a user's presence.
    #[instrument(skip_all, fields(user_id = %profile.user_id))]
    pub async fn register_user(&self, profile: UserProfile) -> Result<UserPresence, MatchError> {
        let presence = self.store.register_user(profile).await?;

        debug!(
            target: "match.service.matchmaker",
            user_id = %presence.user_id,
            "User presence registered"
        );

        Ok(presence)
    }

    /// Find a partner for `user_id`, or put the user in the pool.
    ///
    /// # Errors
    ///
    /// - `MatchError::NotFound` - user has no presence
    /// - `MatchError::AlreadyInCall` - user is bound to a session (no state change)
    /// - `MatchError::CredentialIssuance` - a claim was made but credentials
    ///   could not be issued; the claim was released
    /// - `MatchError::Database` - store failure
    #[instrument(skip_all, fields(user_id = %user_id))]
    pub async fn request_match(&self, user_id: &UserId) -> Result<MatchStatus, MatchError> {
        let presence = self
            .store
            .touch_user(user_id)
            .await?
            .ok_or_else(|| MatchError::NotFound("User not registered".to_string()))?;

        if presence.in_call {
            metrics::record_match_request("already_in_call");
            return Err(MatchError::AlreadyInCall);
        }

        for attempt in 1..=MAX_CLAIM_ATTEMPTS {
            let Some(candidate) = self.store.find_candidate(user_id).await? else {
                break;
            };

            let session_id = SessionId::generate();
            match self
                .store
                .claim_pair(user_id, &candidate.user_id, &session_id)
                .await?
            {
                ClaimOutcome::Claimed => {}
                ClaimOutcome::CandidateTaken => {
                    metrics::record_claim_conflict();
                    debug!(
                        target: "match.service.matchmaker",
                        attempt = attempt,
                        "Candidate taken concurrently, retrying"
                    );
                    continue;
                }
                ClaimOutcome::InitiatorUnavailable => {
                    debug!(
                        target: "match.service.matchmaker",
                        "Caller was claimed concurrently"
                    );
                    return self.poll_status(user_id).await;
                }
            }

            match self.complete_pair(&presence, &candidate, session_id).await? {
                PairOutcome::Matched(matched) => {
                    metrics::record_match_request("matched");
                    return Ok(MatchStatus::Matched(matched));
                }
                PairOutcome::PartnerLeft => continue,
                PairOutcome::CallerLeft => {
                    metrics::record_match_request("waiting");
                    return Ok(MatchStatus::idle());
                }
            }
        }

        if self.store.enter_pool(user_id).await? {
            metrics::record_match_request("waiting");
            debug!(target: "match.service.matchmaker", "No partner yet, user waiting");
            Ok(MatchStatus::Waiting { searching: true })
        } else {
            // Claimed between the scan and the pool write
            self.poll_status(user_id).await
        }
    }

    /// Issue credentials and commit a claimed pair.
    async fn complete_pair(
        &self,
        initiator: &UserPresence,
        candidate: &UserPresence,
        session_id: SessionId,
    ) -> Result<PairOutcome, MatchError> {
        let participants = [initiator.user_id.clone(), candidate.user_id.clone()];

        let issuance = self
            .with_issuance_timeout(async {
                tokio::try_join!(
                    self.issuer
                        .issue_credential(&session_id, &initiator.handle),
                    self.issuer
                        .issue_credential(&session_id, &candidate.handle),
                )
            })
            .await;

        // The candidate picks up its own credential on its next poll
        let credential = match issuance {
            Ok((initiator_credential, _)) => initiator_credential,
            Err(e) => {
                if let Err(release_err) =
                    self.store.release_claim(&session_id, &participants).await
                {
                    warn!(
                        target: "match.service.matchmaker",
                        error = %release_err,
                        "Failed to release claim after issuance error"
                    );
                }
                metrics::record_match_request("error");
                warn!(
                    target: "match.service.matchmaker",
                    session_id = %session_id,
                    "Credential issuance failed, releasing claim"
                );
                return Err(e);
            }
        };

        let session = crate::models::Session::new_active(
            session_id.clone(),
            initiator,
            candidate,
            Utc::now(),
        );

        let committed = match self.store.commit_session(&session).await {
            Ok(committed) => committed,
            Err(e) => {
                if let Err(release_err) =
                    self.store.release_claim(&session_id, &participants).await
                {
                    warn!(
                        target: "match.service.matchmaker",
                        error = %release_err,
                        "Failed to release claim after commit error"
                    );
                }
                return Err(e);
            }
        };

        if !committed {
            let caller_bound = self
                .store
                .get_user(&initiator.user_id)
                .await?
                .is_some_and(|p| p.is_bound_to(&session_id));
            self.store.release_claim(&session_id, &participants).await?;

            debug!(
                target: "match.service.matchmaker",
                session_id = %session_id,
                caller_bound = caller_bound,
                "Participant left before commit, claim released"
            );

            return Ok(if caller_bound {
                PairOutcome::PartnerLeft
            } else {
                PairOutcome::CallerLeft
            });
        }

        info!(
            target: "match.service.matchmaker",
            session_id = %session_id,
            initiator = %initiator.user_id,
            candidate = %candidate.user_id,
            "Users matched"
        );

        Ok(PairOutcome::Matched(MatchedSession {
            session_id,
            credential,
            transport_endpoint: self.issuer.transport_endpoint().to_string(),
            partner: candidate.partner_info(),
        }))
    }

    /// Report the caller's current state. Refreshes the heartbeat only.
    ///
    /// Unknown users are reported idle. A presence still pointing at an
    /// ended session is reset. Every matched answer carries a fresh
    /// credential.
    #[instrument(skip_all, fields(user_id = %user_id))]
    pub async fn poll_status(&self, user_id: &UserId) -> Result<MatchStatus, MatchError> {
        let Some(presence) = self.store.touch_user(user_id).await? else {
            return Ok(MatchStatus::idle());
        };

        if !presence.in_call {
            return Ok(MatchStatus::Waiting {
                searching: presence.searching,
            });
        }

        let Some(session_id) = presence.current_session_id.clone() else {
            warn!(
                target: "match.service.matchmaker",
                "In call without a session, resetting presence"
            );
            self.store.reset_presence(user_id, None).await?;
            return Ok(MatchStatus::idle());
        };

        let Some(session) = self.store.get_session(&session_id).await? else {
            // Claimed, commit still in flight
            return Ok(MatchStatus::Waiting { searching: true });
        };

        let partner = match session.partner_of(user_id) {
            Some(partner) if session.is_active() => partner,
            _ => {
                debug!(
                    target: "match.service.matchmaker",
                    session_id = %session_id,
                    "Session no longer active, resetting presence"
                );
                self.store
                    .reset_presence(user_id, Some(&session_id))
                    .await?;
                return Ok(MatchStatus::idle());
            }
        };

        let partner_info = match self.store.get_user(&partner.user_id).await? {
            Some(p) => p.partner_info(),
            None => PartnerInfo {
                handle: partner.handle.clone(),
                native_language: DEFAULT_LANGUAGE.to_string(),
                learning_language: DEFAULT_LANGUAGE.to_string(),
            },
        };

        let credential = self
            .with_issuance_timeout(self.issuer.issue_credential(&session_id, &presence.handle))
            .await?;

        Ok(MatchStatus::Matched(MatchedSession {
            session_id,
            credential,
            transport_endpoint: self.issuer.transport_endpoint().to_string(),
            partner: partner_info,
        }))
    }

    /// Leave the pool or end the caller's session. Idempotent.
    ///
    /// The partner is reset only if still bound to the same session.
    #[instrument(skip_all, fields(user_id = %user_id))]
    pub async fn end_session(&self, user_id: &UserId) -> Result<(), MatchError> {
        let previous = self.store.reset_presence(user_id, None).await?;

        let Some(session_id) = previous.and_then(|p| p.current_session_id) else {
            debug!(target: "match.service.matchmaker", "Stop without a session");
            return Ok(());
        };

        self.finish_session(&session_id, EndReason::Stopped).await
    }

    /// End a session on a transport disconnect signal. Idempotent; unknown
    /// sessions are a no-op.
    #[instrument(skip_all, fields(session_id = %session_id))]
    pub async fn end_session_by_id(&self, session_id: &SessionId) -> Result<(), MatchError> {
        self.finish_session(session_id, EndReason::Disconnected)
            .await
    }

    async fn finish_session(
        &self,
        session_id: &SessionId,
        reason: EndReason,
    ) -> Result<(), MatchError> {
        let session = match self.store.end_session(session_id, Utc::now()).await? {
            Some(ended) => {
                metrics::record_session_ended(reason.as_str(), ended.duration_seconds);
                info!(
                    target: "match.service.matchmaker",
                    session_id = %session_id,
                    reason = reason.as_str(),
                    duration_seconds = ended.duration_seconds,
                    "Session ended"
                );
                Some(ended)
            }
            None => self.store.get_session(session_id).await?,
        };

        // Never committed: the initiator's commit check releases the claim
        let Some(session) = session else {
            return Ok(());
        };

        for participant in &session.participants {
            self.store
                .reset_presence(&participant.user_id, Some(session_id))
                .await?;
        }

        Ok(())
    }

    /// Mint a fresh credential for a session the caller currently belongs to.
    ///
    /// # Errors
    ///
    /// - `MatchError::Forbidden` - caller is not bound to an active `session_id`
    /// - `MatchError::CredentialIssuance` - issuer failed or timed out
    #[instrument(skip_all, fields(user_id = %user_id, session_id = %session_id))]
    pub async fn refresh_credential(
        &self,
        user_id: &UserId,
        session_id: &SessionId,
    ) -> Result<TransportCredential, MatchError> {
        let forbidden = || MatchError::Forbidden("Not a participant of this session".to_string());

        let presence = self
            .store
            .get_user(user_id)
            .await?
            .filter(|p| p.is_bound_to(session_id))
            .ok_or_else(forbidden)?;

        let active = self
            .store
            .get_session(session_id)
            .await?
            .is_some_and(|s| s.is_active());
        if !active {
            return Err(forbidden());
        }

        let credential = self
            .with_issuance_timeout(self.issuer.issue_credential(session_id, &presence.handle))
            .await?;

        Ok(TransportCredential {
            session_id: session_id.clone(),
            credential,
            transport_endpoint: self.issuer.transport_endpoint().to_string(),
        })
    }

    /// Drop users from the pool whose heartbeat is older than `ttl`.
    pub async fn expire_searching(&self, ttl: Duration) -> Result<u64, MatchError> {
        let ttl = chrono::Duration::from_std(ttl).map_err(|_| MatchError::Internal)?;
        let expired = self.store.expire_searching(Utc::now() - ttl).await?;

        if expired > 0 {
            metrics::record_searching_expired(expired);
            info!(
                target: "match.service.matchmaker",
                expired = expired,
                "Expired stale searching users"
            );
        }

        Ok(expired)
    }

    async fn with_issuance_timeout<T, F>(&self, issuance: F) -> Result<T, MatchError>
    where
        F: Future<Output = Result<T, MatchError>>,
    {
        let started = Instant::now();

        match tokio::time::timeout(self.credential_timeout, issuance).await {
            Ok(Ok(value)) => {
                metrics::record_credential_issuance("success", started.elapsed());
                Ok(value)
            }
            Ok(Err(e)) => {
                metrics::record_credential_issuance("error", started.elapsed());
                Err(e)
            }
            Err(_) => {
                metrics::record_credential_issuance("timeout", started.elapsed());
                Err(MatchError::CredentialIssuance(
                    "Credential issuance timed out".to_string(),
                ))
            }
        }
    }
}
