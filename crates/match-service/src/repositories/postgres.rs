//! PostgreSQL match store.
//!
//! Multi-row operations run in a transaction that locks the affected
//! `user_presence` rows with `SELECT ... FOR UPDATE ORDER BY user_id`, so two
//! claims touching the same users serialize and cannot deadlock.
//!
//! # Security
//!
//! - All queries use parameterized statements (SQL injection safe)
//! - Credentials are never stored; only session ids and display fields

use super::{ClaimOutcome, MatchStore};
use crate::errors::MatchError;
use crate::models::{Participant, Session, SessionStatus, UserPresence, UserProfile};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::types::{SessionId, UserId};
use sqlx::PgPool;
use tracing::instrument;

/// Store backed by the tables in `migrations/`.
#[derive(Clone)]
pub struct PgMatchStore {
    pool: PgPool,
}

impl PgMatchStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn load_participants(&self, session_id: &str) -> Result<Vec<ParticipantRow>, MatchError> {
        let rows: Vec<ParticipantRow> = sqlx::query_as(
            r#"
            SELECT user_id, handle, joined_at
            FROM session_participants
            WHERE session_id = $1
            ORDER BY position ASC
            "#,
        )
        .bind(session_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }
}

#[async_trait]
impl MatchStore for PgMatchStore {
    #[instrument(skip_all, fields(user_id = %profile.user_id))]
    async fn register_user(&self, profile: UserProfile) -> Result<UserPresence, MatchError> {
        let row: PresenceRow = sqlx::query_as(
            r#"
            INSERT INTO user_presence (user_id, handle, native_language, learning_language)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (user_id) DO UPDATE
            SET handle = EXCLUDED.handle,
                native_language = EXCLUDED.native_language,
                learning_language = EXCLUDED.learning_language,
                last_seen_at = NOW()
            RETURNING user_id, handle, native_language, learning_language, searching,
                      in_call, current_session_id, searching_since, total_calls, last_seen_at
            "#,
        )
        .bind(profile.user_id.as_str())
        .bind(&profile.handle)
        .bind(&profile.native_language)
        .bind(&profile.learning_language)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.into())
    }

    async fn get_user(&self, user_id: &UserId) -> Result<Option<UserPresence>, MatchError> {
        let row: Option<PresenceRow> = sqlx::query_as(
            r#"
            SELECT user_id, handle, native_language, learning_language, searching,
                   in_call, current_session_id, searching_since, total_calls, last_seen_at
            FROM user_presence
            WHERE user_id = $1
            "#,
        )
        .bind(user_id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Into::into))
    }

    async fn touch_user(&self, user_id: &UserId) -> Result<Option<UserPresence>, MatchError> {
        let row: Option<PresenceRow> = sqlx::query_as(
            r#"
            UPDATE user_presence
            SET last_seen_at = NOW()
            WHERE user_id = $1
            RETURNING user_id, handle, native_language, learning_language, searching,
                      in_call, current_session_id, searching_since, total_calls, last_seen_at
            "#,
        )
        .bind(user_id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Into::into))
    }

    async fn find_candidate(&self, exclude: &UserId) -> Result<Option<UserPresence>, MatchError> {
        let row: Option<PresenceRow> = sqlx::query_as(
            r#"
            SELECT user_id, handle, native_language, learning_language, searching,
                   in_call, current_session_id, searching_since, total_calls, last_seen_at
            FROM user_presence
            WHERE searching AND NOT in_call AND user_id <> $1
            ORDER BY searching_since ASC NULLS LAST, user_id ASC
            LIMIT 1
            "#,
        )
        .bind(exclude.as_str())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Into::into))
    }

    #[instrument(skip_all, fields(initiator = %initiator, candidate = %candidate, session_id = %session_id))]
    async fn claim_pair(
        &self,
        initiator: &UserId,
        candidate: &UserId,
        session_id: &SessionId,
    ) -> Result<ClaimOutcome, MatchError> {
        let ids = vec![initiator.0.clone(), candidate.0.clone()];
        let mut tx = self.pool.begin().await?;

        // Lock both rows in a stable order
        let rows: Vec<(String, bool, bool)> = sqlx::query_as(
            r#"
            SELECT user_id, searching, in_call
            FROM user_presence
            WHERE user_id = ANY($1)
            ORDER BY user_id
            FOR UPDATE
            "#,
        )
        .bind(&ids)
        .fetch_all(&mut *tx)
        .await?;

        let state_of = |id: &UserId| {
            rows.iter()
                .find(|(user_id, _, _)| user_id == id.as_str())
                .map(|(_, searching, in_call)| (*searching, *in_call))
        };

        // A dropped transaction rolls back and releases the locks
        if !matches!(state_of(initiator), Some((_, false))) {
            return Ok(ClaimOutcome::InitiatorUnavailable);
        }
        if initiator == candidate || !matches!(state_of(candidate), Some((true, false))) {
            return Ok(ClaimOutcome::CandidateTaken);
        }

        sqlx::query(
            r#"
            UPDATE user_presence
            SET searching = FALSE,
                searching_since = NULL,
                in_call = TRUE,
                current_session_id = $1
            WHERE user_id = ANY($2)
            "#,
        )
        .bind(session_id.as_str())
        .bind(&ids)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(ClaimOutcome::Claimed)
    }

    #[instrument(skip_all, fields(session_id = %session_id))]
    async fn release_claim(
        &self,
        session_id: &SessionId,
        users: &[UserId],
    ) -> Result<(), MatchError> {
        let ids: Vec<String> = users.iter().map(|u| u.0.clone()).collect();

        sqlx::query(
            r#"
            UPDATE user_presence
            SET searching = FALSE,
                searching_since = NULL,
                in_call = FALSE,
                current_session_id = NULL
            WHERE user_id = ANY($1)
              AND in_call
              AND current_session_id = $2
            "#,
        )
        .bind(&ids)
        .bind(session_id.as_str())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    #[instrument(skip_all, fields(session_id = %session.session_id))]
    async fn commit_session(&self, session: &Session) -> Result<bool, MatchError> {
        let ids: Vec<String> = session
            .participants
            .iter()
            .map(|p| p.user_id.0.clone())
            .collect();
        let mut tx = self.pool.begin().await?;

        let bound: Vec<(String,)> = sqlx::query_as(
            r#"
            SELECT user_id
            FROM user_presence
            WHERE user_id = ANY($1)
              AND in_call
              AND current_session_id = $2
            ORDER BY user_id
            FOR UPDATE
            "#,
        )
        .bind(&ids)
        .bind(session.session_id.as_str())
        .fetch_all(&mut *tx)
        .await?;

        if bound.len() != session.participants.len() {
            return Ok(false);
        }

        let inserted = sqlx::query(
            r#"
            INSERT INTO match_sessions (session_id, status, started_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (session_id) DO NOTHING
            "#,
        )
        .bind(session.session_id.as_str())
        .bind(session.status.as_str())
        .bind(session.started_at)
        .execute(&mut *tx)
        .await?;

        if inserted.rows_affected() == 0 {
            return Ok(false);
        }

        for (position, participant) in (0_i16..).zip(session.participants.iter()) {
            sqlx::query(
                r#"
                INSERT INTO session_participants (session_id, position, user_id, handle, joined_at)
                VALUES ($1, $2, $3, $4, $5)
                "#,
            )
            .bind(session.session_id.as_str())
            .bind(position)
            .bind(participant.user_id.as_str())
            .bind(&participant.handle)
            .bind(participant.joined_at)
            .execute(&mut *tx)
            .await?;
        }

        sqlx::query(
            r#"
            UPDATE user_presence
            SET total_calls = total_calls + 1
            WHERE user_id = ANY($1)
            "#,
        )
        .bind(&ids)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(true)
    }

    async fn enter_pool(&self, user_id: &UserId) -> Result<bool, MatchError> {
        let result = sqlx::query(
            r#"
            UPDATE user_presence
            SET searching = TRUE,
                searching_since = COALESCE(searching_since, NOW())
            WHERE user_id = $1 AND NOT in_call
            "#,
        )
        .bind(user_id.as_str())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn get_session(&self, session_id: &SessionId) -> Result<Option<Session>, MatchError> {
        let row: Option<SessionRow> = sqlx::query_as(
            r#"
            SELECT session_id, status, started_at, ended_at, duration_seconds
            FROM match_sessions
            WHERE session_id = $1
            "#,
        )
        .bind(session_id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let participants = self.load_participants(&row.session_id).await?;
        row.into_session(participants).map(Some)
    }

    #[instrument(skip_all, fields(session_id = %session_id))]
    async fn end_session(
        &self,
        session_id: &SessionId,
        now: DateTime<Utc>,
    ) -> Result<Option<Session>, MatchError> {
        let ended: Option<(String,)> = sqlx::query_as(
            r#"
            UPDATE match_sessions
            SET status = 'ended',
                ended_at = $2,
                duration_seconds = GREATEST(0, FLOOR(EXTRACT(EPOCH FROM ($2 - started_at))))::BIGINT
            WHERE session_id = $1 AND status = 'active'
            RETURNING session_id
            "#,
        )
        .bind(session_id.as_str())
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;

        match ended {
            Some(_) => self.get_session(session_id).await,
            None => Ok(None),
        }
    }

    async fn reset_presence(
        &self,
        user_id: &UserId,
        only_if_session: Option<&SessionId>,
    ) -> Result<Option<UserPresence>, MatchError> {
        let row: Option<PresenceRow> = sqlx::query_as(
            r#"
            WITH previous AS (
                SELECT user_id, handle, native_language, learning_language, searching,
                       in_call, current_session_id, searching_since, total_calls, last_seen_at
                FROM user_presence
                WHERE user_id = $1
                  AND ($2::TEXT IS NULL OR (in_call AND current_session_id = $2))
                FOR UPDATE
            )
            UPDATE user_presence p
            SET searching = FALSE,
                searching_since = NULL,
                in_call = FALSE,
                current_session_id = NULL
            FROM previous
            WHERE p.user_id = previous.user_id
            RETURNING previous.user_id, previous.handle, previous.native_language,
                      previous.learning_language, previous.searching, previous.in_call,
                      previous.current_session_id, previous.searching_since,
                      previous.total_calls, previous.last_seen_at
            "#,
        )
        .bind(user_id.as_str())
        .bind(only_if_session.map(SessionId::as_str))
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Into::into))
    }

    #[instrument(skip_all)]
    async fn expire_searching(&self, cutoff: DateTime<Utc>) -> Result<u64, MatchError> {
        let result = sqlx::query(
            r#"
            UPDATE user_presence
            SET searching = FALSE,
                searching_since = NULL
            WHERE searching AND NOT in_call AND last_seen_at < $1
            "#,
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn ping(&self) -> Result<(), MatchError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    fn backend(&self) -> &'static str {
        "postgres"
    }
}

// ============================================================================
// Database Row Types
// ============================================================================

#[derive(sqlx::FromRow)]
struct PresenceRow {
    user_id: String,
    handle: String,
    native_language: String,
    learning_language: String,
    searching: bool,
    in_call: bool,
    current_session_id: Option<String>,
    searching_since: Option<DateTime<Utc>>,
    total_calls: i64,
    last_seen_at: DateTime<Utc>,
}

impl From<PresenceRow> for UserPresence {
    fn from(row: PresenceRow) -> Self {
        UserPresence {
            user_id: UserId(row.user_id),
            handle: row.handle,
            native_language: row.native_language,
            learning_language: row.learning_language,
            searching: row.searching,
            in_call: row.in_call,
            current_session_id: row.current_session_id.map(SessionId),
            searching_since: row.searching_since,
            total_calls: row.total_calls,
            last_seen_at: row.last_seen_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct SessionRow {
    session_id: String,
    status: String,
    started_at: DateTime<Utc>,
    ended_at: Option<DateTime<Utc>>,
    duration_seconds: i64,
}

impl SessionRow {
    fn into_session(self, participants: Vec<ParticipantRow>) -> Result<Session, MatchError> {
        let status = SessionStatus::parse(&self.status).ok_or_else(|| {
            MatchError::Database(format!("Unknown session status '{}'", self.status))
        })?;

        let participants: Vec<Participant> = participants
            .into_iter()
            .map(|p| Participant {
                user_id: UserId(p.user_id),
                handle: p.handle,
                joined_at: p.joined_at,
            })
            .collect();
        let participants: [Participant; 2] = participants.try_into().map_err(|p: Vec<_>| {
            MatchError::Database(format!(
                "Session {} has {} participants",
                self.session_id,
                p.len()
            ))
        })?;

        Ok(Session {
            session_id: SessionId(self.session_id),
            participants,
            status,
            started_at: self.started_at,
            ended_at: self.ended_at,
            duration_seconds: self.duration_seconds,
        })
    }
}

#[derive(sqlx::FromRow)]
struct ParticipantRow {
    user_id: String,
    handle: String,
    joined_at: DateTime<Utc>,
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::models::DEFAULT_LANGUAGE;
    use chrono::Duration;

    fn profile(id: &str) -> UserProfile {
        UserProfile {
            user_id: UserId::from(id),
            handle: format!("{id}-handle"),
            native_language: DEFAULT_LANGUAGE.to_string(),
            learning_language: DEFAULT_LANGUAGE.to_string(),
        }
    }

    async fn seeded(pool: PgPool, ids: &[&str]) -> PgMatchStore {
        let store = PgMatchStore::new(pool);
        for id in ids {
            store.register_user(profile(id)).await.unwrap();
        }
        store
    }

    #[sqlx::test(migrations = "../../migrations")]
    #[ignore = "requires a PostgreSQL DATABASE_URL"]
    async fn test_register_is_upsert(pool: PgPool) {
        let store = seeded(pool, &["alice"]).await;
        assert!(store.enter_pool(&UserId::from("alice")).await.unwrap());

        let mut updated = profile("alice");
        updated.handle = "Alice".to_string();
        let presence = store.register_user(updated).await.unwrap();

        assert_eq!(presence.handle, "Alice");
        assert!(presence.searching);
    }

    #[sqlx::test(migrations = "../../migrations")]
    #[ignore = "requires a PostgreSQL DATABASE_URL"]
    async fn test_claim_commit_and_end(pool: PgPool) {
        let store = seeded(pool, &["alice", "bob"]).await;
        let (alice, bob) = (UserId::from("alice"), UserId::from("bob"));
        assert!(store.enter_pool(&bob).await.unwrap());

        let candidate = store.find_candidate(&alice).await.unwrap().unwrap();
        assert_eq!(candidate.user_id, bob);
        assert!(store.find_candidate(&bob).await.unwrap().is_none());

        let sid = SessionId::generate();
        assert_eq!(
            store.claim_pair(&alice, &bob, &sid).await.unwrap(),
            ClaimOutcome::Claimed
        );
        assert_eq!(
            store
                .claim_pair(&alice, &bob, &SessionId::generate())
                .await
                .unwrap(),
            ClaimOutcome::InitiatorUnavailable
        );

        let a = store.get_user(&alice).await.unwrap().unwrap();
        let started = Utc::now();
        let session = Session::new_active(sid.clone(), &a, &candidate, started);
        assert!(store.commit_session(&session).await.unwrap());

        let loaded = store.get_session(&sid).await.unwrap().unwrap();
        assert_eq!(loaded.participants[0].user_id, alice);
        assert_eq!(loaded.participants[1].user_id, bob);
        assert_eq!(store.get_user(&bob).await.unwrap().unwrap().total_calls, 1);

        let ended = store
            .end_session(&sid, started + Duration::seconds(42))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(ended.status, SessionStatus::Ended);
        assert_eq!(ended.duration_seconds, 42);
        assert!(store.end_session(&sid, Utc::now()).await.unwrap().is_none());
    }

    #[sqlx::test(migrations = "../../migrations")]
    #[ignore = "requires a PostgreSQL DATABASE_URL"]
    async fn test_release_and_conditional_reset(pool: PgPool) {
        let store = seeded(pool, &["alice", "bob"]).await;
        let (alice, bob) = (UserId::from("alice"), UserId::from("bob"));
        store.enter_pool(&bob).await.unwrap();
        let sid = SessionId::generate();
        store.claim_pair(&alice, &bob, &sid).await.unwrap();

        assert!(store
            .reset_presence(&alice, Some(&SessionId::generate()))
            .await
            .unwrap()
            .is_none());
        let previous = store
            .reset_presence(&alice, Some(&sid))
            .await
            .unwrap()
            .unwrap();
        assert!(previous.in_call);

        store
            .release_claim(&sid, &[alice.clone(), bob.clone()])
            .await
            .unwrap();
        let b = store.get_user(&bob).await.unwrap().unwrap();
        assert!(!b.in_call && !b.searching && b.current_session_id.is_none());
    }

    #[sqlx::test(migrations = "../../migrations")]
    #[ignore = "requires a PostgreSQL DATABASE_URL"]
    async fn test_expire_searching(pool: PgPool) {
        let store = seeded(pool, &["alice"]).await;
        store.enter_pool(&UserId::from("alice")).await.unwrap();

        assert_eq!(
            store
                .expire_searching(Utc::now() - Duration::minutes(5))
                .await
                .unwrap(),
            0
        );
        assert_eq!(
            store
                .expire_searching(Utc::now() + Duration::minutes(5))
                .await
                .unwrap(),
            1
        );
        store.ping().await.unwrap();
    }
}
