use chrono::{NaiveDateTime, Utc};
use sqlx::{Sqlite, SqlitePool};
use uuid::Uuid;

use crate::db::models::*;
use crate::error::{AppError, AppResult};

// ============================================================================
// Training Session Repository
// ============================================================================

const SESSION_COLUMNS: &str = "id, title, consultant_id, scheduled_at, duration_minutes, status, \
                               created_at, updated_at";

pub struct TrainingSessionRepository;

impl TrainingSessionRepository {
    /// Create a session together with its participant rows in one transaction.
    pub async fn create(
        pool: &SqlitePool,
        session: CreateTrainingSession,
    ) -> AppResult<TrainingSession> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now().naive_utc();

        let mut tx = pool.begin().await?;

        let created = sqlx::query_as::<_, TrainingSession>(&format!(
            r#"
            INSERT INTO training_sessions (
                id, title, consultant_id, scheduled_at, duration_minutes, status,
                created_at, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            RETURNING {SESSION_COLUMNS}
            "#
        ))
        .bind(&id)
        .bind(&session.title)
        .bind(&session.consultant_id)
        .bind(session.scheduled_at)
        .bind(session.duration_minutes)
        .bind(SessionStatus::Scheduled)
        .bind(now)
        .bind(now)
        .fetch_one(&mut *tx)
        .await?;

        for participant_id in &session.participant_ids {
            sqlx::query(
                "INSERT OR IGNORE INTO session_participants (session_id, user_id, added_at) \
                 VALUES (?, ?, ?)",
            )
            .bind(&id)
            .bind(participant_id)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(created)
    }

    pub async fn find_by_id(pool: &SqlitePool, id: &str) -> AppResult<Option<TrainingSession>> {
        sqlx::query_as::<_, TrainingSession>(&format!(
            "SELECT {SESSION_COLUMNS} FROM training_sessions WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(pool)
        .await
        .map_err(AppError::Database)
    }

    /// Sessions a user takes part in (as consultant or participant),
    /// or every session when `user_id` is `None`. Soonest first.
    pub async fn list(
        pool: &SqlitePool,
        user_id: Option<&str>,
        status: Option<SessionStatus>,
    ) -> AppResult<Vec<TrainingSession>> {
        sqlx::query_as::<_, TrainingSession>(&format!(
            r#"
            SELECT {SESSION_COLUMNS}
            FROM training_sessions s
            WHERE (?1 IS NULL
                   OR s.consultant_id = ?1
                   OR EXISTS (SELECT 1 FROM session_participants p
                              WHERE p.session_id = s.id AND p.user_id = ?1))
            AND (?2 IS NULL OR s.status = ?2)
            ORDER BY s.scheduled_at ASC
            "#
        ))
        .bind(user_id)
        .bind(status)
        .fetch_all(pool)
        .await
        .map_err(AppError::Database)
    }

    /// Ids of enrolled participants, in enrollment order.
    pub async fn participant_ids<'e, E>(executor: E, session_id: &str) -> AppResult<Vec<String>>
    where
        E: sqlx::Executor<'e, Database = Sqlite>,
    {
        sqlx::query_scalar::<_, String>(
            "SELECT user_id FROM session_participants WHERE session_id = ? ORDER BY added_at, rowid",
        )
        .bind(session_id)
        .fetch_all(executor)
        .await
        .map_err(AppError::Database)
    }

    pub async fn add_participant(
        pool: &SqlitePool,
        session_id: &str,
        user_id: &str,
    ) -> AppResult<bool> {
        let result = sqlx::query(
            "INSERT OR IGNORE INTO session_participants (session_id, user_id, added_at) \
             VALUES (?, ?, ?)",
        )
        .bind(session_id)
        .bind(user_id)
        .bind(Utc::now().naive_utc())
        .execute(pool)
        .await
        .map_err(AppError::Database)?;

        Ok(result.rows_affected() > 0)
    }

    /// Move a session from `from` to `to` in a single conditional statement.
    /// Returns `None` when the session is no longer in `from`, so two racing
    /// transitions cannot both apply.
    pub async fn transition_status<'e, E>(
        executor: E,
        id: &str,
        from: SessionStatus,
        to: SessionStatus,
    ) -> AppResult<Option<TrainingSession>>
    where
        E: sqlx::Executor<'e, Database = Sqlite>,
    {
        sqlx::query_as::<_, TrainingSession>(&format!(
            r#"
            UPDATE training_sessions
            SET status = ?, updated_at = ?
            WHERE id = ? AND status = ?
            RETURNING {SESSION_COLUMNS}
            "#
        ))
        .bind(to)
        .bind(Utc::now().naive_utc())
        .bind(id)
        .bind(from)
        .fetch_optional(executor)
        .await
        .map_err(AppError::Database)
    }

    /// Only a session still SCHEDULED is moved; `None` otherwise.
    pub async fn reschedule(
        pool: &SqlitePool,
        id: &str,
        scheduled_at: NaiveDateTime,
    ) -> AppResult<Option<TrainingSession>> {
        sqlx::query_as::<_, TrainingSession>(&format!(
            r#"
            UPDATE training_sessions
            SET scheduled_at = ?, updated_at = ?
            WHERE id = ? AND status = ?
            RETURNING {SESSION_COLUMNS}
            "#
        ))
        .bind(scheduled_at)
        .bind(Utc::now().naive_utc())
        .bind(id)
        .bind(SessionStatus::Scheduled)
        .fetch_optional(pool)
        .await
        .map_err(AppError::Database)
    }
}
