use chrono::Utc;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::db::models::*;
use crate::error::{AppError, AppResult};

// ============================================================================
// Video Repository
// ============================================================================

const ROOM_COLUMNS: &str = "id, session_id, room_name, status, started_at, ended_at";
const PARTICIPANT_COLUMNS: &str = "room_id, user_id, joined_at, left_at";

pub struct VideoRepository;

impl VideoRepository {
    pub async fn create_room(
        pool: &SqlitePool,
        session_id: &str,
        room_name: &str,
    ) -> AppResult<VideoRoom> {
        let id = Uuid::new_v4().to_string();

        sqlx::query_as::<_, VideoRoom>(&format!(
            r#"
            INSERT INTO video_rooms (id, session_id, room_name, status, started_at, ended_at)
            VALUES (?, ?, ?, ?, ?, NULL)
            RETURNING {ROOM_COLUMNS}
            "#
        ))
        .bind(&id)
        .bind(session_id)
        .bind(room_name)
        .bind(VideoRoomStatus::Open)
        .bind(Utc::now().naive_utc())
        .fetch_one(pool)
        .await
        .map_err(|e| {
            AppError::unique_violation(e, || {
                format!("Session {} already has an open video room", session_id)
            })
        })
    }

    pub async fn find_room(pool: &SqlitePool, id: &str) -> AppResult<Option<VideoRoom>> {
        sqlx::query_as::<_, VideoRoom>(&format!(
            "SELECT {ROOM_COLUMNS} FROM video_rooms WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(pool)
        .await
        .map_err(AppError::Database)
    }

    pub async fn find_room_by_name(
        pool: &SqlitePool,
        room_name: &str,
    ) -> AppResult<Option<VideoRoom>> {
        sqlx::query_as::<_, VideoRoom>(&format!(
            "SELECT {ROOM_COLUMNS} FROM video_rooms WHERE room_name = ?"
        ))
        .bind(room_name)
        .fetch_optional(pool)
        .await
        .map_err(AppError::Database)
    }

    pub async fn find_open_room_for_session(
        pool: &SqlitePool,
        session_id: &str,
    ) -> AppResult<Option<VideoRoom>> {
        sqlx::query_as::<_, VideoRoom>(&format!(
            "SELECT {ROOM_COLUMNS} FROM video_rooms WHERE session_id = ? AND status = 'OPEN'"
        ))
        .bind(session_id)
        .fetch_optional(pool)
        .await
        .map_err(AppError::Database)
    }

    /// Record a participant joining. Re-joining clears a previous `left_at`
    /// and refreshes `joined_at`.
    pub async fn join(
        pool: &SqlitePool,
        room_id: &str,
        user_id: &str,
    ) -> AppResult<VideoParticipant> {
        sqlx::query_as::<_, VideoParticipant>(&format!(
            r#"
            INSERT INTO video_participants (room_id, user_id, joined_at, left_at)
            VALUES (?, ?, ?, NULL)
            ON CONFLICT (room_id, user_id) DO UPDATE SET
                joined_at = excluded.joined_at,
                left_at = NULL
            RETURNING {PARTICIPANT_COLUMNS}
            "#
        ))
        .bind(room_id)
        .bind(user_id)
        .bind(Utc::now().naive_utc())
        .fetch_one(pool)
        .await
        .map_err(AppError::Database)
    }

    /// Returns `false` when the user was not present in the room.
    pub async fn leave(pool: &SqlitePool, room_id: &str, user_id: &str) -> AppResult<bool> {
        let result = sqlx::query(
            "UPDATE video_participants SET left_at = ? \
             WHERE room_id = ? AND user_id = ? AND left_at IS NULL",
        )
        .bind(Utc::now().naive_utc())
        .bind(room_id)
        .bind(user_id)
        .execute(pool)
        .await
        .map_err(AppError::Database)?;

        Ok(result.rows_affected() > 0)
    }

    /// Close the room and stamp `left_at` on everyone still present.
    pub async fn close_room(pool: &SqlitePool, room_id: &str) -> AppResult<VideoRoom> {
        let now = Utc::now().naive_utc();
        let mut tx = pool.begin().await?;

        sqlx::query(
            "UPDATE video_participants SET left_at = ? WHERE room_id = ? AND left_at IS NULL",
        )
        .bind(now)
        .bind(room_id)
        .execute(&mut *tx)
        .await?;

        let room = sqlx::query_as::<_, VideoRoom>(&format!(
            r#"
            UPDATE video_rooms
            SET status = ?, ended_at = COALESCE(ended_at, ?)
            WHERE id = ?
            RETURNING {ROOM_COLUMNS}
            "#
        ))
        .bind(VideoRoomStatus::Closed)
        .bind(now)
        .bind(room_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Video room {}", room_id)))?;

        tx.commit().await?;
        Ok(room)
    }

    pub async fn participants(
        pool: &SqlitePool,
        room_id: &str,
    ) -> AppResult<Vec<VideoParticipant>> {
        sqlx::query_as::<_, VideoParticipant>(&format!(
            "SELECT {PARTICIPANT_COLUMNS} FROM video_participants WHERE room_id = ? ORDER BY joined_at"
        ))
        .bind(room_id)
        .fetch_all(pool)
        .await
        .map_err(AppError::Database)
    }
}
