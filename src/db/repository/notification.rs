use chrono::Utc;
use sqlx::{Sqlite, SqliteConnection, SqlitePool};
use uuid::Uuid;

use crate::db::models::*;
use crate::error::{AppError, AppResult};

// ============================================================================
// Notification Repository
// ============================================================================

const NOTIFICATION_COLUMNS: &str = "id, user_id, notification_type, priority, title, message, \
                                    data, is_read, read_at, created_at";

pub struct NotificationRepository;

impl NotificationRepository {
    pub async fn insert<'e, E>(executor: E, notification: &NewNotification) -> AppResult<Notification>
    where
        E: sqlx::Executor<'e, Database = Sqlite>,
    {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now().naive_utc();
        let data = notification.data.as_ref().map(|v| v.to_string());

        sqlx::query_as::<_, Notification>(&format!(
            r#"
            INSERT INTO notifications (
                id, user_id, notification_type, priority, title, message,
                data, is_read, read_at, created_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, 0, NULL, ?)
            RETURNING {NOTIFICATION_COLUMNS}
            "#
        ))
        .bind(&id)
        .bind(&notification.user_id)
        .bind(notification.notification_type)
        .bind(notification.priority)
        .bind(&notification.title)
        .bind(&notification.message)
        .bind(data)
        .bind(now)
        .fetch_one(executor)
        .await
        .map_err(AppError::Database)
    }

    /// Persist one unread notification.
    pub async fn create(
        pool: &SqlitePool,
        notification: &NewNotification,
    ) -> AppResult<Notification> {
        Self::insert(pool, notification).await
    }

    /// Persist a batch of notifications atomically: either every row is
    /// written or none is.
    pub async fn create_many(
        pool: &SqlitePool,
        notifications: &[NewNotification],
    ) -> AppResult<Vec<Notification>> {
        let mut tx = pool.begin().await?;
        let created = Self::insert_all(&mut *tx, notifications).await?;
        tx.commit().await?;
        Ok(created)
    }

    /// Insert a batch on a connection the caller owns, usually an open
    /// transaction that also carries the write the batch announces.
    pub async fn insert_all(
        conn: &mut SqliteConnection,
        notifications: &[NewNotification],
    ) -> AppResult<Vec<Notification>> {
        let mut created = Vec::with_capacity(notifications.len());
        for notification in notifications {
            created.push(Self::insert(&mut *conn, notification).await?);
        }
        Ok(created)
    }

    pub async fn find_by_id(pool: &SqlitePool, id: &str) -> AppResult<Option<Notification>> {
        sqlx::query_as::<_, Notification>(&format!(
            "SELECT {NOTIFICATION_COLUMNS} FROM notifications WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(pool)
        .await
        .map_err(AppError::Database)
    }

    /// Notifications for a user, newest first. Rows created within the same
    /// clock tick keep insertion order (newest first) through `rowid`.
    pub async fn find_by_user_id(
        pool: &SqlitePool,
        user_id: &str,
        limit: i64,
        offset: i64,
    ) -> AppResult<Vec<Notification>> {
        sqlx::query_as::<_, Notification>(&format!(
            r#"
            SELECT {NOTIFICATION_COLUMNS}
            FROM notifications
            WHERE user_id = ?
            ORDER BY created_at DESC, rowid DESC
            LIMIT ?
            OFFSET ?
            "#
        ))
        .bind(user_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(pool)
        .await
        .map_err(AppError::Database)
    }

    pub async fn count_by_user_id(pool: &SqlitePool, user_id: &str) -> AppResult<i64> {
        sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM notifications WHERE user_id = ?")
            .bind(user_id)
            .fetch_one(pool)
            .await
            .map_err(AppError::Database)
    }

    pub async fn count_unread_by_user_id(pool: &SqlitePool, user_id: &str) -> AppResult<i64> {
        sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM notifications WHERE user_id = ? AND is_read = 0",
        )
        .bind(user_id)
        .fetch_one(pool)
        .await
        .map_err(AppError::Database)
    }

    /// Flip one notification to read. Returns `false` when nothing changed,
    /// either because it was already read or because it does not exist.
    pub async fn mark_read(pool: &SqlitePool, id: &str) -> AppResult<bool> {
        let now = Utc::now().naive_utc();
        let result = sqlx::query(
            "UPDATE notifications SET is_read = 1, read_at = ? WHERE id = ? AND is_read = 0",
        )
        .bind(now)
        .bind(id)
        .execute(pool)
        .await
        .map_err(AppError::Database)?;

        Ok(result.rows_affected() > 0)
    }

    /// Mark every unread notification of a user as read in one statement.
    /// Returns the number of notifications transitioned.
    pub async fn mark_all_read(pool: &SqlitePool, user_id: &str) -> AppResult<u64> {
        let now = Utc::now().naive_utc();
        let result = sqlx::query(
            "UPDATE notifications SET is_read = 1, read_at = ? WHERE user_id = ? AND is_read = 0",
        )
        .bind(now)
        .bind(user_id)
        .execute(pool)
        .await
        .map_err(AppError::Database)?;

        Ok(result.rows_affected())
    }
}
