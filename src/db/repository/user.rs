use chrono::Utc;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::db::models::*;
use crate::error::{AppError, AppResult};

// ============================================================================
// User Repository
// ============================================================================

const USER_COLUMNS: &str = "id, email, password_hash, role, first_name, last_name, phone, \
                            created_at, updated_at";

pub struct UserRepository;

impl UserRepository {
    pub async fn create(pool: &SqlitePool, user: CreateUser) -> AppResult<User> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now().naive_utc();

        sqlx::query_as::<_, User>(&format!(
            r#"
            INSERT INTO users (
                id, email, password_hash, role, first_name, last_name, phone,
                created_at, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(&id)
        .bind(user.email.to_lowercase())
        .bind(&user.password_hash)
        .bind(user.role)
        .bind(&user.first_name)
        .bind(&user.last_name)
        .bind(&user.phone)
        .bind(now)
        .bind(now)
        .fetch_one(pool)
        .await
        .map_err(|e| {
            AppError::unique_violation(e, || format!("Email {} is already registered", user.email))
        })
    }

    pub async fn find_by_id(pool: &SqlitePool, id: &str) -> AppResult<Option<User>> {
        sqlx::query_as::<_, User>(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?"))
            .bind(id)
            .fetch_optional(pool)
            .await
            .map_err(AppError::Database)
    }

    /// Emails are stored lower-case, so lookups are case-insensitive.
    pub async fn find_by_email(pool: &SqlitePool, email: &str) -> AppResult<Option<User>> {
        sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE email = ?"
        ))
        .bind(email.trim().to_lowercase())
        .fetch_optional(pool)
        .await
        .map_err(AppError::Database)
    }

    /// Search users by name or email substring, optionally restricted to one role.
    /// Results are ordered by last name, then first name.
    pub async fn search(
        pool: &SqlitePool,
        query: Option<&str>,
        role: Option<UserRole>,
        limit: i64,
        offset: i64,
    ) -> AppResult<Vec<User>> {
        let pattern = query
            .map(str::trim)
            .filter(|q| !q.is_empty())
            .map(|q| format!("%{}%", q.to_lowercase()));

        sqlx::query_as::<_, User>(&format!(
            r#"
            SELECT {USER_COLUMNS}
            FROM users
            WHERE (?1 IS NULL
                   OR LOWER(first_name) LIKE ?1
                   OR LOWER(last_name) LIKE ?1
                   OR email LIKE ?1)
            AND (?2 IS NULL OR role = ?2)
            ORDER BY last_name ASC, first_name ASC
            LIMIT ?3
            OFFSET ?4
            "#
        ))
        .bind(pattern)
        .bind(role)
        .bind(limit)
        .bind(offset)
        .fetch_all(pool)
        .await
        .map_err(AppError::Database)
    }

    pub async fn update_profile(
        pool: &SqlitePool,
        id: &str,
        update: UpdateUserProfile,
    ) -> AppResult<Option<User>> {
        let now = Utc::now().naive_utc();

        sqlx::query_as::<_, User>(&format!(
            r#"
            UPDATE users
            SET
                first_name = COALESCE(?, first_name),
                last_name = COALESCE(?, last_name),
                phone = COALESCE(?, phone),
                updated_at = ?
            WHERE id = ?
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(update.first_name)
        .bind(update.last_name)
        .bind(update.phone)
        .bind(now)
        .bind(id)
        .fetch_optional(pool)
        .await
        .map_err(AppError::Database)
    }

    pub async fn update_password(
        pool: &SqlitePool,
        id: &str,
        password_hash: &str,
    ) -> AppResult<()> {
        let now = Utc::now().naive_utc();
        let result = sqlx::query("UPDATE users SET password_hash = ?, updated_at = ? WHERE id = ?")
            .bind(password_hash)
            .bind(now)
            .bind(id)
            .execute(pool)
            .await
            .map_err(AppError::Database)?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("User {}", id)));
        }
        Ok(())
    }
}
