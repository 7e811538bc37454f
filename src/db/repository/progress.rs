use chrono::Utc;
use sqlx::{Sqlite, SqlitePool};
use uuid::Uuid;

use crate::db::models::*;
use crate::error::{AppError, AppResult};

// ============================================================================
// Progress Repository
// ============================================================================

const PROGRESS_COLUMNS: &str = "id, student_id, module_key, status, score, practice_hours, \
                                completed_at, created_at, updated_at";

pub struct ProgressRepository;

impl ProgressRepository {
    pub async fn list_for_student(
        pool: &SqlitePool,
        student_id: &str,
    ) -> AppResult<Vec<ProgressRecord>> {
        sqlx::query_as::<_, ProgressRecord>(&format!(
            "SELECT {PROGRESS_COLUMNS} FROM progress_records WHERE student_id = ? ORDER BY module_key"
        ))
        .bind(student_id)
        .fetch_all(pool)
        .await
        .map_err(AppError::Database)
    }

    /// Insert or update the record for (student, module).
    ///
    /// `completed_at` keeps its first value while the module stays COMPLETED
    /// and is cleared when the status moves away from COMPLETED. A missing
    /// `practice_hours` leaves the stored value unchanged.
    ///
    /// The flag is true when this statement is the one that moved the record
    /// into COMPLETED, i.e. the stored `completed_at` is the one it wrote.
    pub async fn upsert<'e, E>(
        executor: E,
        progress: UpsertProgress,
    ) -> AppResult<(ProgressRecord, bool)>
    where
        E: sqlx::Executor<'e, Database = Sqlite>,
    {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now().naive_utc();
        let completed_at = (progress.status == ProgressStatus::Completed).then_some(now);

        let record = sqlx::query_as::<_, ProgressRecord>(&format!(
            r#"
            INSERT INTO progress_records (
                id, student_id, module_key, status, score, practice_hours,
                completed_at, created_at, updated_at
            )
            VALUES (?1, ?2, ?3, ?4, ?5, COALESCE(?6, 0), ?7, ?8, ?8)
            ON CONFLICT (student_id, module_key) DO UPDATE SET
                status = excluded.status,
                score = COALESCE(?5, progress_records.score),
                practice_hours = COALESCE(?6, progress_records.practice_hours),
                completed_at = CASE
                    WHEN excluded.status = 'COMPLETED'
                        THEN COALESCE(progress_records.completed_at, excluded.completed_at)
                    ELSE NULL
                END,
                updated_at = excluded.updated_at
            RETURNING {PROGRESS_COLUMNS}
            "#
        ))
        .bind(&id)
        .bind(&progress.student_id)
        .bind(&progress.module_key)
        .bind(progress.status)
        .bind(progress.score)
        .bind(progress.practice_hours)
        .bind(completed_at)
        .bind(now)
        .fetch_one(executor)
        .await
        .map_err(AppError::Database)?;

        let newly_completed = completed_at.is_some() && record.completed_at == completed_at;
        Ok((record, newly_completed))
    }
}
