use chrono::Utc;
use sqlx::{Sqlite, SqlitePool};
use uuid::Uuid;

use crate::db::models::*;
use crate::error::{AppError, AppResult};

// ============================================================================
// Document Repository
// ============================================================================

const DOCUMENT_COLUMNS: &str = "id, title, description, category, file_url, mime_type, \
                                file_size, uploaded_by, owner_id, created_at, updated_at";

pub struct DocumentRepository;

impl DocumentRepository {
    pub async fn create<'e, E>(executor: E, document: CreateDocument) -> AppResult<Document>
    where
        E: sqlx::Executor<'e, Database = Sqlite>,
    {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now().naive_utc();

        sqlx::query_as::<_, Document>(&format!(
            r#"
            INSERT INTO documents (
                id, title, description, category, file_url, mime_type,
                file_size, uploaded_by, owner_id, created_at, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            RETURNING {DOCUMENT_COLUMNS}
            "#
        ))
        .bind(&id)
        .bind(&document.title)
        .bind(&document.description)
        .bind(document.category)
        .bind(&document.file_url)
        .bind(&document.mime_type)
        .bind(document.file_size)
        .bind(&document.uploaded_by)
        .bind(&document.owner_id)
        .bind(now)
        .bind(now)
        .fetch_one(executor)
        .await
        .map_err(AppError::Database)
    }

    pub async fn find_by_id(pool: &SqlitePool, id: &str) -> AppResult<Option<Document>> {
        sqlx::query_as::<_, Document>(&format!(
            "SELECT {DOCUMENT_COLUMNS} FROM documents WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(pool)
        .await
        .map_err(AppError::Database)
    }

    /// List documents, newest first.
    ///
    /// `visible_to` restricts the result to the shared library plus documents
    /// owned by that student; `owner_id` selects one student's documents only.
    pub async fn list(
        pool: &SqlitePool,
        category: Option<DocumentCategory>,
        owner_id: Option<&str>,
        visible_to: Option<&str>,
    ) -> AppResult<Vec<Document>> {
        sqlx::query_as::<_, Document>(&format!(
            r#"
            SELECT {DOCUMENT_COLUMNS}
            FROM documents
            WHERE (?1 IS NULL OR category = ?1)
            AND (?2 IS NULL OR owner_id = ?2)
            AND (?3 IS NULL OR owner_id IS NULL OR owner_id = ?3)
            ORDER BY created_at DESC, rowid DESC
            "#
        ))
        .bind(category)
        .bind(owner_id)
        .bind(visible_to)
        .fetch_all(pool)
        .await
        .map_err(AppError::Database)
    }

    pub async fn update(
        pool: &SqlitePool,
        id: &str,
        update: UpdateDocument,
    ) -> AppResult<Option<Document>> {
        sqlx::query_as::<_, Document>(&format!(
            r#"
            UPDATE documents
            SET
                title = COALESCE(?, title),
                description = COALESCE(?, description),
                category = COALESCE(?, category),
                file_url = COALESCE(?, file_url),
                updated_at = ?
            WHERE id = ?
            RETURNING {DOCUMENT_COLUMNS}
            "#
        ))
        .bind(update.title)
        .bind(update.description)
        .bind(update.category)
        .bind(update.file_url)
        .bind(Utc::now().naive_utc())
        .bind(id)
        .fetch_optional(pool)
        .await
        .map_err(AppError::Database)
    }

    pub async fn delete(pool: &SqlitePool, id: &str) -> AppResult<bool> {
        let result = sqlx::query("DELETE FROM documents WHERE id = ?")
            .bind(id)
            .execute(pool)
            .await
            .map_err(AppError::Database)?;
        Ok(result.rows_affected() > 0)
    }
}
