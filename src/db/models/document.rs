use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DocumentCategory {
    Manual,
    Worksheet,
    Protocol,
    Certificate,
    #[default]
    Other,
}

text_enum!(DocumentCategory, "document category", {
    Manual => "MANUAL",
    Worksheet => "WORKSHEET",
    Protocol => "PROTOCOL",
    Certificate => "CERTIFICATE",
    Other => "OTHER",
});

/// Document metadata. The file itself lives in external storage at `file_url`.
#[derive(Debug, Clone, FromRow)]
pub struct Document {
    pub id: String,
    pub title: String,
    pub description: Option<String>,
    pub category: DocumentCategory,
    pub file_url: String,
    pub mime_type: Option<String>,
    pub file_size: Option<i64>,
    pub uploaded_by: String,
    /// Student the document belongs to; `None` means the shared library.
    pub owner_id: Option<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Clone)]
pub struct CreateDocument {
    pub title: String,
    pub description: Option<String>,
    pub category: DocumentCategory,
    pub file_url: String,
    pub mime_type: Option<String>,
    pub file_size: Option<i64>,
    pub uploaded_by: String,
    pub owner_id: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct UpdateDocument {
    pub title: Option<String>,
    pub description: Option<String>,
    pub category: Option<DocumentCategory>,
    pub file_url: Option<String>,
}
