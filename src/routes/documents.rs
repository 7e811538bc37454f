use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::db::{
    CreateDocument, Document, DocumentCategory, DocumentRepository, NewNotification,
    NotificationPriority, NotificationRepository, NotificationType, UpdateDocument, User,
    UserRepository,
};
use crate::error::{AppError, AppResult};
use crate::routes::auth::{require_self_or_staff, require_staff, AuthUser};
use crate::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(list_documents).post(create_document))
        .route(
            "/:id",
            get(get_document).put(update_document).delete(delete_document),
        )
}

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListDocumentsQuery {
    pub category: Option<String>,
    pub student_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateDocumentRequest {
    pub title: String,
    pub description: Option<String>,
    pub category: Option<String>,
    pub file_url: String,
    pub mime_type: Option<String>,
    pub file_size: Option<i64>,
    pub owner_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateDocumentRequest {
    pub title: Option<String>,
    pub description: Option<String>,
    pub category: Option<String>,
    pub file_url: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentResponse {
    pub id: String,
    pub title: String,
    pub description: Option<String>,
    pub category: DocumentCategory,
    pub file_url: String,
    pub mime_type: Option<String>,
    pub file_size: Option<i64>,
    pub uploaded_by: String,
    pub owner_id: Option<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl From<Document> for DocumentResponse {
    fn from(d: Document) -> Self {
        Self {
            id: d.id,
            title: d.title,
            description: d.description,
            category: d.category,
            file_url: d.file_url,
            mime_type: d.mime_type,
            file_size: d.file_size,
            uploaded_by: d.uploaded_by,
            owner_id: d.owner_id,
            created_at: d.created_at,
            updated_at: d.updated_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct DeleteResponse {
    pub success: bool,
}

fn validate_file_url(raw: &str) -> AppResult<String> {
    let url = url::Url::parse(raw.trim())
        .map_err(|_| AppError::Validation(format!("invalid fileUrl: '{}'", raw)))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(AppError::Validation(
            "fileUrl must be an http(s) URL".to_string(),
        ));
    }
    Ok(url.to_string())
}

/// Students see the shared library and their own documents.
fn can_view(user: &User, document: &Document) -> bool {
    user.is_staff() || document.owner_id.as_deref().map_or(true, |owner| owner == user.id)
}

// ============================================================================
// Handlers
// ============================================================================

async fn list_documents(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    Query(query): Query<ListDocumentsQuery>,
) -> AppResult<Json<Vec<DocumentResponse>>> {
    let category = query
        .category
        .as_deref()
        .map(str::parse::<DocumentCategory>)
        .transpose()?;
    if let Some(student_id) = query.student_id.as_deref() {
        require_self_or_staff(&user, student_id)?;
    }
    let visible_to = (!user.is_staff()).then_some(user.id.as_str());

    let documents = DocumentRepository::list(
        &state.db,
        category,
        query.student_id.as_deref(),
        visible_to,
    )
    .await?;

    Ok(Json(documents.into_iter().map(Into::into).collect()))
}

async fn create_document(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    payload: Result<Json<CreateDocumentRequest>, JsonRejection>,
) -> AppResult<impl IntoResponse> {
    require_staff(&user)?;
    let Json(req) = payload?;

    let title = req.title.trim().to_string();
    if title.is_empty() {
        return Err(AppError::Validation("title must not be empty".to_string()));
    }
    let category = req
        .category
        .as_deref()
        .map(str::parse::<DocumentCategory>)
        .transpose()?
        .unwrap_or_default();
    let file_url = validate_file_url(&req.file_url)?;
    if req.file_size.is_some_and(|size| size < 0) {
        return Err(AppError::Validation("fileSize must not be negative".to_string()));
    }

    let owner = match req.owner_id.as_deref() {
        Some(owner_id) => Some(
            UserRepository::find_by_id(&state.db, owner_id)
                .await?
                .ok_or_else(|| AppError::NotFound(format!("User {}", owner_id)))?,
        ),
        None => None,
    };

    let mut tx = state.db.begin().await?;
    let document = DocumentRepository::create(
        &mut *tx,
        CreateDocument {
            title,
            description: req.description,
            category,
            file_url,
            mime_type: req.mime_type,
            file_size: req.file_size,
            uploaded_by: user.id.clone(),
            owner_id: owner.as_ref().map(|o| o.id.clone()),
        },
    )
    .await?;

    if let Some(owner) = owner {
        NotificationRepository::insert(
            &mut *tx,
            &NewNotification {
                user_id: owner.id,
                notification_type: NotificationType::DocumentShared,
                priority: NotificationPriority::Normal,
                title: format!("New document: {}", document.title),
                message: format!(
                    "{} shared \"{}\" with you.",
                    user.full_name(),
                    document.title
                ),
                data: Some(serde_json::json!({
                    "documentId": document.id,
                    "category": document.category,
                })),
            },
        )
        .await?;
    }
    tx.commit().await?;
    tracing::info!("Document {} uploaded by {}", document.id, user.id);

    Ok((StatusCode::CREATED, Json(DocumentResponse::from(document))))
}

async fn get_document(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    Path(id): Path<String>,
) -> AppResult<Json<DocumentResponse>> {
    let document = DocumentRepository::find_by_id(&state.db, &id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Document {}", id)))?;
    if !can_view(&user, &document) {
        return Err(AppError::Forbidden);
    }
    Ok(Json(document.into()))
}

async fn update_document(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    Path(id): Path<String>,
    payload: Result<Json<UpdateDocumentRequest>, JsonRejection>,
) -> AppResult<Json<DocumentResponse>> {
    require_staff(&user)?;
    let Json(req) = payload?;

    let update = UpdateDocument {
        title: req.title.map(|t| t.trim().to_string()).filter(|t| !t.is_empty()),
        description: req.description,
        category: req
            .category
            .as_deref()
            .map(str::parse::<DocumentCategory>)
            .transpose()?,
        file_url: req.file_url.as_deref().map(validate_file_url).transpose()?,
    };

    let document = DocumentRepository::update(&state.db, &id, update)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Document {}", id)))?;
    Ok(Json(document.into()))
}

async fn delete_document(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    Path(id): Path<String>,
) -> AppResult<Json<DeleteResponse>> {
    require_staff(&user)?;
    if !DocumentRepository::delete(&state.db, &id).await? {
        return Err(AppError::NotFound(format!("Document {}", id)));
    }
    tracing::info!("Document {} deleted by {}", id, user.id);
    Ok(Json(DeleteResponse { success: true }))
}

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;
    use serde_json::json;

    use crate::db::{
        CreateDocument, DocumentCategory, DocumentRepository, NewNotification,
        NotificationPriority, NotificationRepository, NotificationType, UserRole,
    };
    use crate::testing::TestApp;

    #[tokio::test]
    async fn sharing_a_document_notifies_the_owner() {
        let app = TestApp::new().await;
        let consultant = app.user("c@example.com", UserRole::Consultant).await;
        let student = app.user("s@example.com", UserRole::Student).await;
        let other = app.user("o@example.com", UserRole::Student).await;
        let staff = app.token(&consultant);

        let (status, body) = app
            .post(
                "/api/documents",
                Some(&staff),
                json!({
                    "title": "Safe place worksheet",
                    "category": "worksheet",
                    "fileUrl": "https://files.example.com/safe-place.pdf",
                    "ownerId": student.id
                }),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["category"], "WORKSHEET");
        let private_id = body["id"].as_str().unwrap().to_string();

        let (status, _) = app
            .post(
                "/api/documents",
                Some(&staff),
                json!({
                    "title": "Standard protocol",
                    "category": "PROTOCOL",
                    "fileUrl": "https://files.example.com/protocol.pdf"
                }),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED);

        let (_, body) = app
            .get("/api/notifications", Some(&app.token(&student)))
            .await;
        assert_eq!(body["unreadCount"], 1);
        assert_eq!(body["notifications"][0]["type"], "DOCUMENT_SHARED");

        let (_, body) = app.get("/api/documents", Some(&app.token(&student))).await;
        assert_eq!(body.as_array().unwrap().len(), 2);

        let other_token = app.token(&other);
        let (_, body) = app.get("/api/documents", Some(&other_token)).await;
        assert_eq!(body.as_array().unwrap().len(), 1);
        let (status, _) = app
            .get(&format!("/api/documents/{}", private_id), Some(&other_token))
            .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn invalid_input_is_rejected() {
        let app = TestApp::new().await;
        let consultant = app.user("c@example.com", UserRole::Consultant).await;
        let staff = app.token(&consultant);

        let (status, _) = app
            .post(
                "/api/documents",
                Some(&staff),
                json!({ "title": "x", "category": "MEME", "fileUrl": "https://a.example/x" }),
            )
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = app
            .post(
                "/api/documents",
                Some(&staff),
                json!({ "title": "x", "fileUrl": "ftp://a.example/x" }),
            )
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn update_and_delete() {
        let app = TestApp::new().await;
        let consultant = app.user("c@example.com", UserRole::Consultant).await;
        let staff = app.token(&consultant);
        let (_, body) = app
            .post(
                "/api/documents",
                Some(&staff),
                json!({ "title": "Manual v1", "fileUrl": "https://a.example/m.pdf" }),
            )
            .await;
        let path = format!("/api/documents/{}", body["id"].as_str().unwrap());

        let (status, body) = app
            .put(&path, Some(&staff), json!({ "title": "Manual v2", "category": "MANUAL" }))
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["title"], "Manual v2");
        assert_eq!(body["category"], "MANUAL");

        let (status, _) = app.delete(&path, Some(&staff)).await;
        assert_eq!(status, StatusCode::OK);
        let (status, _) = app.delete(&path, Some(&staff)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn document_is_not_kept_when_its_notification_fails() {
        let app = TestApp::new().await;
        let consultant = app.user("c@example.com", UserRole::Consultant).await;

        let mut tx = app.state.db.begin().await.unwrap();
        let document = DocumentRepository::create(
            &mut *tx,
            CreateDocument {
                title: "Target memory log".to_string(),
                description: None,
                category: DocumentCategory::Worksheet,
                file_url: "https://files.example.com/log.pdf".to_string(),
                mime_type: None,
                file_size: None,
                uploaded_by: consultant.id.clone(),
                owner_id: None,
            },
        )
        .await
        .unwrap();
        let failed = NotificationRepository::insert(
            &mut *tx,
            &NewNotification {
                user_id: "deleted-user".to_string(),
                notification_type: NotificationType::DocumentShared,
                priority: NotificationPriority::Normal,
                title: "New document".to_string(),
                message: "Shared with you".to_string(),
                data: None,
            },
        )
        .await;
        assert!(failed.is_err());
        drop(tx);

        let stored = DocumentRepository::find_by_id(&app.state.db, &document.id)
            .await
            .unwrap();
        assert!(stored.is_none());
    }
}
