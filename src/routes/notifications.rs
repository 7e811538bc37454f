use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Query, State},
    routing::{get, post},
    Json, Router,
};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::db::{Notification, NotificationPriority, NotificationType};
use crate::error::AppResult;
use crate::routes::auth::{require_self_or_admin, require_staff, AuthUser};
use crate::services::notifications::{NotificationDraft, NotificationService, Pagination};
use crate::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route(
            "/",
            get(list_notifications)
                .post(send_notification)
                .put(update_notifications),
        )
        .route("/session", post(send_session_notifications))
        .route("/unread-count", get(unread_count))
}

// ============================================================================
// Request/Response Types
// ============================================================================

/// Pagination values stay raw strings so that garbage falls back to the
/// defaults instead of rejecting the request.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListNotificationsQuery {
    pub user_id: Option<String>,
    pub limit: Option<String>,
    pub offset: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnreadCountQuery {
    pub user_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendNotificationRequest {
    pub user_id: String,
    #[serde(rename = "type")]
    pub notification_type: String,
    pub title: String,
    pub message: String,
    pub data: Option<serde_json::Value>,
    pub priority: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum UpdateNotificationsRequest {
    #[serde(rename_all = "camelCase")]
    MarkRead { notification_id: String },
    #[serde(rename_all = "camelCase")]
    MarkAllRead { user_id: Option<String> },
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionNotificationsRequest {
    pub session_id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationResponse {
    pub id: String,
    pub user_id: String,
    #[serde(rename = "type")]
    pub notification_type: NotificationType,
    pub priority: NotificationPriority,
    pub title: String,
    pub message: String,
    pub data: Option<serde_json::Value>,
    pub is_read: bool,
    pub read_at: Option<NaiveDateTime>,
    pub created_at: NaiveDateTime,
}

impl From<Notification> for NotificationResponse {
    fn from(n: Notification) -> Self {
        let data = n.data_json();
        Self {
            id: n.id,
            user_id: n.user_id,
            notification_type: n.notification_type,
            priority: n.priority,
            title: n.title,
            message: n.message,
            data,
            is_read: n.is_read,
            read_at: n.read_at,
            created_at: n.created_at,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaginationResponse {
    pub limit: i64,
    pub offset: i64,
    pub total: i64,
    pub has_more: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationsListResponse {
    pub notifications: Vec<NotificationResponse>,
    pub unread_count: i64,
    pub pagination: PaginationResponse,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UnreadCountResponse {
    pub unread_count: i64,
}

#[derive(Debug, Serialize)]
pub struct ActionResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ActionResponse {
    fn ok() -> Self {
        Self {
            success: true,
            message: None,
        }
    }
}

// ============================================================================
// Handlers
// ============================================================================

/// List notifications for a user (the caller by default), newest first.
async fn list_notifications(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    Query(query): Query<ListNotificationsQuery>,
) -> AppResult<Json<NotificationsListResponse>> {
    let target = query.user_id.unwrap_or_else(|| user.id.clone());
    require_self_or_admin(&user, &target)?;

    let pagination = Pagination::from_raw(query.limit.as_deref(), query.offset.as_deref());
    let service = NotificationService::new(&state);
    let page = service.get_user_notifications(&target, pagination).await?;
    let unread_count = service.get_unread_notification_count(&target).await?;

    let has_more = page.has_more();
    Ok(Json(NotificationsListResponse {
        notifications: page.notifications.into_iter().map(Into::into).collect(),
        unread_count,
        pagination: PaginationResponse {
            limit: page.pagination.limit,
            offset: page.pagination.offset,
            total: page.total,
            has_more,
        },
    }))
}

async fn send_notification(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    payload: Result<Json<SendNotificationRequest>, JsonRejection>,
) -> AppResult<Json<ActionResponse>> {
    require_staff(&user)?;
    let Json(req) = payload?;

    NotificationService::new(&state)
        .send_notification(NotificationDraft {
            user_id: req.user_id,
            notification_type: req.notification_type,
            title: req.title,
            message: req.message,
            data: req.data,
            priority: req.priority,
        })
        .await?;

    Ok(Json(ActionResponse::ok()))
}

async fn update_notifications(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    payload: Result<Json<UpdateNotificationsRequest>, JsonRejection>,
) -> AppResult<Json<ActionResponse>> {
    let Json(req) = payload?;
    let service = NotificationService::new(&state);

    match req {
        UpdateNotificationsRequest::MarkRead { notification_id } => {
            let notification = service.find_notification(&notification_id).await?;
            require_self_or_admin(&user, &notification.user_id)?;
            service.mark_notification_as_read(&notification.id).await?;
        }
        UpdateNotificationsRequest::MarkAllRead { user_id } => {
            let target = user_id.unwrap_or_else(|| user.id.clone());
            require_self_or_admin(&user, &target)?;
            service.mark_all_notifications_as_read(&target).await?;
        }
    }

    Ok(Json(ActionResponse::ok()))
}

async fn send_session_notifications(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    payload: Result<Json<SessionNotificationsRequest>, JsonRejection>,
) -> AppResult<Json<ActionResponse>> {
    require_staff(&user)?;
    let Json(req) = payload?;

    let sent = NotificationService::new(&state)
        .send_session_notifications(&req.session_id)
        .await?;

    Ok(Json(ActionResponse {
        success: true,
        message: Some(format!("Sent {} session notifications", sent)),
    }))
}

async fn unread_count(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    Query(query): Query<UnreadCountQuery>,
) -> AppResult<Json<UnreadCountResponse>> {
    let target = query.user_id.unwrap_or_else(|| user.id.clone());
    require_self_or_admin(&user, &target)?;

    let unread_count = NotificationService::new(&state)
        .get_unread_notification_count(&target)
        .await?;
    Ok(Json(UnreadCountResponse { unread_count }))
}
