use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::db::{SessionStatus, TrainingSession};
use crate::error::AppResult;
use crate::routes::auth::AuthUser;
use crate::services::sessions::{NewSession, SessionDetails, SessionService};
use crate::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(list_sessions).post(create_session))
        .route("/:id", get(get_session).put(update_session))
}

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ListSessionsQuery {
    pub status: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionRequest {
    pub title: String,
    pub consultant_id: Option<String>,
    pub scheduled_at: DateTime<Utc>,
    pub duration_minutes: Option<i64>,
    #[serde(default)]
    pub participant_ids: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum SessionAction {
    #[serde(rename_all = "camelCase")]
    Reschedule { scheduled_at: DateTime<Utc> },
    Cancel,
    Start,
    Complete,
    #[serde(rename_all = "camelCase")]
    AddParticipant { user_id: String },
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionResponse {
    pub id: String,
    pub title: String,
    pub consultant_id: String,
    pub scheduled_at: NaiveDateTime,
    pub duration_minutes: i64,
    pub status: SessionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub participant_ids: Option<Vec<String>>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl From<TrainingSession> for SessionResponse {
    fn from(s: TrainingSession) -> Self {
        Self {
            id: s.id,
            title: s.title,
            consultant_id: s.consultant_id,
            scheduled_at: s.scheduled_at,
            duration_minutes: s.duration_minutes,
            status: s.status,
            participant_ids: None,
            created_at: s.created_at,
            updated_at: s.updated_at,
        }
    }
}

impl From<SessionDetails> for SessionResponse {
    fn from(details: SessionDetails) -> Self {
        Self {
            participant_ids: Some(details.participant_ids),
            ..details.session.into()
        }
    }
}

// ============================================================================
// Handlers
// ============================================================================

async fn list_sessions(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    Query(query): Query<ListSessionsQuery>,
) -> AppResult<Json<Vec<SessionResponse>>> {
    let status = query
        .status
        .as_deref()
        .map(str::parse::<SessionStatus>)
        .transpose()?;
    let sessions = SessionService::list(&state, &user, status).await?;
    Ok(Json(sessions.into_iter().map(Into::into).collect()))
}

async fn create_session(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    payload: Result<Json<CreateSessionRequest>, JsonRejection>,
) -> AppResult<impl IntoResponse> {
    let Json(req) = payload?;
    let details = SessionService::create(
        &state,
        &user,
        NewSession {
            title: req.title,
            consultant_id: req.consultant_id,
            scheduled_at: req.scheduled_at.naive_utc(),
            duration_minutes: req.duration_minutes,
            participant_ids: req.participant_ids,
        },
    )
    .await?;

    Ok((StatusCode::CREATED, Json(SessionResponse::from(details))))
}

async fn get_session(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    Path(id): Path<String>,
) -> AppResult<Json<SessionResponse>> {
    let details = SessionService::get(&state, &user, &id).await?;
    Ok(Json(details.into()))
}

async fn update_session(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    Path(id): Path<String>,
    payload: Result<Json<SessionAction>, JsonRejection>,
) -> AppResult<Json<SessionResponse>> {
    let Json(action) = payload?;

    let details = match action {
        SessionAction::Reschedule { scheduled_at } => {
            SessionService::reschedule(&state, &user, &id, scheduled_at.naive_utc()).await?
        }
        SessionAction::Cancel => {
            SessionService::transition(&state, &user, &id, SessionStatus::Cancelled).await?
        }
        SessionAction::Start => {
            SessionService::transition(&state, &user, &id, SessionStatus::InProgress).await?
        }
        SessionAction::Complete => {
            SessionService::transition(&state, &user, &id, SessionStatus::Completed).await?
        }
        SessionAction::AddParticipant { user_id } => {
            SessionService::add_participant(&state, &user, &id, &user_id).await?
        }
    };

    Ok(Json(details.into()))
}

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;
    use chrono::{Duration, Utc};
    use serde_json::json;

    use crate::db::UserRole;
    use crate::testing::TestApp;

    #[tokio::test]
    async fn schedule_start_complete() {
        let app = TestApp::new().await;
        let consultant = app.user("c@example.com", UserRole::Consultant).await;
        let student = app.user("s@example.com", UserRole::Student).await;
        let token = app.token(&consultant);

        let (status, body) = app
            .post(
                "/api/sessions",
                Some(&token),
                json!({
                    "title": "Bilateral stimulation lab",
                    "scheduledAt": (Utc::now() + Duration::days(1)).to_rfc3339(),
                    "participantIds": [student.id]
                }),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["status"], "SCHEDULED");
        assert_eq!(body["durationMinutes"], 60);
        let path = format!("/api/sessions/{}", body["id"].as_str().unwrap());

        let (status, body) = app.put(&path, Some(&token), json!({ "action": "start" })).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "IN_PROGRESS");

        let (status, body) = app.put(&path, Some(&token), json!({ "action": "complete" })).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "COMPLETED");

        let (status, body) = app.put(&path, Some(&token), json!({ "action": "cancel" })).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"]["code"], "CONFLICT");

        let (_, body) = app
            .get("/api/notifications", Some(&app.token(&student)))
            .await;
        assert_eq!(body["notifications"][0]["type"], "SESSION_COMPLETED");

        let (status, body) = app.get(&path, Some(&app.token(&student))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["participantIds"], json!([student.id]));
    }

    #[tokio::test]
    async fn unknown_action_is_rejected() {
        let app = TestApp::new().await;
        let consultant = app.user("c@example.com", UserRole::Consultant).await;
        let (status, _) = app
            .put(
                "/api/sessions/whatever",
                Some(&app.token(&consultant)),
                json!({ "action": "teleport" }),
            )
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn students_cannot_create_sessions() {
        let app = TestApp::new().await;
        let student = app.user("s@example.com", UserRole::Student).await;
        let (status, _) = app
            .post(
                "/api/sessions",
                Some(&app.token(&student)),
                json!({
                    "title": "Self-study",
                    "scheduledAt": (Utc::now() + Duration::days(1)).to_rfc3339()
                }),
            )
            .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }
}
