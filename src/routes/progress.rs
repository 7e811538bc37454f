use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Query, State},
    routing::get,
    Json, Router,
};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::db::{
    NewNotification, NotificationPriority, NotificationRepository, NotificationType,
    ProgressRecord, ProgressRepository, ProgressStatus, ProgressSummary, UpsertProgress,
    UserRepository,
};
use crate::error::{AppError, AppResult};
use crate::routes::auth::{require_self_or_staff, AuthUser};
use crate::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/", get(get_progress).put(upsert_progress))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressQuery {
    pub student_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpsertProgressRequest {
    pub student_id: Option<String>,
    pub module_key: String,
    pub status: String,
    pub score: Option<i64>,
    pub practice_hours: Option<f64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressRecordResponse {
    pub id: String,
    pub student_id: String,
    pub module_key: String,
    pub status: ProgressStatus,
    pub score: Option<i64>,
    pub practice_hours: f64,
    pub completed_at: Option<NaiveDateTime>,
    pub updated_at: NaiveDateTime,
}

impl From<ProgressRecord> for ProgressRecordResponse {
    fn from(r: ProgressRecord) -> Self {
        Self {
            id: r.id,
            student_id: r.student_id,
            module_key: r.module_key,
            status: r.status,
            score: r.score,
            practice_hours: r.practice_hours,
            completed_at: r.completed_at,
            updated_at: r.updated_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ProgressResponse {
    pub records: Vec<ProgressRecordResponse>,
    pub summary: ProgressSummary,
}

async fn get_progress(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    Query(query): Query<ProgressQuery>,
) -> AppResult<Json<ProgressResponse>> {
    let student_id = query.student_id.unwrap_or_else(|| user.id.clone());
    require_self_or_staff(&user, &student_id)?;

    let records = ProgressRepository::list_for_student(&state.db, &student_id).await?;
    let summary = ProgressSummary::from_records(&records);

    Ok(Json(ProgressResponse {
        records: records.into_iter().map(Into::into).collect(),
        summary,
    }))
}

async fn upsert_progress(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    payload: Result<Json<UpsertProgressRequest>, JsonRejection>,
) -> AppResult<Json<ProgressRecordResponse>> {
    let Json(req) = payload?;
    let student_id = req.student_id.unwrap_or_else(|| user.id.clone());
    require_self_or_staff(&user, &student_id)?;

    let status: ProgressStatus = req.status.parse()?;
    let module_key = req.module_key.trim().to_string();
    if module_key.is_empty() {
        return Err(AppError::Validation("moduleKey must not be empty".to_string()));
    }
    if req.score.is_some_and(|s| !(0..=100).contains(&s)) {
        return Err(AppError::Validation(
            "score must be between 0 and 100".to_string(),
        ));
    }
    if req.practice_hours.is_some_and(|h| !h.is_finite() || h < 0.0) {
        return Err(AppError::Validation(
            "practiceHours must not be negative".to_string(),
        ));
    }

    if UserRepository::find_by_id(&state.db, &student_id)
        .await?
        .is_none()
    {
        return Err(AppError::NotFound(format!("Student {}", student_id)));
    }

    // The upsert takes the write lock first, so a concurrent completion of the
    // same module waits and then sees the stored completion.
    let mut tx = state.db.begin().await?;
    let (record, newly_completed) = ProgressRepository::upsert(
        &mut *tx,
        UpsertProgress {
            student_id: student_id.clone(),
            module_key,
            status,
            score: req.score,
            practice_hours: req.practice_hours,
        },
    )
    .await?;

    if newly_completed {
        let milestone = NotificationRepository::insert(
            &mut *tx,
            &NewNotification {
                user_id: student_id,
                notification_type: NotificationType::MilestoneAchieved,
                priority: NotificationPriority::Normal,
                title: format!("Module completed: {}", record.module_key),
                message: format!(
                    "Congratulations! You completed the {} module.",
                    record.module_key
                ),
                data: Some(serde_json::json!({
                    "moduleKey": record.module_key,
                    "score": record.score,
                })),
            },
        )
        .await?;
        tracing::info!(
            "Milestone {} sent to {} for module {}",
            milestone.id,
            milestone.user_id,
            record.module_key
        );
    }
    tx.commit().await?;

    Ok(Json(record.into()))
}

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;
    use serde_json::json;

    use crate::db::UserRole;
    use crate::testing::TestApp;

    #[tokio::test]
    async fn completion_sends_one_milestone() {
        let app = TestApp::new().await;
        let student = app.user("s@example.com", UserRole::Student).await;
        let token = app.token(&student);

        let (status, body) = app
            .put(
                "/api/progress",
                Some(&token),
                json!({ "moduleKey": "history-taking", "status": "in_progress", "practiceHours": 2.5 }),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["completedAt"].is_null());

        for _ in 0..2 {
            let (status, body) = app
                .put(
                    "/api/progress",
                    Some(&token),
                    json!({ "moduleKey": "history-taking", "status": "COMPLETED", "score": 92 }),
                )
                .await;
            assert_eq!(status, StatusCode::OK);
            assert!(!body["completedAt"].is_null());
            assert_eq!(body["practiceHours"], 2.5);
        }

        let (_, body) = app.get("/api/notifications", Some(&token)).await;
        assert_eq!(body["notifications"].as_array().unwrap().len(), 1);
        assert_eq!(body["notifications"][0]["type"], "MILESTONE_ACHIEVED");

        let (_, body) = app.get("/api/progress", Some(&token)).await;
        assert_eq!(body["summary"]["totalModules"], 1);
        assert_eq!(body["summary"]["completedModules"], 1);
        assert_eq!(body["summary"]["completionRate"], 100.0);
    }

    #[tokio::test]
    async fn students_cannot_write_for_others() {
        let app = TestApp::new().await;
        let alice = app.user("alice@example.com", UserRole::Student).await;
        let bob = app.user("bob@example.com", UserRole::Student).await;

        let (status, _) = app
            .put(
                "/api/progress",
                Some(&app.token(&alice)),
                json!({ "studentId": bob.id, "moduleKey": "desensitization", "status": "COMPLETED" }),
            )
            .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn out_of_range_values_are_rejected() {
        let app = TestApp::new().await;
        let student = app.user("s@example.com", UserRole::Student).await;
        let token = app.token(&student);

        for body in [
            json!({ "moduleKey": "m", "status": "COMPLETED", "score": 101 }),
            json!({ "moduleKey": "m", "status": "DONE" }),
            json!({ "moduleKey": " ", "status": "COMPLETED" }),
            json!({ "moduleKey": "m", "status": "IN_PROGRESS", "practiceHours": -1.0 }),
        ] {
            let (status, body) = app.put("/api/progress", Some(&token), body).await;
            assert_eq!(status, StatusCode::BAD_REQUEST);
            assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
        }
    }

    #[tokio::test]
    async fn concurrent_completions_send_one_milestone() {
        let app = TestApp::new().await;
        let student = app.user("s@example.com", UserRole::Student).await;
        let token = app.token(&student);
        let body = json!({ "moduleKey": "bilateral-stimulation", "status": "COMPLETED", "score": 88 });

        let ((a, _), (b, _)) = tokio::join!(
            app.put("/api/progress", Some(&token), body.clone()),
            app.put("/api/progress", Some(&token), body.clone()),
        );
        assert_eq!(a, StatusCode::OK);
        assert_eq!(b, StatusCode::OK);

        let (_, body) = app.get("/api/notifications", Some(&token)).await;
        let milestones = body["notifications"]
            .as_array()
            .unwrap()
            .iter()
            .filter(|n| n["type"] == "MILESTONE_ACHIEVED")
            .count();
        assert_eq!(milestones, 1);
    }

    #[tokio::test]
    async fn milestone_and_completion_are_stored_together() {
        let app = TestApp::new().await;
        let student = app.user("s@example.com", UserRole::Student).await;
        let token = app.token(&student);

        // Reopening and completing again is a new milestone.
        for status in ["COMPLETED", "IN_PROGRESS", "COMPLETED"] {
            let (code, _) = app
                .put(
                    "/api/progress",
                    Some(&token),
                    json!({ "moduleKey": "closure", "status": status }),
                )
                .await;
            assert_eq!(code, StatusCode::OK);
        }

        let (_, body) = app.get("/api/notifications", Some(&token)).await;
        assert_eq!(body["notifications"].as_array().unwrap().len(), 2);
        let (_, body) = app.get("/api/progress", Some(&token)).await;
        assert!(!body["records"][0]["completedAt"].is_null());
    }
}
