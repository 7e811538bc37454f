use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde::Deserialize;

use crate::db::{UpdateUserProfile, User, UserRepository, UserRole};
use crate::error::{AppError, AppResult};
use crate::routes::auth::{require_self_or_staff, require_staff, AuthUser, UserResponse};
use crate::services::auth::{AuthService, Registration};
use crate::services::notifications::Pagination;
use crate::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(list_students).post(create_student))
        .route("/:id", get(get_student).put(update_student))
}

#[derive(Debug, Deserialize)]
pub struct ListStudentsQuery {
    pub q: Option<String>,
    pub limit: Option<String>,
    pub offset: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateStudentRequest {
    pub email: String,
    pub password: String,
    pub first_name: String,
    pub last_name: String,
    pub phone: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateStudentRequest {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub phone: Option<String>,
}

async fn list_students(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    Query(query): Query<ListStudentsQuery>,
) -> AppResult<Json<Vec<UserResponse>>> {
    require_staff(&user)?;
    let pagination = Pagination::from_raw(query.limit.as_deref(), query.offset.as_deref());

    let students = UserRepository::search(
        &state.db,
        query.q.as_deref(),
        Some(UserRole::Student),
        pagination.limit,
        pagination.offset,
    )
    .await?;

    Ok(Json(students.into_iter().map(Into::into).collect()))
}

async fn create_student(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    payload: Result<Json<CreateStudentRequest>, JsonRejection>,
) -> AppResult<impl IntoResponse> {
    require_staff(&user)?;
    let Json(req) = payload?;

    let (student, _) = AuthService::register(
        &state,
        Registration {
            email: req.email,
            password: req.password,
            first_name: req.first_name,
            last_name: req.last_name,
            phone: req.phone,
            role: Some(UserRole::Student),
        },
        Some(&user),
    )
    .await?;
    tracing::info!("User {} enrolled student {}", user.id, student.id);

    Ok((StatusCode::CREATED, Json(UserResponse::from(student))))
}

/// Resolve a student record the caller may act on. Consultants reach
/// students only; other accounts are visible to themselves and admins.
async fn load_student(state: &Arc<AppState>, actor: &User, id: &str) -> AppResult<User> {
    require_self_or_staff(actor, id)?;
    let target = UserRepository::find_by_id(&state.db, id)
        .await?
        .filter(|target| {
            target.role == UserRole::Student || target.id == actor.id || actor.is_admin()
        })
        .ok_or_else(|| AppError::NotFound(format!("Student {}", id)))?;
    Ok(target)
}

async fn get_student(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    Path(id): Path<String>,
) -> AppResult<Json<UserResponse>> {
    let student = load_student(&state, &user, &id).await?;
    Ok(Json(student.into()))
}

async fn update_student(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    Path(id): Path<String>,
    payload: Result<Json<UpdateStudentRequest>, JsonRejection>,
) -> AppResult<Json<UserResponse>> {
    let Json(req) = payload?;
    let student = load_student(&state, &user, &id).await?;

    let updated = UserRepository::update_profile(
        &state.db,
        &student.id,
        UpdateUserProfile {
            first_name: req.first_name,
            last_name: req.last_name,
            phone: req.phone,
        },
    )
    .await?
    .ok_or_else(|| AppError::NotFound(format!("Student {}", id)))?;

    Ok(Json(updated.into()))
}
