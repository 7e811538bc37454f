use std::sync::Arc;

use axum::{
    async_trait,
    extract::{rejection::JsonRejection, FromRequestParts, State},
    http::{request::Parts, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::db::{UpdateUserProfile, User, UserRepository, UserRole};
use crate::error::{AppError, AppResult};
use crate::services::auth::{AuthService, Registration};
use crate::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/register", post(register))
        .route("/login", post(login))
        .route("/me", get(me).put(update_me))
        .route("/password-reset/request", post(request_password_reset))
        .route("/password-reset/confirm", post(confirm_password_reset))
}

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    pub first_name: String,
    pub last_name: String,
    pub phone: Option<String>,
    pub role: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateProfileRequest {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub phone: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PasswordResetRequest {
    pub email: String,
}

#[derive(Debug, Deserialize)]
pub struct PasswordResetConfirm {
    pub token: String,
    pub password: String,
}

/// Public view of a user. The password hash never leaves the service.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserResponse {
    pub id: String,
    pub email: String,
    pub role: UserRole,
    pub first_name: String,
    pub last_name: String,
    pub phone: Option<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl From<User> for UserResponse {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            email: user.email,
            role: user.role,
            first_name: user.first_name,
            last_name: user.last_name,
            phone: user.phone,
            created_at: user.created_at,
            updated_at: user.updated_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub token: String,
    pub user: UserResponse,
}

#[derive(Debug, Serialize)]
pub struct SuccessResponse {
    pub success: bool,
}

// ============================================================================
// Handlers
// ============================================================================

async fn register(
    State(state): State<Arc<AppState>>,
    MaybeAuthUser(caller): MaybeAuthUser,
    payload: Result<Json<RegisterRequest>, JsonRejection>,
) -> AppResult<impl IntoResponse> {
    let Json(req) = payload?;
    let role = req.role.as_deref().map(str::parse::<UserRole>).transpose()?;

    let (user, token) = AuthService::register(
        &state,
        Registration {
            email: req.email,
            password: req.password,
            first_name: req.first_name,
            last_name: req.last_name,
            phone: req.phone,
            role,
        },
        caller.as_ref(),
    )
    .await?;

    Ok((
        StatusCode::CREATED,
        Json(AuthResponse {
            token,
            user: user.into(),
        }),
    ))
}

async fn login(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> AppResult<Json<AuthResponse>> {
    let Json(req) = payload?;
    let (user, token) = AuthService::login(&state, &req.email, &req.password).await?;
    tracing::info!("User {} logged in", user.id);

    Ok(Json(AuthResponse {
        token,
        user: user.into(),
    }))
}

async fn me(AuthUser(user): AuthUser) -> Json<UserResponse> {
    Json(user.into())
}

async fn update_me(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    payload: Result<Json<UpdateProfileRequest>, JsonRejection>,
) -> AppResult<Json<UserResponse>> {
    let Json(req) = payload?;
    let updated = UserRepository::update_profile(
        &state.db,
        &user.id,
        UpdateUserProfile {
            first_name: req.first_name,
            last_name: req.last_name,
            phone: req.phone,
        },
    )
    .await?
    .ok_or_else(|| AppError::NotFound(format!("User {}", user.id)))?;

    Ok(Json(updated.into()))
}

/// Always answers with success so the endpoint cannot be used to discover
/// registered emails. Delivery of the token is out of band.
async fn request_password_reset(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<PasswordResetRequest>, JsonRejection>,
) -> AppResult<Json<SuccessResponse>> {
    let Json(req) = payload?;
    if let Some(token) = AuthService::request_password_reset(&state, &req.email).await? {
        tracing::debug!("Password reset token: {}", token);
    }
    Ok(Json(SuccessResponse { success: true }))
}

async fn confirm_password_reset(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<PasswordResetConfirm>, JsonRejection>,
) -> AppResult<Json<SuccessResponse>> {
    let Json(req) = payload?;
    AuthService::confirm_password_reset(&state, &req.token, &req.password).await?;
    Ok(Json(SuccessResponse { success: true }))
}

// ============================================================================
// Extractors
// ============================================================================

/// Authenticated user extracted from `Authorization: Bearer <jwt>`.
pub struct AuthUser(pub User);

fn bearer_token(parts: &Parts) -> Option<Result<&str, AppError>> {
    let header = parts.headers.get(http::header::AUTHORIZATION)?;
    let Ok(value) = header.to_str() else {
        tracing::debug!("Authorization header is not valid UTF-8");
        return Some(Err(AppError::Unauthorized));
    };

    if !value.to_ascii_lowercase().starts_with("bearer ") {
        tracing::debug!("Authorization header doesn't start with 'Bearer '");
        return Some(Err(AppError::Unauthorized));
    }

    let token = value[7..].trim();
    if token.is_empty() {
        tracing::debug!("Empty bearer token in Authorization header");
        return Some(Err(AppError::Unauthorized));
    }
    Some(Ok(token))
}

async fn resolve(state: &Arc<AppState>, token: &str) -> AppResult<User> {
    let user = AuthService::get_user_from_token(state, token)
        .await
        .map_err(|e| {
            tracing::debug!("Failed to get user from token: {:?}", e);
            e
        })?;
    tracing::debug!("Authenticated user: {}", user.id);
    Ok(user)
}

#[async_trait]
impl FromRequestParts<Arc<AppState>> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let token = bearer_token(parts).ok_or_else(|| {
            tracing::debug!("Missing Authorization header");
            AppError::Unauthorized
        })??;
        Ok(AuthUser(resolve(state, token).await?))
    }
}

/// Like [`AuthUser`] but anonymous requests are allowed. A header that is
/// present but invalid is still rejected.
pub struct MaybeAuthUser(pub Option<User>);

#[async_trait]
impl FromRequestParts<Arc<AppState>> for MaybeAuthUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        match bearer_token(parts) {
            None => Ok(MaybeAuthUser(None)),
            Some(token) => Ok(MaybeAuthUser(Some(resolve(state, token?).await?))),
        }
    }
}

// ============================================================================
// Access helpers
// ============================================================================

pub fn require_staff(user: &User) -> AppResult<()> {
    if user.is_staff() {
        Ok(())
    } else {
        Err(AppError::Forbidden)
    }
}

/// The caller may act on `target_user_id` if it is themselves or they are
/// an administrator.
pub fn require_self_or_admin(user: &User, target_user_id: &str) -> AppResult<()> {
    if user.id == target_user_id || user.is_admin() {
        Ok(())
    } else {
        Err(AppError::Forbidden)
    }
}

/// Like [`require_self_or_admin`] but any staff member is allowed.
pub fn require_self_or_staff(user: &User, target_user_id: &str) -> AppResult<()> {
    if user.id == target_user_id || user.is_staff() {
        Ok(())
    } else {
        Err(AppError::Forbidden)
    }
}

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;
    use serde_json::json;

    use crate::db::UserRole;
    use crate::testing::TestApp;

    #[tokio::test]
    async fn register_login_me() {
        let app = TestApp::new().await;

        let (status, body) = app
            .post(
                "/api/auth/register",
                None,
                json!({
                    "email": "new@example.com",
                    "password": "long enough",
                    "firstName": "Nia",
                    "lastName": "Okafor"
                }),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["user"]["role"], "STUDENT");
        assert!(body["user"].get("passwordHash").is_none());

        let (status, body) = app
            .post(
                "/api/auth/login",
                None,
                json!({ "email": "NEW@example.com", "password": "long enough" }),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        let token = body["token"].as_str().unwrap().to_string();

        let (status, body) = app.get("/api/auth/me", Some(&token)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["email"], "new@example.com");
        assert_eq!(body["firstName"], "Nia");
    }

    #[tokio::test]
    async fn bad_credentials_are_unauthorized() {
        let app = TestApp::new().await;
        app.user("s@example.com", UserRole::Student).await;

        let (status, body) = app
            .post(
                "/api/auth/login",
                None,
                json!({ "email": "s@example.com", "password": "nope nope" }),
            )
            .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"]["code"], "UNAUTHORIZED");
    }

    #[tokio::test]
    async fn protected_routes_need_a_valid_token() {
        let app = TestApp::new().await;
        let (status, _) = app.get("/api/auth/me", None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, body) = app.get("/api/auth/me", Some("garbage")).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"]["code"], "INVALID_TOKEN");
    }

    #[tokio::test]
    async fn password_reset_request_never_reveals_accounts() {
        let app = TestApp::new().await;
        app.user("s@example.com", UserRole::Student).await;

        for email in ["s@example.com", "ghost@example.com"] {
            let (status, body) = app
                .post("/api/auth/password-reset/request", None, json!({ "email": email }))
                .await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(body, json!({ "success": true }));
        }
    }

    #[tokio::test]
    async fn malformed_json_is_bad_request() {
        let app = TestApp::new().await;
        let (status, body) = app
            .post("/api/auth/login", None, json!({ "email": "x@example.com" }))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["code"], "BAD_REQUEST");
    }
}
