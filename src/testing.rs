//! Shared fixtures for handler and service tests: an in-memory database with
//! migrations applied and a router driven through `tower::ServiceExt::oneshot`.

use std::sync::Arc;

use axum::{
    body::Body,
    http::{header, Request, Response, StatusCode},
    Router,
};
use chrono::NaiveDateTime;
use http_body_util::BodyExt;
use serde_json::Value;
use tower::ServiceExt;

use crate::config::Config;
use crate::db::{
    CreateTrainingSession, CreateUser, TrainingSession, TrainingSessionRepository, User,
    UserRepository, UserRole,
};
use crate::routes;
use crate::services::auth::AuthService;
use crate::services::init;
use crate::AppState;

pub const TEST_PASSWORD: &str = "correct horse";

pub fn test_config() -> Config {
    let mut config = Config::default();
    config.database.url = "sqlite::memory:".to_string();
    config.jwt.secret = "test-jwt-secret".to_string();
    config.webhook.secret = "test-webhook-secret".to_string();
    config.password.bcrypt_cost = 4;
    config
}

pub struct TestApp {
    pub state: Arc<AppState>,
    router: Router,
}

impl TestApp {
    pub async fn new() -> Self {
        Self::with_config(test_config()).await
    }

    pub async fn with_config(config: Config) -> Self {
        let db = init::memory_pool_options()
            .connect("sqlite::memory:")
            .await
            .expect("in-memory sqlite");
        sqlx::migrate!("./migrations")
            .run(&db)
            .await
            .expect("migrations");

        let state = Arc::new(AppState { db, config });
        let router = routes::app_router(routes::auth::router(), routes::webhooks::router())
            .with_state(state.clone());

        Self { state, router }
    }

    /// Insert a user whose password is [`TEST_PASSWORD`].
    pub async fn user(&self, email: &str, role: UserRole) -> User {
        let password_hash =
            AuthService::hash_password(&self.state, TEST_PASSWORD).expect("hash password");
        let local = email.split('@').next().unwrap_or(email);
        UserRepository::create(
            &self.state.db,
            CreateUser {
                email: email.to_string(),
                password_hash,
                role,
                first_name: local.to_string(),
                last_name: "Tester".to_string(),
                phone: None,
            },
        )
        .await
        .expect("create user")
    }

    pub fn token(&self, user: &User) -> String {
        AuthService::create_jwt(&self.state, &user.id).expect("create jwt")
    }

    pub async fn get(&self, path: &str, token: Option<&str>) -> (StatusCode, Value) {
        self.request(build("GET", path, token, None)).await
    }

    pub async fn post(&self, path: &str, token: Option<&str>, body: Value) -> (StatusCode, Value) {
        self.request(build("POST", path, token, Some(body))).await
    }

    pub async fn put(&self, path: &str, token: Option<&str>, body: Value) -> (StatusCode, Value) {
        self.request(build("PUT", path, token, Some(body))).await
    }

    pub async fn delete(&self, path: &str, token: Option<&str>) -> (StatusCode, Value) {
        self.request(build("DELETE", path, token, None)).await
    }

    /// Send a request and decode the body as JSON; an empty body is `Null`.
    pub async fn request(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self.raw(request).await;
        let status = response.status();
        let bytes = response
            .into_body()
            .collect()
            .await
            .expect("read body")
            .to_bytes();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).expect("json body")
        };
        (status, value)
    }

    pub async fn raw(&self, request: Request<Body>) -> Response<Body> {
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("infallible router")
    }
}

fn build(method: &str, path: &str, token: Option<&str>, body: Option<Value>) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(path);
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
    }
    let body = match body {
        Some(json) => {
            builder = builder.header(header::CONTENT_TYPE, "application/json");
            Body::from(json.to_string())
        }
        None => Body::empty(),
    };
    builder.body(body).expect("valid request")
}

/// Schedule a 60 minute session directly through the repository.
pub async fn create_session(
    state: &Arc<AppState>,
    consultant_id: &str,
    participants: &[String],
    scheduled_at: NaiveDateTime,
) -> TrainingSession {
    TrainingSessionRepository::create(
        &state.db,
        CreateTrainingSession {
            title: "Phase 3 practicum".to_string(),
            consultant_id: consultant_id.to_string(),
            scheduled_at,
            duration_minutes: 60,
            participant_ids: participants.to_vec(),
        },
    )
    .await
    .expect("create session")
}
