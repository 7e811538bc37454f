use std::sync::Arc;

use axum::{routing::get, Router};

use crate::AppState;

pub mod auth;
pub mod documents;
pub mod health;
pub mod notifications;
pub mod progress;
pub mod sessions;
pub mod students;
pub mod video;
pub mod webhooks;

/// Assemble every route. The auth and webhook routers are passed in so the
/// caller can wrap them in rate limiting.
pub fn app_router(
    auth: Router<Arc<AppState>>,
    webhooks: Router<Arc<AppState>>,
) -> Router<Arc<AppState>> {
    Router::new()
        .route("/health", get(health::health_check))
        .nest("/api/auth", auth)
        .nest("/api/students", students::router())
        .nest("/api/documents", documents::router())
        .nest("/api/notifications", notifications::router())
        .nest("/api/progress", progress::router())
        .nest("/api/sessions", sessions::router())
        .nest("/api/video", video::router())
        .nest("/webhooks", webhooks)
        .layer(axum::middleware::from_fn(
            crate::middleware::security_headers::security_headers,
        ))
}
