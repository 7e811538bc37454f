use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::State,
    http::HeaderMap,
    routing::post,
    Json, Router,
};
use serde::Serialize;

use crate::error::AppResult;
use crate::services::webhooks::WebhookService;
use crate::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/video", post(handle_video_webhook))
}

#[derive(Debug, Serialize)]
pub struct WebhookAck {
    pub received: bool,
    pub event: &'static str,
}

/// Signed delivery from the video vendor. The raw body is needed for
/// signature verification, so decoding happens in the service.
async fn handle_video_webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> AppResult<Json<WebhookAck>> {
    let event = WebhookService::handle(&state, &headers, &body).await?;
    Ok(Json(WebhookAck {
        received: true,
        event: event.name(),
    }))
}
