use std::sync::Arc;

use axum::http::HeaderMap;
use chrono::Utc;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::error::{AppError, AppResult};
use crate::services::video::VideoService;
use crate::AppState;

type HmacSha256 = Hmac<Sha256>;

pub const WEBHOOK_ID_HEADER: &str = "x-webhook-id";
pub const WEBHOOK_TIMESTAMP_HEADER: &str = "x-webhook-timestamp";
pub const WEBHOOK_SIGNATURE_HEADER: &str = "x-webhook-signature";

const SIGNATURE_PREFIX: &str = "sha256=";

/// Events delivered by the video conferencing vendor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event")]
pub enum VideoWebhookEvent {
    #[serde(rename = "participant.joined", rename_all = "camelCase")]
    ParticipantJoined { room_name: String, user_id: String },

    #[serde(rename = "participant.left", rename_all = "camelCase")]
    ParticipantLeft { room_name: String, user_id: String },

    #[serde(rename = "room.ended", rename_all = "camelCase")]
    RoomEnded { room_name: String },
}

impl VideoWebhookEvent {
    pub fn name(&self) -> &'static str {
        match self {
            VideoWebhookEvent::ParticipantJoined { .. } => "participant.joined",
            VideoWebhookEvent::ParticipantLeft { .. } => "participant.left",
            VideoWebhookEvent::RoomEnded { .. } => "room.ended",
        }
    }

    pub fn room_name(&self) -> &str {
        match self {
            VideoWebhookEvent::ParticipantJoined { room_name, .. }
            | VideoWebhookEvent::ParticipantLeft { room_name, .. }
            | VideoWebhookEvent::RoomEnded { room_name } => room_name,
        }
    }
}

/// Headers carried by every signed webhook delivery.
#[derive(Debug, Clone)]
pub struct WebhookHeaders {
    pub message_id: String,
    pub timestamp: String,
    pub signature: String,
}

fn mac_for(secret: &str, message_id: &str, timestamp: &str, body: &[u8]) -> AppResult<HmacSha256> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| AppError::Internal(anyhow::anyhow!("Failed to create HMAC")))?;
    mac.update(message_id.as_bytes());
    mac.update(timestamp.as_bytes());
    mac.update(body);
    Ok(mac)
}

pub struct WebhookService;

impl WebhookService {
    /// Extract required headers from request
    pub fn extract_headers(headers: &HeaderMap) -> AppResult<WebhookHeaders> {
        Ok(WebhookHeaders {
            message_id: Self::get_header(headers, WEBHOOK_ID_HEADER)?,
            timestamp: Self::get_header(headers, WEBHOOK_TIMESTAMP_HEADER)?,
            signature: Self::get_header(headers, WEBHOOK_SIGNATURE_HEADER)?,
        })
    }

    fn get_header(headers: &HeaderMap, name: &str) -> AppResult<String> {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string())
            .ok_or_else(|| AppError::BadRequest(format!("Missing header: {}", name)))
    }

    /// `sha256=<hex>` HMAC over `message_id || timestamp || body`.
    pub fn sign(secret: &str, message_id: &str, timestamp: &str, body: &[u8]) -> AppResult<String> {
        let mac = mac_for(secret, message_id, timestamp, body)?;
        Ok(format!(
            "{}{}",
            SIGNATURE_PREFIX,
            hex::encode(mac.finalize().into_bytes())
        ))
    }

    /// Verify webhook signature and reject deliveries whose timestamp is
    /// further than `tolerance_minutes` from now.
    pub fn verify_signature(
        secret: &str,
        tolerance_minutes: i64,
        headers: &WebhookHeaders,
        body: &[u8],
    ) -> AppResult<()> {
        let provided = headers
            .signature
            .strip_prefix(SIGNATURE_PREFIX)
            .ok_or_else(|| AppError::BadRequest("Invalid signature format".to_string()))?;
        let provided = hex::decode(provided)
            .map_err(|_| AppError::BadRequest("Invalid signature format".to_string()))?;

        mac_for(secret, &headers.message_id, &headers.timestamp, body)?
            .verify_slice(&provided)
            .map_err(|_| AppError::Unauthorized)?;

        let sent_at = chrono::DateTime::parse_from_rfc3339(&headers.timestamp)
            .map_err(|_| AppError::BadRequest("Invalid timestamp".to_string()))?;
        let skew = Utc::now().signed_duration_since(sent_at);
        if skew.num_minutes().abs() > tolerance_minutes {
            return Err(AppError::BadRequest("Message too old".to_string()));
        }

        Ok(())
    }

    /// Verify, decode and apply one delivery to video bookkeeping.
    pub async fn handle(
        state: &Arc<AppState>,
        headers: &HeaderMap,
        body: &[u8],
    ) -> AppResult<VideoWebhookEvent> {
        let webhook_headers = Self::extract_headers(headers)?;
        Self::verify_signature(
            &state.config.webhook.secret,
            state.config.webhook.tolerance_minutes,
            &webhook_headers,
            body,
        )?;

        let event: VideoWebhookEvent = serde_json::from_slice(body)
            .map_err(|e| AppError::BadRequest(format!("Invalid webhook payload: {}", e)))?;

        tracing::info!(
            "Video webhook received: id={}, event={}, room={}",
            webhook_headers.message_id,
            event.name(),
            event.room_name()
        );

        match &event {
            VideoWebhookEvent::ParticipantJoined { room_name, user_id } => {
                VideoService::vendor_participant_joined(state, room_name, user_id).await?
            }
            VideoWebhookEvent::ParticipantLeft { room_name, user_id } => {
                VideoService::vendor_participant_left(state, room_name, user_id).await?
            }
            VideoWebhookEvent::RoomEnded { room_name } => {
                VideoService::vendor_room_ended(state, room_name).await?
            }
        }

        Ok(event)
    }
}

// ============================================================================
// Replay harness
// ============================================================================

#[derive(Debug, Clone, clap::Args)]
pub struct ReplayArgs {
    /// Webhook endpoint to deliver to, e.g. http://localhost:8080/webhooks/video
    #[arg(long)]
    pub url: String,

    /// Event name: participant.joined, participant.left or room.ended
    #[arg(long, default_value = "room.ended")]
    pub event: String,

    #[arg(long, default_value = "emdr-replay")]
    pub room: String,

    /// Required for participant events
    #[arg(long)]
    pub user: Option<String>,

    #[arg(long, env = "WEBHOOK_SECRET", hide_env_values = true)]
    pub secret: String,
}

impl ReplayArgs {
    pub fn event(&self) -> anyhow::Result<VideoWebhookEvent> {
        let user = || {
            self.user
                .clone()
                .ok_or_else(|| anyhow::anyhow!("--user is required for {}", self.event))
        };
        let room_name = self.room.clone();

        Ok(match self.event.as_str() {
            "participant.joined" => VideoWebhookEvent::ParticipantJoined {
                room_name,
                user_id: user()?,
            },
            "participant.left" => VideoWebhookEvent::ParticipantLeft {
                room_name,
                user_id: user()?,
            },
            "room.ended" => VideoWebhookEvent::RoomEnded { room_name },
            other => anyhow::bail!("unknown event: {}", other),
        })
    }
}

/// Sign a synthetic delivery and POST it to the target endpoint.
pub async fn replay(args: ReplayArgs) -> anyhow::Result<()> {
    let event = args.event()?;
    let body = serde_json::to_vec(&event)?;
    let message_id = uuid::Uuid::new_v4().to_string();
    let timestamp = Utc::now().to_rfc3339();
    let signature = WebhookService::sign(&args.secret, &message_id, &timestamp, &body)
        .map_err(|e| anyhow::anyhow!("{}", e))?;

    tracing::info!("Replaying {} ({}) to {}", event.name(), message_id, args.url);

    let response = reqwest::Client::new()
        .post(&args.url)
        .header(reqwest::header::CONTENT_TYPE, "application/json")
        .header(WEBHOOK_ID_HEADER, &message_id)
        .header(WEBHOOK_TIMESTAMP_HEADER, &timestamp)
        .header(WEBHOOK_SIGNATURE_HEADER, &signature)
        .body(body)
        .send()
        .await?;

    let status = response.status();
    let text = response.text().await.unwrap_or_default();
    if status.is_success() {
        tracing::info!("Webhook accepted: status={}, body={}", status, text);
    } else {
        tracing::warn!("Webhook rejected: status={}, body={}", status, text);
    }
    Ok(())
}
