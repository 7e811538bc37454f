use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    routing::{get, post},
    Json, Router,
};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::db::{VideoParticipant, VideoRoomStatus};
use crate::error::AppResult;
use crate::routes::auth::AuthUser;
use crate::services::video::{RoomDetails, VideoService};
use crate::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", post(video_action))
        .route("/:room_id", get(get_room))
}

#[derive(Debug, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum VideoAction {
    #[serde(rename_all = "camelCase")]
    CreateRoom { session_id: String },
    #[serde(rename_all = "camelCase")]
    Join { room_id: String },
    #[serde(rename_all = "camelCase")]
    Leave { room_id: String },
    #[serde(rename_all = "camelCase")]
    End { room_id: String },
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantResponse {
    pub user_id: String,
    pub joined_at: NaiveDateTime,
    pub left_at: Option<NaiveDateTime>,
    pub present: bool,
}

impl From<VideoParticipant> for ParticipantResponse {
    fn from(p: VideoParticipant) -> Self {
        let present = p.is_present();
        Self {
            user_id: p.user_id,
            joined_at: p.joined_at,
            left_at: p.left_at,
            present,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomResponse {
    pub id: String,
    pub session_id: String,
    pub room_name: String,
    pub status: VideoRoomStatus,
    pub started_at: NaiveDateTime,
    pub ended_at: Option<NaiveDateTime>,
    pub participants: Vec<ParticipantResponse>,
}

impl From<RoomDetails> for RoomResponse {
    fn from(details: RoomDetails) -> Self {
        let room = details.room;
        Self {
            id: room.id,
            session_id: room.session_id,
            room_name: room.room_name,
            status: room.status,
            started_at: room.started_at,
            ended_at: room.ended_at,
            participants: details.participants.into_iter().map(Into::into).collect(),
        }
    }
}

async fn video_action(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    payload: Result<Json<VideoAction>, JsonRejection>,
) -> AppResult<Json<RoomResponse>> {
    let Json(action) = payload?;

    let details = match action {
        VideoAction::CreateRoom { session_id } => {
            VideoService::create_room(&state, &user, &session_id).await?
        }
        VideoAction::Join { room_id } => VideoService::join(&state, &user, &room_id).await?,
        VideoAction::Leave { room_id } => VideoService::leave(&state, &user, &room_id).await?,
        VideoAction::End { room_id } => VideoService::end(&state, &user, &room_id).await?,
    };

    Ok(Json(details.into()))
}

async fn get_room(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    Path(room_id): Path<String>,
) -> AppResult<Json<RoomResponse>> {
    Ok(Json(VideoService::get_room(&state, &user, &room_id).await?.into()))
}
