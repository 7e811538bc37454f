use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VideoRoomStatus {
    Open,
    Closed,
}

text_enum!(VideoRoomStatus, "video room status", {
    Open => "OPEN",
    Closed => "CLOSED",
});

/// Bookkeeping for a conferencing room attached to a training session.
#[derive(Debug, Clone, FromRow)]
pub struct VideoRoom {
    pub id: String,
    pub session_id: String,
    pub room_name: String,
    pub status: VideoRoomStatus,
    pub started_at: NaiveDateTime,
    pub ended_at: Option<NaiveDateTime>,
}

#[derive(Debug, Clone, FromRow)]
pub struct VideoParticipant {
    pub room_id: String,
    pub user_id: String,
    pub joined_at: NaiveDateTime,
    pub left_at: Option<NaiveDateTime>,
}

impl VideoParticipant {
    pub fn is_present(&self) -> bool {
        self.left_at.is_none()
    }
}
