use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use super::{NotificationPriority, NotificationType};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionStatus {
    Scheduled,
    InProgress,
    Completed,
    Cancelled,
}

text_enum!(SessionStatus, "session status", {
    Scheduled => "SCHEDULED",
    InProgress => "IN_PROGRESS",
    Completed => "COMPLETED",
    Cancelled => "CANCELLED",
});

impl SessionStatus {
    /// Lifecycle: SCHEDULED -> IN_PROGRESS -> COMPLETED, and
    /// SCHEDULED | IN_PROGRESS -> CANCELLED. Terminal states never move.
    pub fn can_transition_to(&self, next: SessionStatus) -> bool {
        use SessionStatus::*;
        matches!(
            (self, next),
            (Scheduled, InProgress)
                | (InProgress, Completed)
                | (Scheduled, Cancelled)
                | (InProgress, Cancelled)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionStatus::Completed | SessionStatus::Cancelled)
    }

    /// Notification announced to participants when a session enters this state.
    pub fn announcement(&self) -> Option<(NotificationType, NotificationPriority)> {
        match self {
            SessionStatus::Cancelled => Some((
                NotificationType::SessionCancelled,
                NotificationPriority::High,
            )),
            SessionStatus::Completed => Some((
                NotificationType::SessionCompleted,
                NotificationPriority::Normal,
            )),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct TrainingSession {
    pub id: String,
    pub title: String,
    pub consultant_id: String,
    pub scheduled_at: NaiveDateTime,
    pub duration_minutes: i64,
    pub status: SessionStatus,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Clone)]
pub struct CreateTrainingSession {
    pub title: String,
    pub consultant_id: String,
    pub scheduled_at: NaiveDateTime,
    pub duration_minutes: i64,
    pub participant_ids: Vec<String>,
}
