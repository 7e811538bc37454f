use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Closed set of notification categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NotificationType {
    SessionReminder,
    SessionScheduled,
    SessionCancelled,
    SessionCompleted,
    MilestoneAchieved,
    DocumentShared,
    ProgressUpdate,
    ConsultationRequest,
    SystemAnnouncement,
}

text_enum!(NotificationType, "notification type", {
    SessionReminder => "SESSION_REMINDER",
    SessionScheduled => "SESSION_SCHEDULED",
    SessionCancelled => "SESSION_CANCELLED",
    SessionCompleted => "SESSION_COMPLETED",
    MilestoneAchieved => "MILESTONE_ACHIEVED",
    DocumentShared => "DOCUMENT_SHARED",
    ProgressUpdate => "PROGRESS_UPDATE",
    ConsultationRequest => "CONSULTATION_REQUEST",
    SystemAnnouncement => "SYSTEM_ANNOUNCEMENT",
});

#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, sqlx::Type,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NotificationPriority {
    Low,
    #[default]
    Normal,
    High,
    Urgent,
}

text_enum!(NotificationPriority, "priority", {
    Low => "LOW",
    Normal => "NORMAL",
    High => "HIGH",
    Urgent => "URGENT",
});

/// A row of the `notifications` table.
///
/// `read_at` is set exactly when `is_read` is true; the table carries a
/// CHECK constraint for it and the repository only ever flips both together.
#[derive(Debug, Clone, FromRow)]
pub struct Notification {
    pub id: String,
    pub user_id: String,
    pub notification_type: NotificationType,
    pub priority: NotificationPriority,
    pub title: String,
    pub message: String,
    /// JSON-serialized structured payload.
    pub data: Option<String>,
    pub is_read: bool,
    pub read_at: Option<NaiveDateTime>,
    pub created_at: NaiveDateTime,
}

impl Notification {
    pub fn data_json(&self) -> Option<serde_json::Value> {
        self.data
            .as_deref()
            .and_then(|raw| serde_json::from_str(raw).ok())
    }
}

/// A validated notification ready to be persisted.
#[derive(Debug, Clone)]
pub struct NewNotification {
    pub user_id: String,
    pub notification_type: NotificationType,
    pub priority: NotificationPriority,
    pub title: String,
    pub message: String,
    pub data: Option<serde_json::Value>,
}
