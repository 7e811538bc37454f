use std::sync::Arc;

use chrono::{Duration, NaiveDateTime, Utc};
use sqlx::SqlitePool;

use crate::db::{
    NewNotification, Notification, NotificationPriority, NotificationRepository, NotificationType,
    TrainingSession, TrainingSessionRepository, UserRepository,
};
use crate::error::{AppError, AppResult};
use crate::AppState;

/// Lead times of the reminders sent ahead of a training session, with the
/// priority each reminder carries.
const SESSION_REMINDERS: [(i64, &str, NotificationPriority); 3] = [
    (24 * 60, "24h", NotificationPriority::Normal),
    (2 * 60, "2h", NotificationPriority::High),
    (15, "15min", NotificationPriority::Urgent),
];

/// Unvalidated notification input as received from a caller.
///
/// `notification_type` and `priority` are kept as raw strings so validation
/// against the closed enumerations happens in one place.
#[derive(Debug, Clone, Default)]
pub struct NotificationDraft {
    pub user_id: String,
    pub notification_type: String,
    pub title: String,
    pub message: String,
    pub data: Option<serde_json::Value>,
    pub priority: Option<String>,
}

impl NotificationDraft {
    pub fn validate(self) -> AppResult<NewNotification> {
        let notification_type: NotificationType = self.notification_type.parse()?;
        let priority = match self.priority.as_deref() {
            None => NotificationPriority::default(),
            Some(raw) => raw.parse()?,
        };

        if self.user_id.trim().is_empty() {
            return Err(AppError::Validation("userId is required".to_string()));
        }
        let title = self.title.trim();
        if title.is_empty() {
            return Err(AppError::Validation("title must not be empty".to_string()));
        }
        let message = self.message.trim();
        if message.is_empty() {
            return Err(AppError::Validation("message must not be empty".to_string()));
        }

        Ok(NewNotification {
            user_id: self.user_id.trim().to_string(),
            notification_type,
            priority,
            title: title.to_string(),
            message: message.to_string(),
            data: self.data.filter(|v| !v.is_null()),
        })
    }
}

/// Page window for notification listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pagination {
    pub limit: i64,
    pub offset: i64,
}

impl Pagination {
    pub const DEFAULT_LIMIT: i64 = 50;
    pub const MAX_LIMIT: i64 = 100;

    /// Parse raw query-string values. Missing, negative or unparsable values
    /// fall back to the defaults; this never fails.
    pub fn from_raw(limit: Option<&str>, offset: Option<&str>) -> Self {
        let limit = limit
            .and_then(|v| v.trim().parse::<i64>().ok())
            .filter(|v| *v >= 0)
            .map(|v| v.min(Self::MAX_LIMIT))
            .unwrap_or(Self::DEFAULT_LIMIT);
        let offset = offset
            .and_then(|v| v.trim().parse::<i64>().ok())
            .filter(|v| *v >= 0)
            .unwrap_or(0);
        Self { limit, offset }
    }
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            limit: Self::DEFAULT_LIMIT,
            offset: 0,
        }
    }
}

#[derive(Debug)]
pub struct NotificationPage {
    pub notifications: Vec<Notification>,
    pub total: i64,
    pub pagination: Pagination,
}

impl NotificationPage {
    pub fn has_more(&self) -> bool {
        self.pagination.offset + (self.notifications.len() as i64) < self.total
    }
}

/// Build the fixed battery sent when a session is announced: one
/// confirmation per recipient plus every reminder whose moment is still
/// ahead of `now`.
pub fn session_notification_battery(
    session: &TrainingSession,
    recipients: &[String],
    now: NaiveDateTime,
) -> Vec<NewNotification> {
    let when = session.scheduled_at.format("%Y-%m-%d %H:%M UTC").to_string();
    let scheduled_at = session.scheduled_at.and_utc().to_rfc3339();

    let mut battery = Vec::new();
    for user_id in recipients {
        battery.push(NewNotification {
            user_id: user_id.clone(),
            notification_type: NotificationType::SessionScheduled,
            priority: NotificationPriority::Normal,
            title: format!("Session scheduled: {}", session.title),
            message: format!("Your training session \"{}\" is scheduled for {}.", session.title, when),
            data: Some(serde_json::json!({
                "sessionId": session.id,
                "scheduledAt": scheduled_at,
            })),
        });

        for (lead_minutes, label, priority) in SESSION_REMINDERS {
            let remind_at = session.scheduled_at - Duration::minutes(lead_minutes);
            if remind_at <= now {
                continue;
            }
            battery.push(NewNotification {
                user_id: user_id.clone(),
                notification_type: NotificationType::SessionReminder,
                priority,
                title: format!("Reminder: {} starts in {}", session.title, label),
                message: format!(
                    "Your training session \"{}\" starts at {}. Please be ready {} ahead.",
                    session.title, when, label
                ),
                data: Some(serde_json::json!({
                    "sessionId": session.id,
                    "scheduledAt": scheduled_at,
                    "remindBefore": label,
                    "remindAt": remind_at.and_utc().to_rfc3339(),
                })),
            });
        }
    }
    battery
}

/// Creation, delivery tracking and read-state queries for in-app notifications.
pub struct NotificationService {
    pool: SqlitePool,
}

impl NotificationService {
    pub fn new(state: &Arc<AppState>) -> Self {
        Self {
            pool: state.db.clone(),
        }
    }

    /// Validate a draft and persist it as one unread notification.
    pub async fn send_notification(&self, draft: NotificationDraft) -> AppResult<Notification> {
        let notification = draft.validate()?;
        self.notify(notification).await
    }

    /// Persist an already-typed notification after checking the recipient exists.
    pub async fn notify(&self, notification: NewNotification) -> AppResult<Notification> {
        if UserRepository::find_by_id(&self.pool, &notification.user_id)
            .await?
            .is_none()
        {
            return Err(AppError::NotFound(format!("User {}", notification.user_id)));
        }

        let created = NotificationRepository::create(&self.pool, &notification).await?;
        tracing::info!(
            "Notification sent: id={}, user_id={}, type={}, priority={}",
            created.id,
            created.user_id,
            created.notification_type,
            created.priority
        );
        Ok(created)
    }

    pub async fn find_notification(&self, notification_id: &str) -> AppResult<Notification> {
        NotificationRepository::find_by_id(&self.pool, notification_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Notification {}", notification_id)))
    }

    pub async fn get_user_notifications(
        &self,
        user_id: &str,
        pagination: Pagination,
    ) -> AppResult<NotificationPage> {
        let notifications = NotificationRepository::find_by_user_id(
            &self.pool,
            user_id,
            pagination.limit,
            pagination.offset,
        )
        .await?;
        let total = NotificationRepository::count_by_user_id(&self.pool, user_id).await?;

        Ok(NotificationPage {
            notifications,
            total,
            pagination,
        })
    }

    pub async fn get_unread_notification_count(&self, user_id: &str) -> AppResult<i64> {
        NotificationRepository::count_unread_by_user_id(&self.pool, user_id).await
    }

    /// Idempotent: marking an already-read notification succeeds without
    /// touching its read timestamp. Unknown ids fail with `NotFound`.
    pub async fn mark_notification_as_read(&self, notification_id: &str) -> AppResult<()> {
        if NotificationRepository::mark_read(&self.pool, notification_id).await? {
            tracing::debug!("Notification {} marked as read", notification_id);
            return Ok(());
        }

        match NotificationRepository::find_by_id(&self.pool, notification_id).await? {
            Some(_) => Ok(()),
            None => Err(AppError::NotFound(format!(
                "Notification {}",
                notification_id
            ))),
        }
    }

    /// Returns how many notifications were transitioned; zero is not an error.
    pub async fn mark_all_notifications_as_read(&self, user_id: &str) -> AppResult<u64> {
        let updated = NotificationRepository::mark_all_read(&self.pool, user_id).await?;
        tracing::debug!("Marked {} notifications as read for user {}", updated, user_id);
        Ok(updated)
    }

    /// Fan out the confirmation and reminder battery for a session to its
    /// consultant and every enrolled participant. All rows are written in a
    /// single transaction. Returns the number of notifications created.
    pub async fn send_session_notifications(&self, session_id: &str) -> AppResult<usize> {
        let session = TrainingSessionRepository::find_by_id(&self.pool, session_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Session {}", session_id)))?;

        if session.status.is_terminal() {
            return Err(AppError::Conflict(format!(
                "Session {} is {}",
                session.id, session.status
            )));
        }

        let participants = TrainingSessionRepository::participant_ids(&self.pool, &session.id).await?;
        let recipients = session_recipients(&session, participants);
        let battery = session_notification_battery(&session, &recipients, Utc::now().naive_utc());
        let created = NotificationRepository::create_many(&self.pool, &battery).await?;

        tracing::info!(
            "Sent {} session notifications for session {} to {} recipients",
            created.len(),
            session.id,
            recipients.len()
        );
        Ok(created.len())
    }
}

/// Consultant first, then participants in enrollment order, without duplicates.
pub fn session_recipients(session: &TrainingSession, participant_ids: Vec<String>) -> Vec<String> {
    let mut recipients = vec![session.consultant_id.clone()];
    for id in participant_ids {
        if !recipients.contains(&id) {
            recipients.push(id);
        }
    }
    recipients
}

/// One notification of the given kind per recipient, tagged with the session.
/// Used for lifecycle announcements (cancellation, completion).
pub fn session_announcement(
    session: &TrainingSession,
    recipients: Vec<String>,
    notification_type: NotificationType,
    priority: NotificationPriority,
    title: &str,
    message: &str,
) -> Vec<NewNotification> {
    recipients
        .into_iter()
        .map(|user_id| NewNotification {
            user_id,
            notification_type,
            priority,
            title: title.to_string(),
            message: message.to_string(),
            data: Some(serde_json::json!({ "sessionId": session.id })),
        })
        .collect()
}
