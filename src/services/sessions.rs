use std::sync::Arc;

use chrono::{NaiveDateTime, Utc};

use crate::db::{
    CreateTrainingSession, NotificationRepository, SessionStatus, TrainingSession,
    TrainingSessionRepository, User, UserRepository,
};
use crate::error::{AppError, AppResult};
use crate::services::notifications::{session_announcement, session_recipients};
use crate::AppState;

#[derive(Debug, Clone)]
pub struct NewSession {
    pub title: String,
    pub consultant_id: Option<String>,
    pub scheduled_at: NaiveDateTime,
    pub duration_minutes: Option<i64>,
    pub participant_ids: Vec<String>,
}

/// A training session together with its enrolled participants.
#[derive(Debug, Clone)]
pub struct SessionDetails {
    pub session: TrainingSession,
    pub participant_ids: Vec<String>,
}

impl SessionDetails {
    pub fn involves(&self, user_id: &str) -> bool {
        self.session.consultant_id == user_id || self.participant_ids.iter().any(|p| p == user_id)
    }
}

pub struct SessionService;

impl SessionService {
    const DEFAULT_DURATION_MINUTES: i64 = 60;

    pub async fn create(
        state: &Arc<AppState>,
        actor: &User,
        new_session: NewSession,
    ) -> AppResult<SessionDetails> {
        if !actor.is_staff() {
            return Err(AppError::Forbidden);
        }

        let title = new_session.title.trim();
        if title.is_empty() {
            return Err(AppError::Validation("title must not be empty".to_string()));
        }
        let duration_minutes = new_session
            .duration_minutes
            .unwrap_or(Self::DEFAULT_DURATION_MINUTES);
        if duration_minutes <= 0 {
            return Err(AppError::Validation(
                "durationMinutes must be positive".to_string(),
            ));
        }

        let consultant_id = new_session
            .consultant_id
            .unwrap_or_else(|| actor.id.clone());
        let consultant = UserRepository::find_by_id(&state.db, &consultant_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("User {}", consultant_id)))?;
        if !consultant.is_staff() {
            return Err(AppError::Validation(format!(
                "User {} cannot lead a session",
                consultant.id
            )));
        }
        // Consultants schedule their own sessions; admins schedule for anyone.
        if consultant.id != actor.id && !actor.is_admin() {
            return Err(AppError::Forbidden);
        }

        let mut participant_ids: Vec<String> = Vec::new();
        for id in new_session.participant_ids {
            if id == consultant.id || participant_ids.contains(&id) {
                continue;
            }
            if UserRepository::find_by_id(&state.db, &id).await?.is_none() {
                return Err(AppError::NotFound(format!("User {}", id)));
            }
            participant_ids.push(id);
        }

        let session = TrainingSessionRepository::create(
            &state.db,
            CreateTrainingSession {
                title: title.to_string(),
                consultant_id: consultant.id,
                scheduled_at: new_session.scheduled_at,
                duration_minutes,
                participant_ids: participant_ids.clone(),
            },
        )
        .await?;

        tracing::info!(
            "Scheduled session {} at {} with {} participants",
            session.id,
            session.scheduled_at,
            participant_ids.len()
        );
        Ok(SessionDetails {
            session,
            participant_ids,
        })
    }

    async fn load(state: &Arc<AppState>, session_id: &str) -> AppResult<SessionDetails> {
        let session = TrainingSessionRepository::find_by_id(&state.db, session_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Session {}", session_id)))?;
        let participant_ids =
            TrainingSessionRepository::participant_ids(&state.db, &session.id).await?;
        Ok(SessionDetails {
            session,
            participant_ids,
        })
    }

    /// Visible to its consultant, its participants and administrators.
    pub async fn get(
        state: &Arc<AppState>,
        actor: &User,
        session_id: &str,
    ) -> AppResult<SessionDetails> {
        let details = Self::load(state, session_id).await?;
        if !actor.is_admin() && !details.involves(&actor.id) {
            return Err(AppError::Forbidden);
        }
        Ok(details)
    }

    /// Sessions the actor takes part in; administrators see all of them.
    pub async fn list(
        state: &Arc<AppState>,
        actor: &User,
        status: Option<SessionStatus>,
    ) -> AppResult<Vec<TrainingSession>> {
        let scope = if actor.is_admin() {
            None
        } else {
            Some(actor.id.as_str())
        };
        TrainingSessionRepository::list(&state.db, scope, status).await
    }

    /// Lifecycle changes are reserved to the session's consultant and admins.
    async fn load_managed(
        state: &Arc<AppState>,
        actor: &User,
        session_id: &str,
    ) -> AppResult<SessionDetails> {
        let details = Self::load(state, session_id).await?;
        if !actor.is_admin() && details.session.consultant_id != actor.id {
            return Err(AppError::Forbidden);
        }
        Ok(details)
    }

    pub async fn reschedule(
        state: &Arc<AppState>,
        actor: &User,
        session_id: &str,
        scheduled_at: NaiveDateTime,
    ) -> AppResult<SessionDetails> {
        let details = Self::load_managed(state, actor, session_id).await?;
        if details.session.status != SessionStatus::Scheduled {
            return Err(AppError::Conflict(format!(
                "Session {} is {} and cannot be rescheduled",
                details.session.id, details.session.status
            )));
        }
        if scheduled_at <= Utc::now().naive_utc() {
            return Err(AppError::Validation(
                "scheduledAt must be in the future".to_string(),
            ));
        }

        let session =
            TrainingSessionRepository::reschedule(&state.db, &details.session.id, scheduled_at)
                .await?
                .ok_or_else(|| {
                    AppError::Conflict(format!(
                        "Session {} is no longer scheduled",
                        details.session.id
                    ))
                })?;
        tracing::info!("Session {} rescheduled to {}", session.id, session.scheduled_at);
        Ok(SessionDetails {
            session,
            participant_ids: details.participant_ids,
        })
    }

    /// Move a session to `next`, announcing cancellation or completion to
    /// its participants.
    pub async fn transition(
        state: &Arc<AppState>,
        actor: &User,
        session_id: &str,
        next: SessionStatus,
    ) -> AppResult<SessionDetails> {
        let details = Self::load_managed(state, actor, session_id).await?;
        let current = details.session.status;
        if !current.can_transition_to(next) {
            return Err(AppError::Conflict(format!(
                "Session {} cannot move from {} to {}",
                details.session.id, current, next
            )));
        }

        // The status write, the participant read and the announcement share one
        // transaction; a concurrent change of the same session matches no row.
        let mut tx = state.db.begin().await?;
        let session = TrainingSessionRepository::transition_status(
            &mut *tx,
            &details.session.id,
            current,
            next,
        )
        .await?
        .ok_or_else(|| {
            AppError::Conflict(format!(
                "Session {} is no longer {}",
                details.session.id, current
            ))
        })?;
        let participant_ids =
            TrainingSessionRepository::participant_ids(&mut *tx, &session.id).await?;

        let mut announced = 0;
        if let Some((notification_type, priority)) = next.announcement() {
            let (title, message) = match next {
                SessionStatus::Cancelled => (
                    format!("Session cancelled: {}", session.title),
                    format!(
                        "The training session \"{}\" scheduled for {} has been cancelled.",
                        session.title,
                        session.scheduled_at.format("%Y-%m-%d %H:%M UTC")
                    ),
                ),
                _ => (
                    format!("Session completed: {}", session.title),
                    format!(
                        "The training session \"{}\" has been completed. Well done!",
                        session.title
                    ),
                ),
            };
            let batch = session_announcement(
                &session,
                session_recipients(&session, participant_ids.clone()),
                notification_type,
                priority,
                &title,
                &message,
            );
            announced = NotificationRepository::insert_all(&mut *tx, &batch)
                .await?
                .len();
        }
        tx.commit().await?;

        tracing::info!("Session {} moved from {} to {}", session.id, current, next);
        if announced > 0 {
            tracing::debug!(
                "Announced {} for session {} to {} users",
                next,
                session.id,
                announced
            );
        }

        Ok(SessionDetails {
            session,
            participant_ids,
        })
    }

    pub async fn add_participant(
        state: &Arc<AppState>,
        actor: &User,
        session_id: &str,
        user_id: &str,
    ) -> AppResult<SessionDetails> {
        let mut details = Self::load_managed(state, actor, session_id).await?;
        if details.session.status.is_terminal() {
            return Err(AppError::Conflict(format!(
                "Session {} is {}",
                details.session.id, details.session.status
            )));
        }
        if UserRepository::find_by_id(&state.db, user_id).await?.is_none() {
            return Err(AppError::NotFound(format!("User {}", user_id)));
        }
        if details.session.consultant_id == user_id {
            return Ok(details);
        }

        if TrainingSessionRepository::add_participant(&state.db, &details.session.id, user_id)
            .await?
        {
            tracing::info!("Added user {} to session {}", user_id, details.session.id);
            details.participant_ids.push(user_id.to_string());
        }
        Ok(details)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{NotificationRepository, UserRole};
    use crate::testing::TestApp;
    use chrono::Duration;

    fn new_session(participants: &[&str]) -> NewSession {
        NewSession {
            title: "Phase 3 assessment practice".to_string(),
            consultant_id: None,
            scheduled_at: Utc::now().naive_utc() + Duration::days(1),
            duration_minutes: Some(90),
            participant_ids: participants.iter().map(|p| p.to_string()).collect(),
        }
    }

    #[tokio::test]
    async fn students_cannot_schedule() {
        let app = TestApp::new().await;
        let student = app.user("s@example.com", UserRole::Student).await;
        let err = SessionService::create(&app.state, &student, new_session(&[]))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Forbidden));
    }

    #[tokio::test]
    async fn create_deduplicates_participants() {
        let app = TestApp::new().await;
        let consultant = app.user("c@example.com", UserRole::Consultant).await;
        let student = app.user("s@example.com", UserRole::Student).await;

        let details = SessionService::create(
            &app.state,
            &consultant,
            new_session(&[&student.id, &student.id, &consultant.id]),
        )
        .await
        .unwrap();
        assert_eq!(details.participant_ids, vec![student.id.clone()]);
        assert_eq!(details.session.consultant_id, consultant.id);
        assert_eq!(details.session.status, SessionStatus::Scheduled);
    }

    #[tokio::test]
    async fn outsiders_cannot_view() {
        let app = TestApp::new().await;
        let consultant = app.user("c@example.com", UserRole::Consultant).await;
        let student = app.user("s@example.com", UserRole::Student).await;
        let outsider = app.user("o@example.com", UserRole::Student).await;
        let details = SessionService::create(&app.state, &consultant, new_session(&[&student.id]))
            .await
            .unwrap();

        SessionService::get(&app.state, &student, &details.session.id)
            .await
            .unwrap();
        let err = SessionService::get(&app.state, &outsider, &details.session.id)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Forbidden));

        let listed = SessionService::list(&app.state, &outsider, None).await.unwrap();
        assert!(listed.is_empty());
    }

    #[tokio::test]
    async fn lifecycle_rejects_invalid_transitions() {
        let app = TestApp::new().await;
        let consultant = app.user("c@example.com", UserRole::Consultant).await;
        let details = SessionService::create(&app.state, &consultant, new_session(&[]))
            .await
            .unwrap();
        let id = details.session.id;

        let err = SessionService::transition(&app.state, &consultant, &id, SessionStatus::Completed)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));

        SessionService::transition(&app.state, &consultant, &id, SessionStatus::InProgress)
            .await
            .unwrap();
        let err = SessionService::reschedule(
            &app.state,
            &consultant,
            &id,
            Utc::now().naive_utc() + Duration::days(2),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));

        let done =
            SessionService::transition(&app.state, &consultant, &id, SessionStatus::Completed)
                .await
                .unwrap();
        assert_eq!(done.session.status, SessionStatus::Completed);
    }

    #[tokio::test]
    async fn cancellation_notifies_everyone() {
        let app = TestApp::new().await;
        let consultant = app.user("c@example.com", UserRole::Consultant).await;
        let s1 = app.user("s1@example.com", UserRole::Student).await;
        let s2 = app.user("s2@example.com", UserRole::Student).await;
        let details =
            SessionService::create(&app.state, &consultant, new_session(&[&s1.id, &s2.id]))
                .await
                .unwrap();

        SessionService::transition(
            &app.state,
            &consultant,
            &details.session.id,
            SessionStatus::Cancelled,
        )
        .await
        .unwrap();

        for user in [&consultant, &s1, &s2] {
            let notifications = NotificationRepository::find_by_user_id(&app.state.db, &user.id, 10, 0)
                .await
                .unwrap();
            assert_eq!(notifications.len(), 1);
            assert_eq!(
                notifications[0].notification_type,
                crate::db::NotificationType::SessionCancelled
            );
        }
    }

    #[tokio::test]
    async fn only_the_owner_manages_a_session() {
        let app = TestApp::new().await;
        let owner = app.user("c1@example.com", UserRole::Consultant).await;
        let other = app.user("c2@example.com", UserRole::Consultant).await;
        let admin = app.user("a@example.com", UserRole::Admin).await;
        let student = app.user("s@example.com", UserRole::Student).await;
        let details = SessionService::create(&app.state, &owner, new_session(&[]))
            .await
            .unwrap();

        let err = SessionService::add_participant(&app.state, &other, &details.session.id, &student.id)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Forbidden));

        let updated =
            SessionService::add_participant(&app.state, &admin, &details.session.id, &student.id)
                .await
                .unwrap();
        assert_eq!(updated.participant_ids, vec![student.id.clone()]);

        // Adding twice is a no-op.
        let again =
            SessionService::add_participant(&app.state, &owner, &details.session.id, &student.id)
                .await
                .unwrap();
        assert_eq!(again.participant_ids.len(), 1);
    }

    #[tokio::test]
    async fn concurrent_cancellations_announce_once() {
        let app = TestApp::new().await;
        let consultant = app.user("c@example.com", UserRole::Consultant).await;
        let student = app.user("s@example.com", UserRole::Student).await;
        let details = SessionService::create(&app.state, &consultant, new_session(&[&student.id]))
            .await
            .unwrap();
        let id = details.session.id;

        let (a, b) = tokio::join!(
            SessionService::transition(&app.state, &consultant, &id, SessionStatus::Cancelled),
            SessionService::transition(&app.state, &consultant, &id, SessionStatus::Cancelled),
        );
        let results = [a, b];
        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(results
            .iter()
            .any(|r| matches!(r, Err(AppError::Conflict(_)))));

        for user in [&consultant, &student] {
            let total = NotificationRepository::count_by_user_id(&app.state.db, &user.id)
                .await
                .unwrap();
            assert_eq!(total, 1);
        }
    }

    #[tokio::test]
    async fn racing_transitions_leave_one_winner() {
        let app = TestApp::new().await;
        let consultant = app.user("c@example.com", UserRole::Consultant).await;
        let details = SessionService::create(&app.state, &consultant, new_session(&[]))
            .await
            .unwrap();
        let id = details.session.id;

        let (cancel, start) = tokio::join!(
            SessionService::transition(&app.state, &consultant, &id, SessionStatus::Cancelled),
            SessionService::transition(&app.state, &consultant, &id, SessionStatus::InProgress),
        );
        assert!(cancel.is_ok() != start.is_ok());

        let stored = TrainingSessionRepository::find_by_id(&app.state.db, &id)
            .await
            .unwrap()
            .unwrap();
        let expected = if cancel.is_ok() {
            SessionStatus::Cancelled
        } else {
            SessionStatus::InProgress
        };
        assert_eq!(stored.status, expected);
        let announced = NotificationRepository::count_by_user_id(&app.state.db, &consultant.id)
            .await
            .unwrap();
        assert_eq!(announced, if cancel.is_ok() { 1 } else { 0 });
    }

    #[tokio::test]
    async fn stale_reschedule_does_not_move_a_cancelled_session() {
        let app = TestApp::new().await;
        let consultant = app.user("c@example.com", UserRole::Consultant).await;
        let details = SessionService::create(&app.state, &consultant, new_session(&[]))
            .await
            .unwrap();
        let id = details.session.id;
        SessionService::transition(&app.state, &consultant, &id, SessionStatus::Cancelled)
            .await
            .unwrap();

        let moved = TrainingSessionRepository::reschedule(
            &app.state.db,
            &id,
            Utc::now().naive_utc() + Duration::days(5),
        )
        .await
        .unwrap();
        assert!(moved.is_none());
        let stored = TrainingSessionRepository::find_by_id(&app.state.db, &id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.scheduled_at, details.session.scheduled_at);
    }
}
