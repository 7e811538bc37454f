use std::sync::Arc;

use crate::db::{
    SessionStatus, TrainingSessionRepository, User, UserRepository, VideoParticipant, VideoRepository,
    VideoRoom, VideoRoomStatus,
};
use crate::error::{AppError, AppResult};
use crate::services::auth::AuthService;
use crate::AppState;

const ROOM_NAME_PREFIX: &str = "emdr-";
const ROOM_NAME_RANDOM_LEN: usize = 12;

#[derive(Debug, Clone)]
pub struct RoomDetails {
    pub room: VideoRoom,
    pub participants: Vec<VideoParticipant>,
}

/// Room and participant bookkeeping for the external conferencing vendor.
pub struct VideoService;

impl VideoService {
    pub fn generate_room_name() -> String {
        format!(
            "{}{}",
            ROOM_NAME_PREFIX,
            AuthService::generate_random_string(ROOM_NAME_RANDOM_LEN)
        )
    }

    /// Consultant, participants of the room's session, or an administrator.
    async fn ensure_member(state: &Arc<AppState>, actor: &User, session_id: &str) -> AppResult<()> {
        if actor.is_admin() {
            return Ok(());
        }
        let session = TrainingSessionRepository::find_by_id(&state.db, session_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Session {}", session_id)))?;
        if session.consultant_id == actor.id {
            return Ok(());
        }
        let participants = TrainingSessionRepository::participant_ids(&state.db, session_id).await?;
        if participants.iter().any(|p| p == &actor.id) {
            return Ok(());
        }
        Err(AppError::Forbidden)
    }

    async fn find_room(state: &Arc<AppState>, room_id: &str) -> AppResult<VideoRoom> {
        VideoRepository::find_room(&state.db, room_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Video room {}", room_id)))
    }

    async fn details(state: &Arc<AppState>, room: VideoRoom) -> AppResult<RoomDetails> {
        let participants = VideoRepository::participants(&state.db, &room.id).await?;
        Ok(RoomDetails { room, participants })
    }

    pub async fn create_room(
        state: &Arc<AppState>,
        actor: &User,
        session_id: &str,
    ) -> AppResult<RoomDetails> {
        let session = TrainingSessionRepository::find_by_id(&state.db, session_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Session {}", session_id)))?;
        Self::ensure_member(state, actor, &session.id).await?;

        if !matches!(
            session.status,
            SessionStatus::Scheduled | SessionStatus::InProgress
        ) {
            return Err(AppError::Conflict(format!(
                "Session {} is {}",
                session.id, session.status
            )));
        }
        if let Some(open) = VideoRepository::find_open_room_for_session(&state.db, &session.id).await? {
            return Err(AppError::Conflict(format!(
                "Session {} already has open room {}",
                session.id, open.room_name
            )));
        }

        let room =
            VideoRepository::create_room(&state.db, &session.id, &Self::generate_room_name()).await?;
        tracing::info!("Opened video room {} for session {}", room.room_name, session.id);
        Self::details(state, room).await
    }

    pub async fn get_room(
        state: &Arc<AppState>,
        actor: &User,
        room_id: &str,
    ) -> AppResult<RoomDetails> {
        let room = Self::find_room(state, room_id).await?;
        Self::ensure_member(state, actor, &room.session_id).await?;
        Self::details(state, room).await
    }

    pub async fn join(state: &Arc<AppState>, actor: &User, room_id: &str) -> AppResult<RoomDetails> {
        let room = Self::find_room(state, room_id).await?;
        Self::ensure_member(state, actor, &room.session_id).await?;
        Self::record_join(state, &room, &actor.id).await?;
        Self::details(state, room).await
    }

    pub async fn leave(state: &Arc<AppState>, actor: &User, room_id: &str) -> AppResult<RoomDetails> {
        let room = Self::find_room(state, room_id).await?;
        Self::ensure_member(state, actor, &room.session_id).await?;
        Self::record_leave(state, &room, &actor.id).await?;
        Self::details(state, room).await
    }

    pub async fn end(state: &Arc<AppState>, actor: &User, room_id: &str) -> AppResult<RoomDetails> {
        let room = Self::find_room(state, room_id).await?;
        Self::ensure_member(state, actor, &room.session_id).await?;
        if !actor.is_staff() {
            return Err(AppError::Forbidden);
        }
        let room = Self::close(state, room).await?;
        Self::details(state, room).await
    }

    async fn record_join(state: &Arc<AppState>, room: &VideoRoom, user_id: &str) -> AppResult<()> {
        if room.status != VideoRoomStatus::Open {
            return Err(AppError::Conflict(format!(
                "Video room {} is closed",
                room.room_name
            )));
        }
        VideoRepository::join(&state.db, &room.id, user_id).await?;
        tracing::debug!("User {} joined room {}", user_id, room.room_name);
        Ok(())
    }

    /// Leaving a room one is not present in is a no-op.
    async fn record_leave(state: &Arc<AppState>, room: &VideoRoom, user_id: &str) -> AppResult<()> {
        if VideoRepository::leave(&state.db, &room.id, user_id).await? {
            tracing::debug!("User {} left room {}", user_id, room.room_name);
        }
        Ok(())
    }

    /// Ending an already closed room returns it unchanged.
    async fn close(state: &Arc<AppState>, room: VideoRoom) -> AppResult<VideoRoom> {
        if room.status == VideoRoomStatus::Closed {
            return Ok(room);
        }
        let closed = VideoRepository::close_room(&state.db, &room.id).await?;
        tracing::info!("Closed video room {}", closed.room_name);
        Ok(closed)
    }

    async fn find_room_by_name(state: &Arc<AppState>, room_name: &str) -> AppResult<VideoRoom> {
        VideoRepository::find_room_by_name(&state.db, room_name)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Video room {}", room_name)))
    }

    /// Vendor-reported join. The vendor authenticates the user, so only
    /// existence is checked here.
    pub async fn vendor_participant_joined(
        state: &Arc<AppState>,
        room_name: &str,
        user_id: &str,
    ) -> AppResult<()> {
        let room = Self::find_room_by_name(state, room_name).await?;
        if UserRepository::find_by_id(&state.db, user_id).await?.is_none() {
            return Err(AppError::NotFound(format!("User {}", user_id)));
        }
        Self::record_join(state, &room, user_id).await
    }

    pub async fn vendor_participant_left(
        state: &Arc<AppState>,
        room_name: &str,
        user_id: &str,
    ) -> AppResult<()> {
        let room = Self::find_room_by_name(state, room_name).await?;
        Self::record_leave(state, &room, user_id).await
    }

    pub async fn vendor_room_ended(state: &Arc<AppState>, room_name: &str) -> AppResult<()> {
        let room = Self::find_room_by_name(state, room_name).await?;
        Self::close(state, room).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::UserRole;
    use crate::testing::{self, TestApp};
    use chrono::{Duration, Utc};

    async fn setup() -> (TestApp, User, User, String) {
        let app = TestApp::new().await;
        let consultant = app.user("c@example.com", UserRole::Consultant).await;
        let student = app.user("s@example.com", UserRole::Student).await;
        let session = testing::create_session(
            &app.state,
            &consultant.id,
            &[student.id.clone()],
            Utc::now().naive_utc() + Duration::hours(1),
        )
        .await;
        (app, consultant, student, session.id)
    }

    #[test]
    fn room_names_are_prefixed() {
        let name = VideoService::generate_room_name();
        assert!(name.starts_with("emdr-"));
        assert_eq!(name.len(), "emdr-".len() + 12);
    }

    #[tokio::test]
    async fn concurrent_room_creation_conflicts_instead_of_failing() {
        let (app, consultant, student, session_id) = setup().await;
        let (a, b) = tokio::join!(
            VideoService::create_room(&app.state, &consultant, &session_id),
            VideoService::create_room(&app.state, &student, &session_id),
        );
        let results = [a, b];
        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(results
            .iter()
            .any(|r| matches!(r, Err(AppError::Conflict(_)))));
    }

    #[tokio::test]
    async fn second_open_room_insert_is_a_conflict() {
        let (app, _, _, session_id) = setup().await;
        VideoRepository::create_room(&app.state.db, &session_id, "emdr-first")
            .await
            .unwrap();
        let err = VideoRepository::create_room(&app.state.db, &session_id, "emdr-second")
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
        assert_eq!(err.status(), axum::http::StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn one_open_room_per_session() {
        let (app, consultant, _, session_id) = setup().await;
        VideoService::create_room(&app.state, &consultant, &session_id)
            .await
            .unwrap();
        let err = VideoService::create_room(&app.state, &consultant, &session_id)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
    }

    #[tokio::test]
    async fn join_leave_and_end() {
        let (app, consultant, student, session_id) = setup().await;
        let room = VideoService::create_room(&app.state, &consultant, &session_id)
            .await
            .unwrap()
            .room;

        VideoService::join(&app.state, &consultant, &room.id).await.unwrap();
        let details = VideoService::join(&app.state, &student, &room.id).await.unwrap();
        assert_eq!(details.participants.len(), 2);

        let details = VideoService::leave(&app.state, &student, &room.id).await.unwrap();
        let student_row = details
            .participants
            .iter()
            .find(|p| p.user_id == student.id)
            .unwrap();
        assert!(!student_row.is_present());

        // Students cannot end a room.
        let err = VideoService::end(&app.state, &student, &room.id).await.unwrap_err();
        assert!(matches!(err, AppError::Forbidden));

        let details = VideoService::end(&app.state, &consultant, &room.id).await.unwrap();
        assert_eq!(details.room.status, VideoRoomStatus::Closed);
        assert!(details.room.ended_at.is_some());
        assert!(details.participants.iter().all(|p| !p.is_present()));

        let err = VideoService::join(&app.state, &student, &room.id).await.unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
    }

    #[tokio::test]
    async fn outsiders_are_rejected() {
        let (app, consultant, _, session_id) = setup().await;
        let outsider = app.user("o@example.com", UserRole::Student).await;
        let room = VideoService::create_room(&app.state, &consultant, &session_id)
            .await
            .unwrap()
            .room;
        let err = VideoService::join(&app.state, &outsider, &room.id).await.unwrap_err();
        assert!(matches!(err, AppError::Forbidden));
    }

    #[tokio::test]
    async fn vendor_events_update_bookkeeping() {
        let (app, consultant, student, session_id) = setup().await;
        let room = VideoService::create_room(&app.state, &consultant, &session_id)
            .await
            .unwrap()
            .room;

        VideoService::vendor_participant_joined(&app.state, &room.room_name, &student.id)
            .await
            .unwrap();
        VideoService::vendor_participant_left(&app.state, &room.room_name, &student.id)
            .await
            .unwrap();
        VideoService::vendor_room_ended(&app.state, &room.room_name)
            .await
            .unwrap();
        // Repeated end notifications are harmless.
        VideoService::vendor_room_ended(&app.state, &room.room_name)
            .await
            .unwrap();

        let details = VideoService::get_room(&app.state, &consultant, &room.id).await.unwrap();
        assert_eq!(details.room.status, VideoRoomStatus::Closed);
        assert_eq!(details.participants.len(), 1);

        let err = VideoService::vendor_room_ended(&app.state, "emdr-missing")
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }
}
