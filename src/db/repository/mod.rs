pub mod document;
pub mod notification;
pub mod progress;
pub mod training_session;
pub mod user;
pub mod video;

pub use document::DocumentRepository;
pub use notification::NotificationRepository;
pub use progress::ProgressRepository;
pub use training_session::TrainingSessionRepository;
pub use user::UserRepository;
pub use video::VideoRepository;
