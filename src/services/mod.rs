pub mod auth;
pub mod init;
pub mod notifications;
pub mod sessions;
pub mod video;
pub mod webhooks;
