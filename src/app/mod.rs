pub mod auth;
pub mod directory;
pub mod error;
pub mod issues;
pub mod mailer;
pub mod moderation;
pub mod notifications;
pub mod preferences;
pub mod store;
pub mod tokens;
