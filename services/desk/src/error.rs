//! services/desk/src/error.rs
//!
//! Everything a terminal command or startup step can fail with. Port errors
//! pass through unchanged so the input loop can tell a missing sign-in apart
//! from a broken backend.

use crate::config::ConfigError;
use loan_desk_core::ports::PortError;

#[derive(Debug, thiserror::Error)]
pub enum DeskError {
    /// Missing or malformed environment at startup (`API_URL`, `DATABASE_URL`, ...).
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// A chat, profile, status or identity operation was refused or failed.
    /// `PortError::Unauthorized` here means the user has to sign in first.
    #[error("{0}")]
    Port(#[from] PortError),

    /// The Postgres pool could not be opened.
    #[error("Database unavailable: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Could not prepare the document tables: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// Reading a file to upload, writing a sanction letter, or reading stdin.
    #[error("File error: {0}")]
    Io(#[from] std::io::Error),

    /// An upload was attempted before the profile working copy was loaded.
    #[error("The profile is not loaded yet; run /profile first")]
    ProfileNotLoaded,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn port_errors_keep_their_own_message() {
        let error = DeskError::from(PortError::NotFound("No sanction letter in this chat".into()));
        assert_eq!(error.to_string(), "Item not found: No sanction letter in this chat");
        assert!(matches!(
            DeskError::from(PortError::Unauthorized),
            DeskError::Port(PortError::Unauthorized)
        ));
    }
}
