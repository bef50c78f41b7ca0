//! Error types for CalDAV operations

use thiserror::Error;

/// CalDAV client errors
///
/// Structural failures (connection, auth, discovery) terminate a sync run;
/// `MalformedContent` never does, it is collected and skipped.
#[derive(Debug, Error)]
pub enum CalDavError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Authentication failed: {0}")]
    AuthFailed(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Invalid server response: {0}")]
    InvalidResponse(String),

    #[error("Malformed calendar object: {0}")]
    MalformedContent(String),

    #[error("Server does not support sync-collection")]
    NotSupported,
}

impl CalDavError {
    /// True for errors that abort a sync run at the structural phase
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            Self::ConnectionFailed(_) | Self::AuthFailed(_) | Self::InvalidResponse(_)
        )
    }
}
