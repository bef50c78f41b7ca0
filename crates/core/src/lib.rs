//! CalBridge Core - Domain logic and models
//!
//! This crate contains pure domain logic with no I/O operations.
//! All database models, shared configuration, and error types are defined here.

pub mod config;
pub mod error;
pub mod models;
pub mod security;
pub mod validation;

pub use config::{AppConfig, SmtpConfig};
pub use error::{CipherError, ValidationError};
pub use models::{
    ConflictStrategy, MalformedEvent, MalformedEventWithSource, Source, SyncDirection, SyncLog,
    SyncState, SyncStatus, SyncedEvent, User, UserAlertPreferences,
};
pub use security::{CredentialCipher, XChaChaCipher};
pub use validation::{
    is_valid_email, sanitize_header_value, sanitize_log_details, validate_webhook_url,
};
