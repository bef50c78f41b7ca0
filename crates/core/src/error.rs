//! Error types for CalBridge core domain logic

use thiserror::Error;

/// Configuration-time validation errors
#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("Invalid webhook URL: {0}")]
    InvalidWebhookUrl(String),

    #[error("Invalid email address: {0}")]
    InvalidEmail(String),

    #[error("SMTP port out of range: {0}")]
    SmtpPortOutOfRange(i64),

    #[error("Alert cooldown too short: {0}s (minimum 60s)")]
    CooldownTooShort(u64),

    #[error("Sync interval too short: {0}s (minimum 60s)")]
    IntervalTooShort(i64),
}

/// Credential cipher errors
#[derive(Error, Debug)]
pub enum CipherError {
    #[error("Invalid encryption key: {0}")]
    InvalidKey(String),

    #[error("Encryption failed")]
    EncryptFailed,

    #[error("Decryption failed")]
    DecryptFailed,
}

/// Result type alias for validation
pub type ValidationResult<T> = Result<T, ValidationError>;
