//! Shared configuration logic
//!
//! Handles loading of common environment variables.

use anyhow::{Context, Result};
use std::env;

use crate::validation::validate_webhook_url;

/// Process-wide configuration used across services
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Database connection URL
    pub database_url: String,

    /// Base64-encoded 32-byte key for the credential cipher
    pub master_key: String,

    /// Global cooldown between stale alerts for one source, seconds
    pub stale_cooldown_secs: u64,

    /// Global default: dispatch alerts over webhooks
    pub webhook_enabled: bool,

    /// Global webhook targets (user preferences may add personal ones)
    pub webhook_urls: Vec<String>,

    /// Global default: dispatch alerts over email
    pub email_enabled: bool,

    /// Operator recipients added to every alert email
    pub admin_emails: Vec<String>,

    /// SMTP settings; None when email alerting is unconfigured
    pub smtp: Option<SmtpConfig>,
}

/// SMTP transport settings
#[derive(Debug, Clone)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub from: String,
    /// true = SMTPS (implicit TLS, minimum 1.2); false = plain, local relays only
    pub use_tls: bool,
    pub pool_size: u32,
}

impl AppConfig {
    /// Load configuration from environment variables
    ///
    /// This will also initialize dotenv if it hasn't been done yet.
    pub fn from_env() -> Result<Self> {
        // Load .env file if it exists
        dotenvy::dotenv().ok();

        let database_url = env::var("DATABASE_URL")
            .unwrap_or_else(|_| "sqlite://calbridge.db?mode=rwc".to_string());

        let master_key =
            env::var("CALBRIDGE_MASTER_KEY").context("CALBRIDGE_MASTER_KEY must be set")?;

        let stale_cooldown_secs: u64 = env::var("ALERT_COOLDOWN_SECS")
            .unwrap_or_else(|_| "1800".to_string())
            .parse()
            .context("ALERT_COOLDOWN_SECS must be a valid integer")?;
        if stale_cooldown_secs < 60 {
            anyhow::bail!(crate::error::ValidationError::CooldownTooShort(
                stale_cooldown_secs
            ));
        }

        let webhook_urls = parse_list(&env::var("ALERT_WEBHOOK_URLS").unwrap_or_default());
        for url in &webhook_urls {
            validate_webhook_url(url)
                .with_context(|| format!("ALERT_WEBHOOK_URLS entry rejected: {}", url))?;
        }

        let webhook_enabled = parse_bool(&env::var("ALERT_WEBHOOK_ENABLED").unwrap_or_default())
            .unwrap_or(!webhook_urls.is_empty());

        let admin_emails = parse_list(&env::var("ALERT_ADMIN_EMAILS").unwrap_or_default());

        let smtp = Self::smtp_from_env()?;
        let email_enabled = parse_bool(&env::var("ALERT_EMAIL_ENABLED").unwrap_or_default())
            .unwrap_or(smtp.is_some());

        Ok(Self {
            database_url,
            master_key,
            stale_cooldown_secs,
            webhook_enabled,
            webhook_urls,
            email_enabled,
            admin_emails,
            smtp,
        })
    }

    fn smtp_from_env() -> Result<Option<SmtpConfig>> {
        let Ok(host) = env::var("SMTP_HOST") else {
            return Ok(None);
        };

        let port: i64 = env::var("SMTP_PORT")
            .unwrap_or_else(|_| "587".to_string())
            .parse()
            .context("SMTP_PORT must be a valid integer")?;
        if !(1..=65535).contains(&port) {
            anyhow::bail!(crate::error::ValidationError::SmtpPortOutOfRange(port));
        }

        Ok(Some(SmtpConfig {
            host,
            port: port as u16,
            username: env::var("SMTP_USERNAME").ok(),
            password: env::var("SMTP_PASSWORD").ok(),
            from: env::var("SMTP_FROM").context("SMTP_FROM must be set when SMTP_HOST is")?,
            use_tls: parse_bool(&env::var("SMTP_TLS").unwrap_or_default()).unwrap_or(true),
            pool_size: env::var("SMTP_POOL_SIZE")
                .unwrap_or_else(|_| "2".to_string())
                .parse()
                .context("SMTP_POOL_SIZE must be a valid integer")?,
        }))
    }
}

fn parse_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
