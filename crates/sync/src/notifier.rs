//! Stale/recovery alert state machine
//!
//! One entry per source: whether it is currently considered stale and when
//! the last alert went out. Alert dispatch is fire-and-forget; the state
//! transition is what callers can rely on.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{error, info, warn};
use uuid::Uuid;

use calbridge_core::{AppConfig, UserAlertPreferences, is_valid_email, sanitize_header_value};

use crate::mailer::Mailer;
use crate::webhook::{AlertPayload, post_webhook};

/// Subject prefix on every alert email
const PRODUCT_TAG: &str = "[CalBridge]";

/// Alert routing configuration (the global defaults)
#[derive(Debug, Clone)]
pub struct AlertConfig {
    /// Minimum spacing between stale alerts for one source
    pub cooldown: Duration,
    pub webhook_enabled: bool,
    pub webhook_urls: Vec<String>,
    pub email_enabled: bool,
    pub admin_emails: Vec<String>,
}

impl From<&AppConfig> for AlertConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            // AppConfig::from_env enforces the 60s floor
            cooldown: Duration::from_secs(config.stale_cooldown_secs.max(60)),
            webhook_enabled: config.webhook_enabled,
            webhook_urls: config.webhook_urls.clone(),
            email_enabled: config.email_enabled,
            admin_emails: config.admin_emails.clone(),
        }
    }
}

#[derive(Debug, Default, Clone)]
struct SourceAlertState {
    is_stale: bool,
    last_alert_at: Option<DateTime<Utc>>,
}

struct NotifierInner {
    config: AlertConfig,
    mailer: Option<Mailer>,
    http: reqwest::Client,
    state: Mutex<HashMap<Uuid, SourceAlertState>>,
}

/// Per-process notifier; clones share state
#[derive(Clone)]
pub struct Notifier {
    inner: Arc<NotifierInner>,
}

impl std::fmt::Debug for Notifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Notifier")
            .field("config", &self.inner.config)
            .finish()
    }
}

impl Notifier {
    pub fn new(config: AlertConfig, mailer: Option<Mailer>) -> Self {
        let http = reqwest::Client::builder()
            .use_rustls_tls()
            .min_tls_version(reqwest::tls::Version::TLS_1_2)
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_default();

        Self {
            inner: Arc::new(NotifierInner {
                config,
                mailer,
                http,
                state: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Signal that a source has gone stale
    ///
    /// Returns true when an alert was dispatched, false when suppressed by
    /// the cooldown. Marking happens before dispatch so a slow transport
    /// cannot let a second alert slip through.
    pub fn send_stale_alert(
        &self,
        source_id: Uuid,
        source_name: &str,
        user_email: Option<String>,
        time_since_sync: chrono::Duration,
        threshold_secs: i64,
        prefs: Option<&UserAlertPreferences>,
    ) -> bool {
        let cooldown = prefs
            .and_then(|p| p.cooldown_minutes)
            .filter(|m| *m > 0)
            .map(|m| Duration::from_secs(m as u64 * 60))
            .unwrap_or(self.inner.config.cooldown);

        let now = Utc::now();
        {
            let Ok(mut state) = self.inner.state.lock() else {
                return false;
            };
            let entry = state.entry(source_id).or_default();
            if entry.is_stale {
                if let Some(last) = entry.last_alert_at {
                    let since = (now - last).to_std().unwrap_or(Duration::ZERO);
                    if since < cooldown {
                        return false;
                    }
                }
            }
            entry.is_stale = true;
            entry.last_alert_at = Some(now);
        }

        let minutes = time_since_sync.num_minutes();
        let payload = AlertPayload::new(
            "stale",
            source_id,
            source_name,
            &format!("has not synced for {} minutes", minutes),
            &format!("stale threshold: {} seconds", threshold_secs),
        );
        info!("Stale alert for source {} ({})", source_name, source_id);
        self.dispatch(payload, user_email, prefs.cloned());
        true
    }

    /// Signal that a previously stale source synced again
    ///
    /// Returns false when the source was not marked stale.
    pub fn send_recovery_alert(
        &self,
        source_id: Uuid,
        source_name: &str,
        user_email: Option<String>,
        prefs: Option<&UserAlertPreferences>,
    ) -> bool {
        {
            let Ok(mut state) = self.inner.state.lock() else {
                return false;
            };
            match state.get_mut(&source_id) {
                Some(entry) if entry.is_stale => {
                    entry.is_stale = false;
                    entry.last_alert_at = None;
                }
                _ => return false,
            }
        }

        let payload = AlertPayload::new(
            "recovery",
            source_id,
            source_name,
            "is syncing again",
            "",
        );
        info!("Recovery alert for source {} ({})", source_name, source_id);
        self.dispatch(payload, user_email, prefs.cloned());
        true
    }

    /// Forget everything about a source (called on source deletion)
    pub fn clear_stale_state(&self, source_id: Uuid) {
        if let Ok(mut state) = self.inner.state.lock() {
            state.remove(&source_id);
        }
    }

    /// Whether a source is currently marked stale
    pub fn is_stale(&self, source_id: Uuid) -> bool {
        self.inner
            .state
            .lock()
            .ok()
            .and_then(|state| state.get(&source_id).map(|e| e.is_stale))
            .unwrap_or(false)
    }

    /// Dispatch an alert through every enabled transport, asynchronously
    fn dispatch(
        &self,
        payload: AlertPayload,
        user_email: Option<String>,
        prefs: Option<UserAlertPreferences>,
    ) {
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            let prefs = prefs.as_ref();

            // Webhooks: user override falls back to the global default
            let webhook_enabled = prefs
                .and_then(|p| p.webhook_enabled)
                .unwrap_or(inner.config.webhook_enabled);
            if webhook_enabled {
                let mut urls: Vec<&str> =
                    inner.config.webhook_urls.iter().map(String::as_str).collect();
                if let Some(personal) = prefs.and_then(|p| p.webhook_url.as_deref()) {
                    if !personal.is_empty() {
                        urls.push(personal);
                    }
                }
                for url in urls {
                    post_webhook(&inner.http, url, &payload).await;
                }
            }

            // Email
            let email_enabled = prefs
                .and_then(|p| p.email_enabled)
                .unwrap_or(inner.config.email_enabled);
            if email_enabled {
                let Some(mailer) = &inner.mailer else {
                    warn!("Email alerting enabled but SMTP is not configured");
                    return;
                };

                let mut recipients: Vec<String> = Vec::new();
                if let Some(email) = &user_email {
                    if is_valid_email(email) {
                        recipients.push(email.to_lowercase());
                    }
                }
                for admin in &inner.config.admin_emails {
                    if is_valid_email(admin) {
                        let lowered = admin.to_lowercase();
                        if !recipients.contains(&lowered) {
                            recipients.push(lowered);
                        }
                    }
                }

                let subject = sanitize_header_value(&format!(
                    "{} Source {}: {}",
                    PRODUCT_TAG, payload.alert_type, payload.source_name
                ));
                let body = format!(
                    "Source {} {}.\n\n{}\n\nTime: {}\n",
                    sanitize_header_value(&payload.source_name),
                    payload.message,
                    payload.details,
                    payload.timestamp.to_rfc3339(),
                );

                for recipient in recipients {
                    if let Err(e) = mailer.send(&recipient, &subject, &body).await {
                        error!("Alert email to {} failed: {}", recipient, e);
                    }
                }
            }
        });
    }
}
