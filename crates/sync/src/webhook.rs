//! Webhook alert delivery
//!
//! HTTPS POST of a JSON payload to pre-shared URLs. Every URL is revalidated
//! immediately before dialing; configuration-time validation alone cannot be
//! trusted once preferences have been edited.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::error;
use uuid::Uuid;

use calbridge_core::validate_webhook_url;

/// JSON body POSTed to webhook targets
#[derive(Debug, Clone, Serialize)]
pub struct AlertPayload {
    pub alert_type: String,
    pub source_id: Uuid,
    pub source_name: String,
    pub message: String,
    pub details: String,
    /// RFC 3339
    pub timestamp: DateTime<Utc>,
    /// Single-line rendering for chat-style receivers
    pub text: String,
}

impl AlertPayload {
    pub fn new(
        alert_type: &str,
        source_id: Uuid,
        source_name: &str,
        message: &str,
        details: &str,
    ) -> Self {
        Self {
            alert_type: alert_type.to_string(),
            source_id,
            source_name: source_name.to_string(),
            message: message.to_string(),
            details: details.to_string(),
            timestamp: Utc::now(),
            text: format!("[{}] {}: {}", alert_type, source_name, message),
        }
    }
}

/// POST one alert to one webhook URL
///
/// Failures are logged, never retried; an alert channel must not block or
/// amplify the failure it reports.
pub async fn post_webhook(client: &reqwest::Client, url: &str, payload: &AlertPayload) {
    if let Err(e) = validate_webhook_url(url) {
        error!("Refusing webhook dispatch: {}", e);
        return;
    }

    match client.post(url).json(payload).send().await {
        Ok(response) if response.status().as_u16() >= 400 => {
            error!(
                "Webhook {} rejected alert: HTTP {}",
                url,
                response.status()
            );
        }
        Ok(_) => {}
        Err(e) => {
            error!("Webhook {} dispatch failed: {}", url, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_shape() {
        let id = Uuid::new_v4();
        let payload = AlertPayload::new(
            "stale",
            id,
            "Work mirror",
            "has not synced for 45 minutes",
            "threshold: 30 minutes",
        );

        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["alert_type"], "stale");
        assert_eq!(json["source_id"], id.to_string());
        assert_eq!(json["source_name"], "Work mirror");
        assert!(json["timestamp"].as_str().unwrap().contains('T'));
        assert_eq!(
            json["text"],
            "[stale] Work mirror: has not synced for 45 minutes"
        );
    }
}
