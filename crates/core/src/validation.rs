//! Validation and sanitization utilities
//!
//! Shared input hygiene for alert dispatch and log persistence.

use url::Url;

use crate::error::{ValidationError, ValidationResult};

/// Maximum length for sanitized header-bound values (subjects, names)
pub const MAX_HEADER_VALUE_LENGTH: usize = 200;

/// Maximum length for persisted sync-log details
pub const MAX_LOG_DETAILS_LENGTH: usize = 2000;

/// Private IPv4 prefixes rejected for webhook hosts
const PRIVATE_PREFIXES: [&str; 18] = [
    "10.", "192.168.", "172.16.", "172.17.", "172.18.", "172.19.", "172.20.", "172.21.",
    "172.22.", "172.23.", "172.24.", "172.25.", "172.26.", "172.27.", "172.28.", "172.29.",
    "172.30.", "172.31.",
];

/// Validate a webhook URL against SSRF targets
///
/// Applied both at configuration time and again immediately before dispatch.
/// Only https URLs to public-looking hosts pass; the URL is never dialed to
/// decide.
pub fn validate_webhook_url(raw: &str) -> ValidationResult<()> {
    let url = Url::parse(raw)
        .map_err(|_| ValidationError::InvalidWebhookUrl(format!("{}: not a valid URL", raw)))?;

    if url.scheme() != "https" {
        return Err(ValidationError::InvalidWebhookUrl(format!(
            "{}: scheme must be https",
            raw
        )));
    }

    let host = url
        .host_str()
        .ok_or_else(|| ValidationError::InvalidWebhookUrl(format!("{}: missing host", raw)))?
        .trim_start_matches('[')
        .trim_end_matches(']')
        .to_lowercase();

    if host == "localhost" || host == "127.0.0.1" || host == "::1" {
        return Err(ValidationError::InvalidWebhookUrl(format!(
            "{}: loopback host",
            raw
        )));
    }

    if host.ends_with(".local") || host.ends_with(".internal") {
        return Err(ValidationError::InvalidWebhookUrl(format!(
            "{}: internal hostname",
            raw
        )));
    }

    if PRIVATE_PREFIXES.iter().any(|p| host.starts_with(p)) {
        return Err(ValidationError::InvalidWebhookUrl(format!(
            "{}: private address range",
            raw
        )));
    }

    Ok(())
}

/// Check that an address is plausibly deliverable email
///
/// Intentionally loose: the SMTP server is the authority. This only rejects
/// inputs that would corrupt headers or are structurally hopeless.
pub fn is_valid_email(addr: &str) -> bool {
    if addr.is_empty() || addr.len() > 254 {
        return false;
    }
    if addr.chars().any(|c| c.is_control() || c.is_whitespace()) {
        return false;
    }
    let Some((local, domain)) = addr.split_once('@') else {
        return false;
    };
    !local.is_empty() && domain.contains('.') && !domain.starts_with('.') && !domain.ends_with('.')
}

/// Sanitize a value destined for a mail header
///
/// Strips CR, folds LF to spaces, and caps the length. Prevents header
/// injection from user-controlled source names and messages.
pub fn sanitize_header_value(value: &str) -> String {
    let cleaned: String = value.replace('\r', "").replace('\n', " ");
    if cleaned.len() > MAX_HEADER_VALUE_LENGTH {
        let mut end = MAX_HEADER_VALUE_LENGTH;
        while !cleaned.is_char_boundary(end) {
            end -= 1;
        }
        cleaned[..end].to_string()
    } else {
        cleaned
    }
}

/// Sanitize sync-log details before persistence
///
/// Redacts lines carrying credential material and caps the result at
/// [`MAX_LOG_DETAILS_LENGTH`] with a truncation marker.
pub fn sanitize_log_details(details: &str) -> String {
    let redacted: String = details
        .lines()
        .map(|line| {
            let lower = line.to_lowercase();
            if lower.contains("password")
                || lower.contains("authorization")
                || lower.contains("bearer ")
                || lower.contains("secret")
            {
                "[redacted]"
            } else {
                line
            }
        })
        .collect::<Vec<_>>()
        .join("\n");

    if redacted.len() > MAX_LOG_DETAILS_LENGTH {
        let mut end = MAX_LOG_DETAILS_LENGTH;
        while !redacted.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}... (truncated)", &redacted[..end])
    } else {
        redacted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_webhook_accepts_public_https() {
        assert!(validate_webhook_url("https://hooks.example.com/abc").is_ok());
        assert!(validate_webhook_url("https://93.184.216.34/hook").is_ok());
    }

    #[test]
    fn test_webhook_rejects_non_https() {
        assert!(validate_webhook_url("http://hooks.example.com/abc").is_err());
        assert!(validate_webhook_url("ftp://hooks.example.com").is_err());
        assert!(validate_webhook_url("not a url").is_err());
    }

    #[test]
    fn test_webhook_rejects_loopback() {
        assert!(validate_webhook_url("https://localhost/hook").is_err());
        assert!(validate_webhook_url("https://127.0.0.1/hook").is_err());
        assert!(validate_webhook_url("https://[::1]/hook").is_err());
    }

    #[test]
    fn test_webhook_rejects_internal_suffixes() {
        assert!(validate_webhook_url("https://nas.local/hook").is_err());
        assert!(validate_webhook_url("https://vault.internal/hook").is_err());
        assert!(validate_webhook_url("https://NAS.LOCAL/hook").is_err());
    }

    #[test]
    fn test_webhook_rejects_private_ranges() {
        assert!(validate_webhook_url("https://10.0.0.5/hook").is_err());
        assert!(validate_webhook_url("https://192.168.1.1/hook").is_err());
        for third in 16..=31 {
            let url = format!("https://172.{}.0.1/hook", third);
            assert!(validate_webhook_url(&url).is_err(), "{} should fail", url);
        }
        // 172.15 and 172.32 are public
        assert!(validate_webhook_url("https://172.15.0.1/hook").is_ok());
        assert!(validate_webhook_url("https://172.32.0.1/hook").is_ok());
    }

    #[test]
    fn test_email_validation() {
        assert!(is_valid_email("ops@example.com"));
        assert!(!is_valid_email(""));
        assert!(!is_valid_email("no-at-sign"));
        assert!(!is_valid_email("a@nodot"));
        assert!(!is_valid_email("evil@example.com\r\nBcc: x@y.com"));
    }

    #[test]
    fn test_sanitize_header_value() {
        assert_eq!(
            sanitize_header_value("line one\r\nline two"),
            "line one line two"
        );
        let long = "x".repeat(500);
        assert_eq!(sanitize_header_value(&long).len(), MAX_HEADER_VALUE_LENGTH);
    }

    #[test]
    fn test_sanitize_log_details_redacts() {
        let details = "calendar /cal/a failed\npassword=hunter2\nAuthorization: Basic abc";
        let out = sanitize_log_details(details);
        assert!(out.contains("calendar /cal/a failed"));
        assert!(!out.contains("hunter2"));
        assert!(!out.contains("Basic abc"));
    }

    #[test]
    fn test_sanitize_log_details_truncates() {
        let details = "y".repeat(5000);
        let out = sanitize_log_details(&details);
        assert!(out.len() < 2100);
        assert!(out.ends_with("... (truncated)"));
    }
}
