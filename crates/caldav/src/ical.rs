//! iCalendar identity extraction and DTSTART normalization
//!
//! Events are mirrored wholesale; the client only needs each object's
//! identity: UID, SUMMARY, and DTSTART normalized to canonical UTC. The
//! normalized start feeds content-level duplicate detection, so two servers
//! that spell the same instant differently must land on the same string.

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use icalendar::{Calendar, CalendarComponent, CalendarDateTime, Component, DatePerhapsTime, EventLike};

use crate::error::CalDavError;

/// Canonical UTC form: `YYYYMMDDTHHMMSSZ`
const CANONICAL_UTC: &str = "%Y%m%dT%H%M%SZ";
const BASIC_LOCAL: &str = "%Y%m%dT%H%M%S";

/// Identity of a calendar object
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventIdentity {
    pub uid: String,
    pub summary: String,
    pub dtstart_utc: String,
}

/// Extract the identity of the first VEVENT in an iCalendar body
///
/// Returns `MalformedContent` for empty bodies, parser failures with a
/// malformed signature, and VEVENT-less objects; other parser failures map
/// to `InvalidResponse` so callers can choose their own disposition.
pub fn parse_identity(data: &str) -> Result<EventIdentity, CalDavError> {
    if data.trim().is_empty() {
        return Err(CalDavError::MalformedContent(
            "empty iCalendar data".to_string(),
        ));
    }

    let calendar: Calendar = data.parse().map_err(|e: String| {
        if is_malformed_signature(&e) {
            CalDavError::MalformedContent(e)
        } else {
            CalDavError::InvalidResponse(format!("iCalendar parse failed: {e}"))
        }
    })?;

    let event = calendar
        .components
        .iter()
        .find_map(|c| match c {
            CalendarComponent::Event(e) => Some(e),
            _ => None,
        })
        .ok_or_else(|| CalDavError::MalformedContent("no VEVENT component".to_string()))?;

    let uid = event.get_uid().unwrap_or_default().to_string();
    let summary = event.get_summary().unwrap_or_default().to_string();

    let dtstart_utc = match event.get_start() {
        Some(start) => start_to_utc(start),
        // The library could not decode DTSTART; normalize the raw value
        None => event
            .property_value("DTSTART")
            .map(|value| normalize_dtstart(value, None))
            .unwrap_or_default(),
    };

    Ok(EventIdentity {
        uid,
        summary,
        dtstart_utc,
    })
}

/// Render a decoded DTSTART in canonical UTC
fn start_to_utc(start: DatePerhapsTime) -> String {
    match start {
        DatePerhapsTime::DateTime(CalendarDateTime::Utc(dt)) => {
            dt.format(CANONICAL_UTC).to_string()
        }
        DatePerhapsTime::DateTime(CalendarDateTime::Floating(naive)) => Utc
            .from_utc_datetime(&naive)
            .format(CANONICAL_UTC)
            .to_string(),
        DatePerhapsTime::DateTime(CalendarDateTime::WithTimezone { date_time, tzid }) => {
            normalize_dtstart(&date_time.format(BASIC_LOCAL).to_string(), Some(&tzid))
        }
        DatePerhapsTime::Date(date) => date
            .and_hms_opt(0, 0, 0)
            .map(|naive| {
                Utc.from_utc_datetime(&naive)
                    .format(CANONICAL_UTC)
                    .to_string()
            })
            .unwrap_or_default(),
    }
}

/// Recognize parser messages that mean "the object itself is broken"
///
/// String sniffing is confined to this adapter boundary; everything above it
/// sees the typed `MalformedContent` variant.
pub(crate) fn is_malformed_signature(message: &str) -> bool {
    let lower = message.to_lowercase();
    lower.contains("malformed")
        || lower.contains("missing colon")
        || (lower.contains("invalid") && lower.contains("ical"))
}

/// Normalize a DTSTART value to canonical UTC
///
/// Handles, in order: the UTC wire form, IANA TZIDs, GMT/UTC offset TZIDs
/// (`GMT-0500`, `UTC+05:30`, `GMT+5` and friends), then best-effort naive
/// decodes. Unrecognizable input comes back verbatim so callers never lose
/// the original value.
pub fn normalize_dtstart(value: &str, tzid: Option<&str>) -> String {
    let value = value.trim();

    if let Some(stripped) = value.strip_suffix('Z') {
        if let Ok(naive) = NaiveDateTime::parse_from_str(stripped, BASIC_LOCAL) {
            return Utc
                .from_utc_datetime(&naive)
                .format(CANONICAL_UTC)
                .to_string();
        }
        return value.to_string();
    }

    if let Some(tzid) = tzid {
        if let Ok(naive) = NaiveDateTime::parse_from_str(value, BASIC_LOCAL) {
            if let Ok(tz) = tzid.parse::<Tz>() {
                if let Some(local) = tz.from_local_datetime(&naive).earliest() {
                    return local.with_timezone(&Utc).format(CANONICAL_UTC).to_string();
                }
            }
            if let Some(offset) = parse_offset_tzid(tzid) {
                if let Some(local) = offset.from_local_datetime(&naive).earliest() {
                    return local.with_timezone(&Utc).format(CANONICAL_UTC).to_string();
                }
            }
        }
    }

    // Best effort: naive date-times are read as UTC, DATE values as midnight
    if let Ok(naive) = NaiveDateTime::parse_from_str(value, BASIC_LOCAL) {
        return Utc
            .from_utc_datetime(&naive)
            .format(CANONICAL_UTC)
            .to_string();
    }
    if let Ok(parsed) = DateTime::parse_from_rfc3339(value) {
        return parsed.with_timezone(&Utc).format(CANONICAL_UTC).to_string();
    }
    if let Ok(date) = NaiveDate::parse_from_str(value, "%Y%m%d") {
        if let Some(naive) = date.and_hms_opt(0, 0, 0) {
            return Utc
                .from_utc_datetime(&naive)
                .format(CANONICAL_UTC)
                .to_string();
        }
    }

    value.to_string()
}

/// Parse GMT/UTC/Etc-GMT offset TZIDs into a fixed offset
///
/// Accepts `±HHMM`, `±HH:MM`, `±H`, `±HH`, and `±HMM` digit groups after the
/// prefix. The offset is read literally (`GMT-0500` is UTC-5).
fn parse_offset_tzid(tzid: &str) -> Option<FixedOffset> {
    let t = tzid.trim();
    let rest = t
        .strip_prefix("Etc/GMT")
        .or_else(|| t.strip_prefix("GMT"))
        .or_else(|| t.strip_prefix("UTC"))?;

    if rest.is_empty() {
        return FixedOffset::east_opt(0);
    }

    let mut chars = rest.chars();
    let sign = match chars.next() {
        Some('+') => 1,
        Some('-') => -1,
        _ => return None,
    };
    let digits = chars.as_str();

    let (hours, minutes): (i32, i32) = if let Some((hh, mm)) = digits.split_once(':') {
        (hh.parse().ok()?, mm.parse().ok()?)
    } else if digits.chars().all(|c| c.is_ascii_digit()) {
        match digits.len() {
            1 | 2 => (digits.parse().ok()?, 0),
            3 => (digits[..1].parse().ok()?, digits[1..].parse().ok()?),
            4 => (digits[..2].parse().ok()?, digits[2..].parse().ok()?),
            _ => return None,
        }
    } else {
        return None;
    };

    if hours > 14 || minutes > 59 {
        return None;
    }

    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_ICS: &str = "BEGIN:VCALENDAR\r\nVERSION:2.0\r\nPRODID:-//test//EN\r\nBEGIN:VEVENT\r\nUID:u1\r\nDTSTAMP:20240110T000000Z\r\nSUMMARY:Meeting\r\nDTSTART:20240115T140000Z\r\nDTEND:20240115T150000Z\r\nEND:VEVENT\r\nEND:VCALENDAR\r\n";

    #[test]
    fn test_parse_identity() {
        let identity = parse_identity(SAMPLE_ICS).unwrap();
        assert_eq!(identity.uid, "u1");
        assert_eq!(identity.summary, "Meeting");
        assert_eq!(identity.dtstart_utc, "20240115T140000Z");
    }

    #[test]
    fn test_parse_identity_with_tzid() {
        let tz_ics = "BEGIN:VCALENDAR\r\nVERSION:2.0\r\nPRODID:-//test//EN\r\nBEGIN:VEVENT\r\nUID:u2\r\nDTSTAMP:20240110T000000Z\r\nSUMMARY:Local\r\nDTSTART;TZID=America/New_York:20240115T140000\r\nEND:VEVENT\r\nEND:VCALENDAR\r\n";
        let identity = parse_identity(tz_ics).unwrap();
        assert_eq!(identity.dtstart_utc, "20240115T190000Z");
    }

    #[test]
    fn test_parse_identity_empty_is_malformed() {
        assert!(matches!(
            parse_identity("   "),
            Err(CalDavError::MalformedContent(m)) if m.contains("empty")
        ));
    }

    #[test]
    fn test_parse_identity_no_vevent_is_malformed() {
        let todo_only = "BEGIN:VCALENDAR\r\nVERSION:2.0\r\nBEGIN:VTODO\r\nUID:t1\r\nEND:VTODO\r\nEND:VCALENDAR\r\n";
        assert!(matches!(
            parse_identity(todo_only),
            Err(CalDavError::MalformedContent(_))
        ));
    }

    #[test]
    fn test_malformed_signature_detection() {
        assert!(is_malformed_signature("missing colon at line 5"));
        assert!(is_malformed_signature("Malformed component"));
        assert!(is_malformed_signature("invalid iCal structure"));
        assert!(!is_malformed_signature("connection reset by peer"));
    }

    #[test]
    fn test_normalize_utc_passthrough() {
        assert_eq!(
            normalize_dtstart("20240115T140000Z", None),
            "20240115T140000Z"
        );
    }

    #[test]
    fn test_normalize_iana_tzid() {
        // 14:00 in New York (EST, UTC-5) is 19:00 UTC
        assert_eq!(
            normalize_dtstart("20240115T140000", Some("America/New_York")),
            "20240115T190000Z"
        );
    }

    #[test]
    fn test_normalize_iana_tzid_dst() {
        // 14:00 in New York during DST (EDT, UTC-4) is 18:00 UTC
        assert_eq!(
            normalize_dtstart("20240715T140000", Some("America/New_York")),
            "20240715T180000Z"
        );
    }

    #[test]
    fn test_normalize_gmt_offset_tzid() {
        assert_eq!(
            normalize_dtstart("20240115T140000", Some("GMT-0500")),
            "20240115T190000Z"
        );
        assert_eq!(
            normalize_dtstart("20240115T140000", Some("UTC+05:30")),
            "20240115T083000Z"
        );
        assert_eq!(
            normalize_dtstart("20240115T140000", Some("GMT+5")),
            "20240115T090000Z"
        );
        assert_eq!(
            normalize_dtstart("20240115T140000", Some("GMT-530")),
            "20240115T193000Z"
        );
    }

    #[test]
    fn test_normalize_naive_as_utc() {
        assert_eq!(
            normalize_dtstart("20240115T140000", None),
            "20240115T140000Z"
        );
    }

    #[test]
    fn test_normalize_date_value() {
        assert_eq!(normalize_dtstart("20240115", None), "20240115T000000Z");
    }

    #[test]
    fn test_normalize_unparseable_returns_raw() {
        assert_eq!(normalize_dtstart("sometime soon", None), "sometime soon");
        assert_eq!(
            normalize_dtstart("20240115T140000", Some("Mars/Olympus")),
            "20240115T140000Z"
        );
    }
}
