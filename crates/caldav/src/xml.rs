//! CalDAV request bodies
//!
//! Fixed PROPFIND/REPORT bodies are kept as literals; the sync-collection
//! body is assembled with quick-xml so the opaque sync token is escaped.

use std::io::Cursor;

use quick_xml::Writer;
use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};

use crate::error::CalDavError;

pub const PROPFIND_CURRENT_USER_PRINCIPAL: &str = r#"<?xml version="1.0" encoding="utf-8" ?>
<d:propfind xmlns:d="DAV:">
  <d:prop>
    <d:current-user-principal/>
  </d:prop>
</d:propfind>"#;

pub const PROPFIND_CALENDAR_HOME_SET: &str = r#"<?xml version="1.0" encoding="utf-8" ?>
<d:propfind xmlns:d="DAV:" xmlns:c="urn:ietf:params:xml:ns:caldav">
  <d:prop>
    <c:calendar-home-set/>
  </d:prop>
</d:propfind>"#;

pub const PROPFIND_CALENDAR_LIST: &str = r#"<?xml version="1.0" encoding="utf-8" ?>
<d:propfind xmlns:d="DAV:" xmlns:c="urn:ietf:params:xml:ns:caldav" xmlns:x="http://apple.com/ns/ical/">
  <d:prop>
    <d:resourcetype/>
    <d:displayname/>
    <c:calendar-description/>
    <x:calendar-color/>
  </d:prop>
</d:propfind>"#;

pub const PROPFIND_COLLECTION_MEMBERS: &str = r#"<?xml version="1.0" encoding="utf-8" ?>
<d:propfind xmlns:d="DAV:">
  <d:prop>
    <d:resourcetype/>
    <d:getetag/>
    <d:getcontenttype/>
  </d:prop>
</d:propfind>"#;

pub const REPORT_CALENDAR_QUERY: &str = r#"<?xml version="1.0" encoding="utf-8" ?>
<c:calendar-query xmlns:d="DAV:" xmlns:c="urn:ietf:params:xml:ns:caldav">
  <d:prop>
    <d:getetag/>
    <c:calendar-data/>
  </d:prop>
  <c:filter>
    <c:comp-filter name="VCALENDAR">
      <c:comp-filter name="VEVENT"/>
    </c:comp-filter>
  </c:filter>
</c:calendar-query>"#;

/// Build the RFC 6578 sync-collection REPORT body
///
/// `None` requests an initial sync (empty `<sync-token/>`). Tokens are
/// server-opaque and may contain XML metacharacters; quick-xml escapes them
/// on write.
pub fn sync_collection_body(sync_token: Option<&str>) -> Result<String, CalDavError> {
    let mut writer = Writer::new_with_indent(Cursor::new(Vec::new()), b' ', 2);

    let mut root = BytesStart::new("d:sync-collection");
    root.push_attribute(("xmlns:d", "DAV:"));
    root.push_attribute(("xmlns:c", "urn:ietf:params:xml:ns:caldav"));
    writer.write_event(Event::Start(root))?;

    match sync_token {
        Some(token) if !token.is_empty() => {
            writer.write_event(Event::Start(BytesStart::new("d:sync-token")))?;
            writer.write_event(Event::Text(BytesText::new(token)))?;
            writer.write_event(Event::End(BytesEnd::new("d:sync-token")))?;
        }
        _ => {
            writer.write_event(Event::Empty(BytesStart::new("d:sync-token")))?;
        }
    }

    writer.write_event(Event::Start(BytesStart::new("d:sync-level")))?;
    writer.write_event(Event::Text(BytesText::new("1")))?;
    writer.write_event(Event::End(BytesEnd::new("d:sync-level")))?;

    writer.write_event(Event::Start(BytesStart::new("d:prop")))?;
    writer.write_event(Event::Empty(BytesStart::new("d:getetag")))?;
    writer.write_event(Event::Empty(BytesStart::new("c:calendar-data")))?;
    writer.write_event(Event::End(BytesEnd::new("d:prop")))?;

    writer.write_event(Event::End(BytesEnd::new("d:sync-collection")))?;

    String::from_utf8(writer.into_inner().into_inner())
        .map_err(|e| CalDavError::InvalidResponse(format!("UTF-8 error: {e}")))
}

impl From<quick_xml::Error> for CalDavError {
    fn from(e: quick_xml::Error) -> Self {
        Self::InvalidResponse(format!("XML error: {e}"))
    }
}

impl From<std::io::Error> for CalDavError {
    fn from(e: std::io::Error) -> Self {
        Self::InvalidResponse(format!("XML write error: {e}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_token_is_empty_element() {
        let body = sync_collection_body(None).unwrap();
        assert!(body.contains("<d:sync-token/>"));
        assert!(body.contains("<d:sync-level>1</d:sync-level>"));
        assert!(body.contains("<c:calendar-data/>"));
    }

    #[test]
    fn test_token_round_trips() {
        let body = sync_collection_body(Some("http://example.com/sync/42")).unwrap();
        assert!(body.contains("<d:sync-token>http://example.com/sync/42</d:sync-token>"));
    }

    #[test]
    fn test_token_metacharacters_escaped() {
        let body = sync_collection_body(Some(r#"tok<&>'"end"#)).unwrap();
        assert!(!body.contains("tok<&>"));
        assert!(body.contains("tok&lt;&amp;&gt;"));
    }
}
