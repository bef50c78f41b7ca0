//! Multistatus response parsing
//!
//! Streaming quick-xml parser for the WebDAV 207 bodies returned by
//! PROPFIND and REPORT. Namespace prefixes vary wildly between servers, so
//! matching is on local names only.

use quick_xml::Reader;
use quick_xml::events::Event;

use crate::error::CalDavError;

/// A parsed 207 Multi-Status body
#[derive(Debug, Clone, Default)]
pub(crate) struct Multistatus {
    /// RFC 6578 sync token carried as a direct child of multistatus
    pub sync_token: Option<String>,
    pub responses: Vec<DavResponse>,
}

/// One `<response>` element
#[derive(Debug, Clone, Default)]
pub(crate) struct DavResponse {
    pub href: String,
    /// Response-level status (RFC 6578 uses this to mark deletions)
    pub status: Option<String>,
    pub propstats: Vec<PropStat>,
}

impl DavResponse {
    /// Properties of the first propstat whose status reads as success
    pub fn ok_props(&self) -> Option<&DavProps> {
        self.propstats
            .iter()
            .find(|ps| ps.status.contains("200"))
            .map(|ps| &ps.props)
    }
}

/// One `<propstat>` element
#[derive(Debug, Clone, Default)]
pub(crate) struct PropStat {
    pub status: String,
    pub props: DavProps,
}

/// The property subset this client cares about
#[derive(Debug, Clone, Default)]
pub(crate) struct DavProps {
    pub etag: Option<String>,
    pub calendar_data: Option<String>,
    pub display_name: Option<String>,
    pub description: Option<String>,
    pub color: Option<String>,
    pub content_type: Option<String>,
    pub principal_href: Option<String>,
    pub home_set_href: Option<String>,
    pub is_calendar: bool,
    pub is_collection: bool,
}

impl Multistatus {
    /// Parse a multistatus document
    pub fn from_xml(xml: &str) -> Result<Self, CalDavError> {
        let mut reader = Reader::from_str(xml);
        reader.config_mut().trim_text(true);

        let mut parsed = Self::default();
        let mut current: Option<DavResponse> = None;
        let mut props = DavProps::default();
        let mut in_response = false;
        let mut in_propstat = false;
        let mut in_prop = false;

        let mut buf = Vec::new();

        loop {
            match reader.read_event_into(&mut buf)? {
                Event::Eof => break,

                Event::Start(ref e) => match e.name().local_name().into_inner() {
                    b"response" => {
                        in_response = true;
                        current = Some(DavResponse::default());
                    }
                    b"href" if in_response && !in_prop => {
                        if let Some(text) = read_text(&mut reader, &mut buf)? {
                            if let Some(ref mut resp) = current {
                                resp.href = text;
                            }
                        }
                    }
                    b"propstat" if in_response => {
                        in_propstat = true;
                        props = DavProps::default();
                    }
                    b"prop" if in_propstat => in_prop = true,
                    b"status" if in_propstat => {
                        if let Some(text) = read_text(&mut reader, &mut buf)? {
                            if let Some(ref mut resp) = current {
                                resp.propstats.push(PropStat {
                                    status: text,
                                    props: props.clone(),
                                });
                            }
                        }
                    }
                    b"status" if in_response => {
                        if let Some(text) = read_text(&mut reader, &mut buf)? {
                            if let Some(ref mut resp) = current {
                                resp.status = Some(text);
                            }
                        }
                    }
                    b"sync-token" if !in_response => {
                        parsed.sync_token = read_text(&mut reader, &mut buf)?;
                    }
                    b"getetag" if in_prop => {
                        props.etag = read_text(&mut reader, &mut buf)?;
                    }
                    b"calendar-data" if in_prop => {
                        props.calendar_data = read_text(&mut reader, &mut buf)?;
                    }
                    b"displayname" if in_prop => {
                        props.display_name = read_text(&mut reader, &mut buf)?;
                    }
                    b"calendar-description" if in_prop => {
                        props.description = read_text(&mut reader, &mut buf)?;
                    }
                    b"calendar-color" if in_prop => {
                        props.color = read_text(&mut reader, &mut buf)?;
                    }
                    b"getcontenttype" if in_prop => {
                        props.content_type = read_text(&mut reader, &mut buf)?;
                    }
                    b"resourcetype" if in_prop => {
                        let (is_collection, is_calendar) =
                            read_resourcetype(&mut reader, &mut buf)?;
                        props.is_collection = is_collection;
                        props.is_calendar = is_calendar;
                    }
                    b"current-user-principal" if in_prop => {
                        props.principal_href =
                            read_nested_href(&mut reader, &mut buf, b"current-user-principal")?;
                    }
                    b"calendar-home-set" if in_prop => {
                        props.home_set_href =
                            read_nested_href(&mut reader, &mut buf, b"calendar-home-set")?;
                    }
                    _ => {}
                },

                Event::End(ref e) => match e.name().local_name().into_inner() {
                    b"response" => {
                        in_response = false;
                        if let Some(resp) = current.take() {
                            parsed.responses.push(resp);
                        }
                    }
                    b"propstat" => in_propstat = false,
                    b"prop" => in_prop = false,
                    b"multistatus" => break,
                    _ => {}
                },

                _ => {}
            }
            buf.clear();
        }

        Ok(parsed)
    }
}

/// Read the text or CDATA content of the element just opened
fn read_text(
    reader: &mut Reader<&[u8]>,
    buf: &mut Vec<u8>,
) -> Result<Option<String>, CalDavError> {
    match reader.read_event_into(buf)? {
        Event::Text(text) => Ok(Some(
            quick_xml::escape::unescape(&text.decode().map_err(quick_xml::Error::from)?)
                .map_err(quick_xml::Error::from)?
                .to_string(),
        )),
        Event::CData(cdata) => Ok(Some(
            String::from_utf8_lossy(cdata.into_inner().as_ref()).to_string(),
        )),
        _ => Ok(None),
    }
}

/// Scan a `<resourcetype>` subtree for collection/calendar markers
fn read_resourcetype(
    reader: &mut Reader<&[u8]>,
    buf: &mut Vec<u8>,
) -> Result<(bool, bool), CalDavError> {
    let mut is_collection = false;
    let mut is_calendar = false;
    loop {
        match reader.read_event_into(buf)? {
            Event::End(ref e) if e.name().local_name().into_inner() == b"resourcetype" => break,
            Event::Start(ref e) | Event::Empty(ref e) => {
                match e.name().local_name().into_inner() {
                    b"collection" => is_collection = true,
                    b"calendar" => is_calendar = true,
                    _ => {}
                }
            }
            Event::Eof => {
                return Err(CalDavError::InvalidResponse(
                    "unexpected EOF in resourcetype".to_string(),
                ));
            }
            _ => {}
        }
    }
    Ok((is_collection, is_calendar))
}

/// Read the `<href>` nested inside a wrapper element such as
/// `<current-user-principal>`
fn read_nested_href(
    reader: &mut Reader<&[u8]>,
    buf: &mut Vec<u8>,
    wrapper: &[u8],
) -> Result<Option<String>, CalDavError> {
    let mut href = None;
    loop {
        match reader.read_event_into(buf)? {
            Event::End(ref e) if e.name().local_name().into_inner() == wrapper => break,
            Event::Start(ref e) if e.name().local_name().into_inner() == b"href" => {
                if let Some(text) = read_text(reader, buf)? {
                    href = Some(text);
                }
            }
            Event::Eof => {
                return Err(CalDavError::InvalidResponse(
                    "unexpected EOF in href wrapper".to_string(),
                ));
            }
            _ => {}
        }
    }
    Ok(href)
}
