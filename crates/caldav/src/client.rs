//! CalDAV client operations
//!
//! One client per endpoint. Structural failures surface as typed errors;
//! broken individual objects are collected or skipped so a single bad event
//! never aborts an enumeration.

use reqwest::{Method, StatusCode};
use tracing::{debug, warn};

use crate::error::CalDavError;
use crate::http::{DavTransport, status_error};
use crate::ical::parse_identity;
use crate::response::Multistatus;
use crate::types::{
    CalendarInfo, MalformedCollector, RemoteEvent, SyncChange, SyncCollectionReport,
};
use crate::xml;

/// CalDAV client bound to one endpoint
#[derive(Debug, Clone)]
pub struct CalDavClient {
    http: DavTransport,
}

impl CalDavClient {
    /// Create a client for an endpoint
    ///
    /// Fails with `ConnectionFailed` if the URL is empty or unusable.
    pub fn new(base_url: &str, username: &str, password: &str) -> Result<Self, CalDavError> {
        Ok(Self {
            http: DavTransport::new(base_url, username, password)?,
        })
    }

    /// Path component of the endpoint base URL
    ///
    /// Used as the destination calendar when discovery yields nothing.
    pub fn base_path(&self) -> String {
        self.http.base_path()
    }

    /// Verify the endpoint answers as a DAV server
    pub async fn test_connection(&self) -> Result<(), CalDavError> {
        self.current_user_principal().await.map(|_| ())
    }

    /// Discover the calendar collections of this account
    ///
    /// principal → calendar home set → Depth:1 listing. Discovery failures
    /// are structural and map to `ConnectionFailed` (auth errors keep their
    /// own kind).
    pub async fn find_calendars(&self) -> Result<Vec<CalendarInfo>, CalDavError> {
        let principal = self.current_user_principal().await?;
        let home = self.calendar_home_set(&principal).await?;

        let response = self
            .http
            .send(self.http.propfind(&home, "1", xml::PROPFIND_CALENDAR_LIST)?)
            .await?;
        if response.status() != StatusCode::MULTI_STATUS {
            return Err(status_error(response.status(), "calendar listing"));
        }

        let body = read_body(response).await?;
        let multistatus = Multistatus::from_xml(&body)?;

        let mut calendars = Vec::new();
        for resp in &multistatus.responses {
            let Some(props) = resp.ok_props() else {
                continue;
            };
            if !props.is_calendar {
                continue;
            }
            let path = decode_href(&resp.href);
            let name = props
                .display_name
                .clone()
                .filter(|n| !n.is_empty())
                .unwrap_or_else(|| last_segment(&path));
            calendars.push(CalendarInfo {
                path,
                name,
                description: props.description.clone(),
                color: props.color.clone(),
            });
        }

        debug!("Discovered {} calendars under {}", calendars.len(), home);
        Ok(calendars)
    }

    /// Enumerate the events of a calendar
    ///
    /// Primary strategy is a calendar-query REPORT; any REPORT failure
    /// (including 412 from servers that refuse the filter) falls back to a
    /// PROPFIND listing with per-object fetches. Malformed objects go to the
    /// collector; other per-object failures are logged and skipped.
    pub async fn get_events(
        &self,
        calendar_path: &str,
        mut collector: Option<&mut MalformedCollector>,
    ) -> Result<Vec<RemoteEvent>, CalDavError> {
        match self.query_events(calendar_path, collector.as_deref_mut()).await {
            Ok(events) => Ok(events),
            Err(e) => {
                debug!(
                    "calendar-query on {} failed ({}), falling back to PROPFIND",
                    calendar_path, e
                );
                self.enumerate_via_propfind(calendar_path, collector).await
            }
        }
    }

    /// Fetch a single calendar object
    ///
    /// Parser failures with a malformed signature map to `MalformedContent`;
    /// everything else maps to `NotFound`.
    pub async fn get_event(&self, path: &str) -> Result<RemoteEvent, CalDavError> {
        let response = self
            .http
            .send(self.http.request(Method::GET, path)?)
            .await
            .map_err(|_| CalDavError::NotFound(path.to_string()))?;

        if !response.status().is_success() {
            return Err(CalDavError::NotFound(path.to_string()));
        }

        let etag = header_etag(&response);
        let data = response
            .text()
            .await
            .map_err(|_| CalDavError::NotFound(path.to_string()))?;

        match parse_identity(&data) {
            Ok(identity) => Ok(RemoteEvent {
                path: path.to_string(),
                etag,
                data,
                uid: identity.uid,
                summary: identity.summary,
                dtstart_utc: identity.dtstart_utc,
            }),
            Err(e @ CalDavError::MalformedContent(_)) => Err(e),
            Err(_) => Err(CalDavError::NotFound(path.to_string())),
        }
    }

    /// Write an event into a calendar
    ///
    /// Reuses the event's own path when it already lives under the target
    /// calendar (so the PUT is an update); otherwise derives
    /// `<calendar>/<UID>.ics`. Events without data or a resolvable UID are
    /// skipped with a log line, not failed; `None` signals such a no-op.
    /// On success the server-assigned ETag is returned when the response
    /// carries one.
    pub async fn put_event(
        &self,
        calendar_path: &str,
        event: &RemoteEvent,
    ) -> Result<Option<String>, CalDavError> {
        if event.data.trim().is_empty() {
            warn!("Skipping PUT of event with empty data (uid: {})", event.uid);
            return Ok(None);
        }

        let uid = if event.uid.is_empty() {
            parse_identity(&event.data)
                .map(|identity| identity.uid)
                .unwrap_or_default()
        } else {
            event.uid.clone()
        };

        let path = if !event.path.is_empty() && event.path.starts_with(calendar_path) {
            event.path.clone()
        } else {
            if uid.is_empty() {
                warn!(
                    "Skipping PUT: no UID in event or body (path: {})",
                    event.path
                );
                return Ok(None);
            }
            format!("{}/{}.ics", calendar_path.trim_end_matches('/'), uid)
        };

        let request = self
            .http
            .request(Method::PUT, &path)?
            .header("Content-Type", "text/calendar; charset=utf-8")
            .body(event.data.clone());

        let response = self.http.send(request).await?;
        if !response.status().is_success() {
            return Err(CalDavError::ConnectionFailed(format!(
                "PUT {}: HTTP {}",
                path,
                response.status()
            )));
        }

        Ok(Some(header_etag(&response)))
    }

    /// Delete a calendar object by href
    pub async fn delete_event(&self, path: &str) -> Result<(), CalDavError> {
        let response = self
            .http
            .send(self.http.request(Method::DELETE, path)?)
            .await?;

        if !response.status().is_success() && response.status() != StatusCode::NOT_FOUND {
            return Err(CalDavError::ConnectionFailed(format!(
                "DELETE {}: HTTP {}",
                path,
                response.status()
            )));
        }

        Ok(())
    }

    /// RFC 6578 sync-collection REPORT
    ///
    /// Returns `NotSupported` on 403/501 so callers can fall back to full
    /// reconciliation; any other non-207 status is `InvalidResponse`.
    pub async fn sync_collection(
        &self,
        calendar_path: &str,
        sync_token: Option<&str>,
    ) -> Result<SyncCollectionReport, CalDavError> {
        let body = xml::sync_collection_body(sync_token)?;
        let response = self
            .http
            .send(self.http.report(calendar_path, "1", body)?)
            .await?;

        match response.status() {
            StatusCode::MULTI_STATUS => {}
            StatusCode::FORBIDDEN | StatusCode::NOT_IMPLEMENTED => {
                return Err(CalDavError::NotSupported);
            }
            status => {
                return Err(CalDavError::InvalidResponse(format!(
                    "sync-collection on {}: HTTP {}",
                    calendar_path, status
                )));
            }
        }

        let text = read_body(response).await?;
        let multistatus = Multistatus::from_xml(&text)?;

        let mut report = SyncCollectionReport {
            sync_token: multistatus.sync_token.clone().unwrap_or_default(),
            ..Default::default()
        };

        for resp in &multistatus.responses {
            let path = decode_href(&resp.href);
            if resp.status.as_deref().is_some_and(|s| s.contains("404")) {
                report.deleted.push(path);
                continue;
            }
            if let Some(props) = resp.ok_props() {
                report.changed.push(SyncChange {
                    path,
                    etag: props.etag.clone().unwrap_or_default(),
                    data: props.calendar_data.clone().unwrap_or_default(),
                });
            }
        }

        Ok(report)
    }

    /// Probe for RFC 6578 support via OPTIONS
    pub async fn supports_webdav_sync(&self, calendar_path: &str) -> bool {
        let Ok(request) = self.http.dav_request("OPTIONS", calendar_path) else {
            return false;
        };
        match self.http.send(request).await {
            Ok(response) => response
                .headers()
                .get("DAV")
                .and_then(|v| v.to_str().ok())
                .is_some_and(|dav| dav.contains("sync-collection")),
            Err(_) => false,
        }
    }

    async fn current_user_principal(&self) -> Result<String, CalDavError> {
        let response = self
            .http
            .send(
                self.http
                    .propfind("", "0", xml::PROPFIND_CURRENT_USER_PRINCIPAL)?,
            )
            .await?;
        if response.status() != StatusCode::MULTI_STATUS {
            return Err(status_error(response.status(), "principal discovery"));
        }

        let body = read_body(response).await?;
        let multistatus = Multistatus::from_xml(&body)?;

        let principal = multistatus
            .responses
            .iter()
            .find_map(|r| r.ok_props().and_then(|p| p.principal_href.clone()))
            .unwrap_or_else(|| self.base_path());

        Ok(decode_href(&principal))
    }

    async fn calendar_home_set(&self, principal: &str) -> Result<String, CalDavError> {
        let response = self
            .http
            .send(
                self.http
                    .propfind(principal, "0", xml::PROPFIND_CALENDAR_HOME_SET)?,
            )
            .await?;
        if response.status() != StatusCode::MULTI_STATUS {
            return Err(status_error(response.status(), "home-set discovery"));
        }

        let body = read_body(response).await?;
        let multistatus = Multistatus::from_xml(&body)?;

        let home = multistatus
            .responses
            .iter()
            .find_map(|r| r.ok_props().and_then(|p| p.home_set_href.clone()))
            .unwrap_or_else(|| principal.to_string());

        Ok(decode_href(&home))
    }

    /// Primary enumeration: calendar-query REPORT
    async fn query_events(
        &self,
        calendar_path: &str,
        mut collector: Option<&mut MalformedCollector>,
    ) -> Result<Vec<RemoteEvent>, CalDavError> {
        let response = self
            .http
            .send(self.http.report(
                calendar_path,
                "1",
                xml::REPORT_CALENDAR_QUERY.to_string(),
            )?)
            .await?;
        if response.status() != StatusCode::MULTI_STATUS {
            return Err(status_error(response.status(), "calendar-query"));
        }

        let body = read_body(response).await?;
        let multistatus = Multistatus::from_xml(&body)?;

        let mut events = Vec::new();
        for resp in &multistatus.responses {
            let path = decode_href(&resp.href);
            if is_collection_self(&path, calendar_path) {
                continue;
            }
            let Some(props) = resp.ok_props() else {
                continue;
            };
            let etag = props.etag.clone().unwrap_or_default();
            let data = props.calendar_data.clone().unwrap_or_default();

            match parse_identity(&data) {
                Ok(identity) => events.push(RemoteEvent {
                    path,
                    etag,
                    data,
                    uid: identity.uid,
                    summary: identity.summary,
                    dtstart_utc: identity.dtstart_utc,
                }),
                Err(CalDavError::MalformedContent(message)) => {
                    if let Some(c) = collector.as_deref_mut() {
                        c.record(&path, &message);
                    }
                    debug!("Malformed event at {}: {}", path, message);
                }
                Err(e) => {
                    warn!("Skipping event at {}: {}", path, e);
                }
            }
        }

        Ok(events)
    }

    /// Fallback enumeration: PROPFIND listing + per-object GET
    async fn enumerate_via_propfind(
        &self,
        calendar_path: &str,
        mut collector: Option<&mut MalformedCollector>,
    ) -> Result<Vec<RemoteEvent>, CalDavError> {
        let response = self
            .http
            .send(
                self.http
                    .propfind(calendar_path, "1", xml::PROPFIND_COLLECTION_MEMBERS)?,
            )
            .await?;
        if response.status() != StatusCode::MULTI_STATUS {
            return Err(status_error(response.status(), "collection listing"));
        }

        let body = read_body(response).await?;
        let multistatus = Multistatus::from_xml(&body)?;

        let mut candidates = Vec::new();
        for resp in &multistatus.responses {
            let path = decode_href(&resp.href);
            if is_collection_self(&path, calendar_path) {
                continue;
            }
            let content_type = resp
                .ok_props()
                .and_then(|p| p.content_type.clone())
                .unwrap_or_default();
            if path.ends_with(".ics") || content_type.contains("calendar") {
                candidates.push(path);
            }
        }

        let mut events = Vec::new();
        for path in candidates {
            match self.get_event(&path).await {
                Ok(event) => events.push(event),
                Err(CalDavError::MalformedContent(message)) => {
                    if let Some(c) = collector.as_deref_mut() {
                        c.record(&path, &message);
                    }
                    debug!("Malformed event at {}: {}", path, message);
                }
                Err(e) => {
                    warn!("Failed to fetch event at {}: {}", path, e);
                }
            }
        }

        Ok(events)
    }
}

/// URL-decode an href, keeping the raw form when decoding fails
fn decode_href(href: &str) -> String {
    urlencoding::decode(href)
        .map(|s| s.into_owned())
        .unwrap_or_else(|_| href.to_string())
}

/// The collection appears in its own Depth:1 listing, slash or no slash
fn is_collection_self(href: &str, calendar_path: &str) -> bool {
    href.trim_end_matches('/') == calendar_path.trim_end_matches('/')
}

fn last_segment(path: &str) -> String {
    path.trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or(path)
        .to_string()
}

fn header_etag(response: &reqwest::Response) -> String {
    response
        .headers()
        .get("ETag")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string()
}

async fn read_body(response: reqwest::Response) -> Result<String, CalDavError> {
    response
        .text()
        .await
        .map_err(|e| CalDavError::InvalidResponse(format!("reading response body: {e}")))
}
