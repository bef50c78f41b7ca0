//! Stateful mock CalDAV server shared by the sync integration tests

// Each test binary uses its own subset of these helpers
#![allow(dead_code)]

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::{
    Router,
    body::Body,
    extract::{Request, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::any,
};
use tokio::net::TcpListener;

/// One endpoint with a single calendar collection and a mutable object set
pub struct MockDav {
    pub calendar_path: String,
    home_path: String,
    objects: Mutex<BTreeMap<String, (String, String)>>,
    etag_counter: AtomicUsize,
    /// When set, calendar listings (REPORT and Depth:1 PROPFIND) fail
    pub fail_listing: AtomicBool,
    /// Artificial latency on REPORT, for gating tests
    pub report_delay: Mutex<Duration>,
    /// Canned sync-collection multistatus; None means RFC 6578 unsupported
    pub sync_report: Mutex<Option<String>>,
}

impl MockDav {
    pub fn new(calendar_path: &str) -> Arc<Self> {
        let trimmed = calendar_path.trim_end_matches('/');
        let home_path = match trimmed.rfind('/') {
            Some(idx) => format!("{}/", &trimmed[..idx + 1].trim_end_matches('/')),
            None => "/".to_string(),
        };
        Arc::new(Self {
            calendar_path: calendar_path.to_string(),
            home_path,
            objects: Mutex::new(BTreeMap::new()),
            etag_counter: AtomicUsize::new(0),
            fail_listing: AtomicBool::new(false),
            report_delay: Mutex::new(Duration::ZERO),
            sync_report: Mutex::new(None),
        })
    }

    fn next_etag(&self) -> String {
        format!(
            "\"etag-{}\"",
            self.etag_counter.fetch_add(1, Ordering::SeqCst)
        )
    }

    /// Add a well-formed VEVENT object; returns its assigned etag
    pub fn add_event(&self, uid: &str, summary: &str, dtstart: &str) -> String {
        let path = format!("{}{}.ics", self.calendar_path, uid);
        let etag = self.next_etag();
        self.objects
            .lock()
            .unwrap()
            .insert(path, (etag.clone(), ics(uid, summary, dtstart)));
        etag
    }

    /// Add an arbitrary body under the calendar (for malformed objects)
    pub fn add_raw(&self, filename: &str, data: &str) {
        let path = format!("{}{}", self.calendar_path, filename);
        let etag = self.next_etag();
        self.objects
            .lock()
            .unwrap()
            .insert(path, (etag, data.to_string()));
    }

    pub fn has_uid(&self, uid: &str) -> bool {
        let path = format!("{}{}.ics", self.calendar_path, uid);
        self.objects.lock().unwrap().contains_key(&path)
    }

    pub fn etag_of(&self, uid: &str) -> Option<String> {
        let path = format!("{}{}.ics", self.calendar_path, uid);
        self.objects
            .lock()
            .unwrap()
            .get(&path)
            .map(|(etag, _)| etag.clone())
    }

    pub fn data_of(&self, uid: &str) -> Option<String> {
        let path = format!("{}{}.ics", self.calendar_path, uid);
        self.objects
            .lock()
            .unwrap()
            .get(&path)
            .map(|(_, data)| data.clone())
    }

    pub fn object_count(&self) -> usize {
        self.objects.lock().unwrap().len()
    }

    pub fn set_report_delay(&self, delay: Duration) {
        *self.report_delay.lock().unwrap() = delay;
    }

    /// Advertise RFC 6578 support and serve this body for sync REPORTs
    pub fn set_sync_report(&self, body: String) {
        *self.sync_report.lock().unwrap() = Some(body);
    }
}

/// Minimal VCALENDAR body for one event
pub fn ics(uid: &str, summary: &str, dtstart: &str) -> String {
    format!(
        "BEGIN:VCALENDAR\r\nVERSION:2.0\r\nPRODID:-//mock//EN\r\nBEGIN:VEVENT\r\nUID:{uid}\r\nDTSTAMP:20240101T000000Z\r\nSUMMARY:{summary}\r\nDTSTART:{dtstart}\r\nEND:VEVENT\r\nEND:VCALENDAR\r\n"
    )
}

pub async fn serve(dav: Arc<MockDav>) -> SocketAddr {
    let app = Router::new().fallback(any(handler)).with_state(dav);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

async fn handler(State(dav): State<Arc<MockDav>>, req: Request<Body>) -> Response {
    let path = req.uri().path().to_string();
    let method = req.method().as_str().to_string();

    match method.as_str() {
        "PROPFIND" => propfind(&dav, &path),
        "REPORT" => {
            let body = axum::body::to_bytes(req.into_body(), usize::MAX)
                .await
                .unwrap_or_default();
            let body = String::from_utf8_lossy(&body).to_string();
            report(&dav, &path, &body).await
        }
        "GET" => {
            let objects = dav.objects.lock().unwrap();
            match objects.get(&path) {
                Some((etag, data)) => {
                    (StatusCode::OK, [("ETag", etag.as_str())], data.clone()).into_response()
                }
                None => (StatusCode::NOT_FOUND, String::new()).into_response(),
            }
        }
        "PUT" => {
            let body = axum::body::to_bytes(req.into_body(), usize::MAX)
                .await
                .unwrap_or_default();
            let data = String::from_utf8_lossy(&body).to_string();
            let etag = dav.next_etag();
            dav.objects
                .lock()
                .unwrap()
                .insert(path, (etag.clone(), data));
            (StatusCode::CREATED, [("ETag", etag.as_str())], String::new()).into_response()
        }
        "DELETE" => {
            if dav.objects.lock().unwrap().remove(&path).is_some() {
                (StatusCode::NO_CONTENT, String::new()).into_response()
            } else {
                (StatusCode::NOT_FOUND, String::new()).into_response()
            }
        }
        "OPTIONS" => {
            let dav = if dav.sync_report.lock().unwrap().is_some() {
                "1, 2, calendar-access, sync-collection"
            } else {
                "1, 2, calendar-access"
            };
            (StatusCode::OK, [("DAV", dav)], String::new()).into_response()
        }
        _ => (StatusCode::METHOD_NOT_ALLOWED, String::new()).into_response(),
    }
}

fn propfind(dav: &MockDav, path: &str) -> Response {
    if path == "/" {
        return multistatus(
            r#"<d:response>
  <d:href>/</d:href>
  <d:propstat>
    <d:prop><d:current-user-principal><d:href>/principals/me/</d:href></d:current-user-principal></d:prop>
    <d:status>HTTP/1.1 200 OK</d:status>
  </d:propstat>
</d:response>"#,
        );
    }
    if path == "/principals/me/" {
        return multistatus(&format!(
            r#"<d:response>
  <d:href>/principals/me/</d:href>
  <d:propstat>
    <d:prop><c:calendar-home-set><d:href>{}</d:href></c:calendar-home-set></d:prop>
    <d:status>HTTP/1.1 200 OK</d:status>
  </d:propstat>
</d:response>"#,
            dav.home_path
        ));
    }
    if path == dav.home_path {
        return multistatus(&format!(
            r#"<d:response>
  <d:href>{home}</d:href>
  <d:propstat>
    <d:prop><d:resourcetype><d:collection/></d:resourcetype></d:prop>
    <d:status>HTTP/1.1 200 OK</d:status>
  </d:propstat>
</d:response>
<d:response>
  <d:href>{cal}</d:href>
  <d:propstat>
    <d:prop>
      <d:resourcetype><d:collection/><c:calendar/></d:resourcetype>
      <d:displayname>Mock calendar</d:displayname>
    </d:prop>
    <d:status>HTTP/1.1 200 OK</d:status>
  </d:propstat>
</d:response>"#,
            home = dav.home_path,
            cal = dav.calendar_path
        ));
    }
    if path == dav.calendar_path {
        if dav.fail_listing.load(Ordering::SeqCst) {
            return (StatusCode::INTERNAL_SERVER_ERROR, String::new()).into_response();
        }
        let objects = dav.objects.lock().unwrap();
        let mut responses = format!(
            r#"<d:response>
  <d:href>{}</d:href>
  <d:propstat>
    <d:prop><d:resourcetype><d:collection/></d:resourcetype></d:prop>
    <d:status>HTTP/1.1 200 OK</d:status>
  </d:propstat>
</d:response>"#,
            dav.calendar_path
        );
        for (href, (etag, _)) in objects.iter() {
            responses.push_str(&format!(
                r#"<d:response>
  <d:href>{href}</d:href>
  <d:propstat>
    <d:prop><d:getetag>{etag}</d:getetag><d:getcontenttype>text/calendar</d:getcontenttype></d:prop>
    <d:status>HTTP/1.1 200 OK</d:status>
  </d:propstat>
</d:response>"#
            ));
        }
        return multistatus(&responses);
    }
    (StatusCode::NOT_FOUND, String::new()).into_response()
}

async fn report(dav: &MockDav, path: &str, body: &str) -> Response {
    if body.contains("sync-collection") {
        return match dav.sync_report.lock().unwrap().clone() {
            Some(canned) => (StatusCode::MULTI_STATUS, canned).into_response(),
            None => (StatusCode::NOT_IMPLEMENTED, String::new()).into_response(),
        };
    }
    if path != dav.calendar_path {
        return (StatusCode::NOT_FOUND, String::new()).into_response();
    }
    if dav.fail_listing.load(Ordering::SeqCst) {
        return (StatusCode::INTERNAL_SERVER_ERROR, String::new()).into_response();
    }

    let delay = *dav.report_delay.lock().unwrap();
    if delay > Duration::ZERO {
        tokio::time::sleep(delay).await;
    }

    let objects = dav.objects.lock().unwrap();
    let mut responses = String::new();
    for (href, (etag, data)) in objects.iter() {
        responses.push_str(&format!(
            r#"<d:response>
  <d:href>{href}</d:href>
  <d:propstat>
    <d:prop><d:getetag>{etag}</d:getetag><c:calendar-data>{data}</c:calendar-data></d:prop>
    <d:status>HTTP/1.1 200 OK</d:status>
  </d:propstat>
</d:response>"#
        ));
    }
    multistatus(&responses)
}

fn multistatus(responses: &str) -> Response {
    let body = format!(
        r#"<?xml version="1.0" encoding="utf-8"?>
<d:multistatus xmlns:d="DAV:" xmlns:c="urn:ietf:params:xml:ns:caldav">{responses}</d:multistatus>"#
    );
    (StatusCode::MULTI_STATUS, body).into_response()
}
