//! HTTP transport for CalDAV requests
//!
//! One transport per endpoint, bound to base URL and Basic credentials.

use std::time::Duration;

use reqwest::{Method, RequestBuilder, Response};
use url::Url;

use crate::error::CalDavError;

/// Per-request timeout; the pass-level deadline is enforced by the caller
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const POOL_MAX_IDLE: usize = 10;
const POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Clone)]
pub(crate) struct DavTransport {
    client: reqwest::Client,
    base: Url,
    username: String,
    password: String,
}

impl std::fmt::Debug for DavTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DavTransport")
            .field("base", &self.base.as_str())
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

impl DavTransport {
    pub fn new(base_url: &str, username: &str, password: &str) -> Result<Self, CalDavError> {
        if base_url.trim().is_empty() {
            return Err(CalDavError::ConnectionFailed(
                "endpoint URL is empty".to_string(),
            ));
        }

        let base = Url::parse(base_url)
            .map_err(|e| CalDavError::ConnectionFailed(format!("invalid endpoint URL: {e}")))?;

        let client = reqwest::Client::builder()
            .use_rustls_tls()
            .min_tls_version(reqwest::tls::Version::TLS_1_2)
            .timeout(REQUEST_TIMEOUT)
            .connect_timeout(CONNECT_TIMEOUT)
            .pool_max_idle_per_host(POOL_MAX_IDLE)
            .pool_idle_timeout(POOL_IDLE_TIMEOUT)
            .build()
            .map_err(|e| CalDavError::ConnectionFailed(format!("client init: {e}")))?;

        Ok(Self {
            client,
            base,
            username: username.to_string(),
            password: password.to_string(),
        })
    }

    /// Path component of the endpoint base URL
    pub fn base_path(&self) -> String {
        self.base.path().to_string()
    }

    /// Build a request for an href on this endpoint
    ///
    /// Absolute hrefs (`/calendars/user/work/`) resolve against the host;
    /// an empty path targets the base URL itself.
    pub fn request(&self, method: Method, path: &str) -> Result<RequestBuilder, CalDavError> {
        let url = if path.is_empty() {
            self.base.clone()
        } else {
            self.base
                .join(path)
                .map_err(|e| CalDavError::ConnectionFailed(format!("invalid href {path}: {e}")))?
        };

        Ok(self
            .client
            .request(method, url)
            .basic_auth(&self.username, Some(&self.password)))
    }

    /// Build a request with a WebDAV verb that reqwest has no constant for
    pub fn dav_request(&self, verb: &str, path: &str) -> Result<RequestBuilder, CalDavError> {
        let method = Method::from_bytes(verb.as_bytes())
            .map_err(|e| CalDavError::ConnectionFailed(format!("invalid method {verb}: {e}")))?;
        self.request(method, path)
    }

    /// Build a PROPFIND with the usual XML headers
    pub fn propfind(
        &self,
        path: &str,
        depth: &str,
        body: &str,
    ) -> Result<RequestBuilder, CalDavError> {
        Ok(self
            .dav_request("PROPFIND", path)?
            .header("Content-Type", "application/xml; charset=utf-8")
            .header("Depth", depth)
            .body(body.to_string()))
    }

    /// Build a REPORT with the usual XML headers
    pub fn report(
        &self,
        path: &str,
        depth: &str,
        body: String,
    ) -> Result<RequestBuilder, CalDavError> {
        Ok(self
            .dav_request("REPORT", path)?
            .header("Content-Type", "application/xml; charset=utf-8")
            .header("Depth", depth)
            .body(body))
    }

    /// Send a request, mapping transport failures to `ConnectionFailed`
    pub async fn send(&self, request: RequestBuilder) -> Result<Response, CalDavError> {
        request
            .send()
            .await
            .map_err(|e| CalDavError::ConnectionFailed(e.to_string()))
    }
}

/// Map an unexpected HTTP status to the client error taxonomy
pub(crate) fn status_error(status: reqwest::StatusCode, context: &str) -> CalDavError {
    match status.as_u16() {
        401 | 403 => CalDavError::AuthFailed(format!("{context}: HTTP {status}")),
        404 => CalDavError::NotFound(context.to_string()),
        _ => CalDavError::ConnectionFailed(format!("{context}: HTTP {status}")),
    }
}
