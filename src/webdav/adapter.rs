//! Stateless WebDAV request assembly and response triage.
//!
//! Every method converts its outcome into a [`DavResult`]: transport faults
//! become [`DavError::Network`], non-success statuses become
//! [`DavError::Http`], malformed bodies become [`DavError::Parse`]. Nothing
//! panics or throws past this boundary.

use bytes::Bytes;
use hyper::Method;
use std::sync::Arc;

use crate::common::error::{DavError, DavResult};
use crate::common::quirks::QuirkProfile;
use crate::common::transport::{HttpRequest, HttpResponse, HttpTransport, MAX_RESPONSE_BYTES};
use crate::webdav::parser::parse_multistatus;
use crate::webdav::types::{Depth, Multistatus};

const XML_CONTENT_TYPE: &str = "application/xml; charset=utf-8";

/// How much of an error body to keep for diagnostics.
const ERROR_BODY_SNIPPET: usize = 2048;

/// Write precondition for `PUT`/`DELETE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Precondition<'a> {
    None,
    /// `If-Match: <etag>` — only touch the expected version.
    IfMatch(&'a str),
    /// `If-None-Match: *` — create only, never overwrite.
    IfNoneMatchAny,
}

/// Outcome of a successful `PUT`.
#[derive(Debug, Clone)]
pub struct PutOutcome {
    pub url: String,
    /// Raw `ETag` response header, if the server returned one. Quirk-level
    /// normalization is the caller's business.
    pub etag: Option<String>,
}

/// Thin, stateless protocol adapter over an [`HttpTransport`].
#[derive(Clone)]
pub struct DavAdapter {
    transport: Arc<dyn HttpTransport>,
}

impl DavAdapter {
    pub fn new(transport: Arc<dyn HttpTransport>) -> Self {
        Self { transport }
    }

    async fn execute(&self, request: HttpRequest) -> DavResult<HttpResponse> {
        let resp = self
            .transport
            .execute(request)
            .await
            .map_err(DavError::from)?;
        // Enforced here as well as in the transport, so alternative
        // transports cannot feed unbounded bodies into the parser.
        if resp.body.len() > MAX_RESPONSE_BYTES {
            return Err(DavError::http(0, "response too large"));
        }
        Ok(resp)
    }

    async fn request_multistatus(
        &self,
        method: &'static str,
        url: &str,
        depth: Depth,
        body: String,
        quirks: &QuirkProfile,
    ) -> DavResult<Multistatus> {
        let method = Method::from_bytes(method.as_bytes())
            .map_err(|e| DavError::Argument(format!("invalid method: {e}")))?;
        let request = HttpRequest::new(method, url)
            .with_header("depth", depth.as_str())
            .with_header("content-type", XML_CONTENT_TYPE)
            .with_body(Bytes::from(body));

        let resp = self.execute(request).await?;
        if !resp.is_success() {
            return Err(http_failure(&resp));
        }
        parse_multistatus(&resp.body, quirks)
    }

    /// WebDAV `PROPFIND`.
    pub async fn propfind(
        &self,
        url: &str,
        depth: Depth,
        body: String,
        quirks: &QuirkProfile,
    ) -> DavResult<Multistatus> {
        self.request_multistatus("PROPFIND", url, depth, body, quirks)
            .await
    }

    /// WebDAV/CalDAV `REPORT` (calendar-query, calendar-multiget,
    /// sync-collection).
    pub async fn report(
        &self,
        url: &str,
        depth: Depth,
        body: String,
        quirks: &QuirkProfile,
    ) -> DavResult<Multistatus> {
        self.request_multistatus("REPORT", url, depth, body, quirks)
            .await
    }

    /// `PUT` a resource body with an optional precondition.
    pub async fn put(
        &self,
        url: &str,
        body: Bytes,
        content_type: &str,
        precondition: Precondition<'_>,
    ) -> DavResult<PutOutcome> {
        let mut request =
            HttpRequest::new(Method::PUT, url).with_header("content-type", content_type);
        match precondition {
            Precondition::None => {}
            Precondition::IfMatch(etag) => {
                request = request.with_header("if-match", &quote_etag(etag));
            }
            Precondition::IfNoneMatchAny => {
                request = request.with_header("if-none-match", "*");
            }
        }
        let resp = self.execute(request.with_body(body)).await?;
        if !resp.is_success() {
            return Err(http_failure(&resp));
        }
        Ok(PutOutcome {
            url: url.to_string(),
            etag: resp.etag(),
        })
    }

    /// `DELETE` a resource, optionally guarded by `If-Match`.
    pub async fn delete(&self, url: &str, if_match: Option<&str>) -> DavResult<()> {
        let mut request = HttpRequest::new(Method::DELETE, url);
        if let Some(etag) = if_match {
            request = request.with_header("if-match", &quote_etag(etag));
        }
        let resp = self.execute(request).await?;
        if !resp.is_success() {
            return Err(http_failure(&resp));
        }
        Ok(())
    }

    /// `GET` a single resource. `Ok(None)` on 404.
    pub async fn get(&self, url: &str) -> DavResult<Option<HttpResponse>> {
        let resp = self.execute(HttpRequest::new(Method::GET, url)).await?;
        if resp.status == 404 {
            return Ok(None);
        }
        if !resp.is_success() {
            return Err(http_failure(&resp));
        }
        Ok(Some(resp))
    }

    /// CalDAV `MKCALENDAR`.
    pub async fn mkcalendar(&self, url: &str, body: String) -> DavResult<()> {
        let method = Method::from_bytes(b"MKCALENDAR")
            .map_err(|e| DavError::Argument(format!("invalid method: {e}")))?;
        let request = HttpRequest::new(method, url)
            .with_header("content-type", XML_CONTENT_TYPE)
            .with_body(Bytes::from(body));
        let resp = self.execute(request).await?;
        if !resp.is_success() {
            return Err(http_failure(&resp));
        }
        Ok(())
    }
}

/// Re-quote a bare ETag for use in a conditional header. Already-quoted and
/// weak (`W/"..."`) tags pass through unchanged.
pub fn quote_etag(etag: &str) -> String {
    let trimmed = etag.trim();
    if trimmed.starts_with('"') || trimmed.starts_with("W/") || trimmed == "*" {
        trimmed.to_string()
    } else {
        format!("\"{trimmed}\"")
    }
}

fn http_failure(resp: &HttpResponse) -> DavError {
    let message = match resp.status {
        401 => "unauthenticated",
        403 => "forbidden (possibly expired sync token)",
        404 => "resource not found",
        410 => "gone (possibly expired sync token)",
        412 => "precondition failed",
        413 => "request entity too large",
        429 => "rate limited",
        500..=599 => "server error",
        _ => "request failed",
    };
    let body = resp.body_text();
    let snippet = if body.trim().is_empty() {
        None
    } else {
        let mut s = body;
        if s.len() > ERROR_BODY_SNIPPET {
            let mut cut = ERROR_BODY_SNIPPET;
            while !s.is_char_boundary(cut) {
                cut -= 1;
            }
            s.truncate(cut);
        }
        Some(s)
    };
    DavError::Http {
        code: resp.status,
        message: message.to_string(),
        body: snippet,
    }
}
