//! The HTTP transport seam.
//!
//! The protocol layers above never talk to a socket directly: they hand an
//! [`HttpRequest`] to an [`HttpTransport`] and get back a fully aggregated,
//! already decompressed [`HttpResponse`] (or a [`TransportError`]). The
//! production implementation is [`crate::common::hyper::HyperTransport`];
//! tests substitute a scripted transport.

use async_trait::async_trait;
use bytes::Bytes;
use hyper::{HeaderMap, Method};
use std::time::Duration;
use thiserror::Error;

use crate::common::error::DavError;

/// Hard ceiling on aggregated (decompressed) response bodies. Responses
/// beyond this are refused to prevent memory exhaustion.
pub const MAX_RESPONSE_BYTES: usize = 10 * 1024 * 1024;

/// Transport tuning knobs. The defaults match the documented contract:
/// connect 30 s, read 300 s, write 60 s, two bounded retries with
/// 500–2000 ms backoff for transient faults.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
    pub write_timeout: Duration,
    pub max_retries: u32,
    pub retry_backoff_min: Duration,
    pub retry_backoff_max: Duration,
    pub max_response_bytes: usize,
    pub max_redirects: u32,
    pub user_agent: String,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(30),
            read_timeout: Duration::from_secs(300),
            write_timeout: Duration::from_secs(60),
            max_retries: 2,
            retry_backoff_min: Duration::from_millis(500),
            retry_backoff_max: Duration::from_millis(2000),
            max_response_bytes: MAX_RESPONSE_BYTES,
            max_redirects: 5,
            user_agent: concat!("caldav-sync-rs/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

/// Credentials handed to the transport. The scheme is chosen by the active
/// [`crate::common::quirks::QuirkProfile`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Credentials {
    None,
    Basic { username: String, password: String },
    Bearer { token: String },
}

/// One outbound request: method, absolute URL, headers, optional body.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
}

impl HttpRequest {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: HeaderMap::new(),
            body: None,
        }
    }

    pub fn with_header(mut self, name: &'static str, value: &str) -> Self {
        if let Ok(v) = hyper::header::HeaderValue::from_str(value) {
            self.headers
                .insert(hyper::header::HeaderName::from_static(name), v);
        }
        self
    }

    pub fn with_body(mut self, body: Bytes) -> Self {
        self.body = Some(body);
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

/// One inbound response, body aggregated and decompressed.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl HttpResponse {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: Bytes::new(),
        }
    }

    pub fn with_header(mut self, name: &'static str, value: &str) -> Self {
        if let Ok(v) = hyper::header::HeaderValue::from_str(value) {
            self.headers
                .insert(hyper::header::HeaderName::from_static(name), v);
        }
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Raw `ETag` header value, if present. Quirk-level normalization is the
    /// caller's business.
    pub fn etag(&self) -> Option<String> {
        self.header("etag").map(str::to_string)
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Faults below the HTTP layer. Anything that did produce a status code is
/// not a transport error; it comes back as a regular [`HttpResponse`].
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    #[error("network error: {0}")]
    Network(String),
    #[error("request timed out")]
    Timeout,
    #[error("response exceeds {limit} bytes")]
    TooLarge { limit: usize },
}

impl From<TransportError> for DavError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Network(msg) => DavError::Network(msg),
            TransportError::Timeout => DavError::Network("request timed out".to_string()),
            TransportError::TooLarge { .. } => DavError::http(0, "response too large"),
        }
    }
}

/// The transport contract. Implementations own connection pooling, TLS,
/// redirects (preserving `Authorization`), transient retries, `Retry-After`,
/// and response decompression; callers see only the terminal outcome.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, TransportError>;
}
