//! Production [`HttpTransport`] built on **hyper 1.x** + **rustls**.
//!
//! Owns everything the protocol layers are promised not to care about:
//! connection pooling, TLS roots, redirects (with `Authorization`
//! preserved), bounded transient retries with `Retry-After` support, and
//! automatic response decompression. Cloning is cheap and reuses the pool.

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as B64;
use bytes::Bytes;
use http_body_util::Full;
use hyper::{Method, Request, Uri, header};
use hyper_rustls::HttpsConnectorBuilder;
use hyper_util::client::legacy::{Client, connect::HttpConnector};
use hyper_util::rt::TokioExecutor;
use std::time::Duration;
use tokio::time::timeout;

use crate::common::compression::{add_accept_encoding, detect_encoding, read_body_decompressed};
use crate::common::transport::{
    Credentials, HttpRequest, HttpResponse, HttpTransport, TransportConfig, TransportError,
};

/// Type alias for the pooled hyper client.
pub type HyperClient = Client<hyper_rustls::HttpsConnector<HttpConnector>, Full<Bytes>>;

/// Build a hyper client with HTTP/2, connection pooling, and a TLS connector
/// that prefers native roots but falls back to the bundled WebPKI store.
pub fn build_hyper_client(config: &TransportConfig) -> HyperClient {
    let https_builder = HttpsConnectorBuilder::new()
        .with_native_roots()
        .unwrap_or_else(|err| {
            tracing::debug!(error = %err, "native TLS roots unavailable, using webpki roots");
            HttpsConnectorBuilder::new().with_webpki_roots()
        });

    let mut http = HttpConnector::new();
    http.enforce_http(false);
    http.set_connect_timeout(Some(config.connect_timeout));

    let https = https_builder
        .https_or_http()
        .enable_http1()
        .enable_http2()
        .wrap_connector(http);

    Client::builder(TokioExecutor::new())
        .http2_adaptive_window(true)
        .pool_max_idle_per_host(16)
        .build::<_, Full<Bytes>>(https)
}

/// Shared-pool transport. One instance can serve many calendars.
#[derive(Clone)]
pub struct HyperTransport {
    client: HyperClient,
    auth_header: Option<header::HeaderValue>,
    config: TransportConfig,
}

impl HyperTransport {
    pub fn new(credentials: Credentials, config: TransportConfig) -> Result<Self, TransportError> {
        let auth_header = match credentials {
            Credentials::None => None,
            Credentials::Basic { username, password } => {
                let token = format!("{username}:{password}");
                let val = format!("Basic {}", B64.encode(token));
                Some(
                    header::HeaderValue::from_str(&val)
                        .map_err(|e| TransportError::Network(format!("invalid credentials: {e}")))?,
                )
            }
            Credentials::Bearer { token } => Some(
                header::HeaderValue::from_str(&format!("Bearer {token}"))
                    .map_err(|e| TransportError::Network(format!("invalid token: {e}")))?,
            ),
        };

        let client = build_hyper_client(&config);
        Ok(Self {
            client,
            auth_header,
            config,
        })
    }

    fn backoff(&self, attempt: u32) -> Duration {
        let base = self.config.retry_backoff_min;
        let scaled = base.saturating_mul(1 << attempt.min(8));
        scaled.min(self.config.retry_backoff_max)
    }

    async fn send_once(
        &self,
        method: &Method,
        url: &str,
        request: &HttpRequest,
    ) -> Result<HttpResponse, TransportError> {
        let uri: Uri = url
            .parse()
            .map_err(|e| TransportError::Network(format!("invalid url {url:?}: {e}")))?;

        let mut builder = Request::builder().method(method.clone()).uri(uri);
        if let Some(auth) = &self.auth_header {
            builder = builder.header(header::AUTHORIZATION, auth);
        }
        builder = builder.header(header::USER_AGENT, self.config.user_agent.as_str());

        let mut headers = request.headers.clone();
        add_accept_encoding(&mut headers);
        for (k, v) in headers.iter() {
            builder = builder.header(k, v);
        }

        let body = request.body.clone().unwrap_or_default();
        let req = builder
            .body(Full::new(body))
            .map_err(|e| TransportError::Network(format!("request build failed: {e}")))?;

        let limit = self.config.max_response_bytes;
        let fut = async {
            let resp = self
                .client
                .request(req)
                .await
                .map_err(|e| TransportError::Network(e.to_string()))?;

            let status = resp.status().as_u16();
            let headers = resp.headers().clone();
            let encoding = detect_encoding(&headers);
            let body = read_body_decompressed(resp.into_body(), encoding, limit).await?;

            Ok(HttpResponse {
                status,
                headers,
                body,
            })
        };

        match timeout(self.config.read_timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::Timeout),
        }
    }

    /// Follow redirects, replaying method and body. `Authorization` is kept
    /// even across hosts; regional CalDAV farms (e.g. iCloud `p01` → `p42`)
    /// depend on it.
    async fn send_following_redirects(
        &self,
        request: &HttpRequest,
    ) -> Result<HttpResponse, TransportError> {
        let mut url = request.url.clone();
        for _ in 0..=self.config.max_redirects {
            let resp = self.send_once(&request.method, &url, request).await?;
            if matches!(resp.status, 301 | 302 | 307 | 308) {
                if let Some(location) = resp.header("location") {
                    let next = resolve_location(&url, location);
                    tracing::debug!(from = %url, to = %next, "following redirect");
                    url = next;
                    continue;
                }
            }
            return Ok(resp);
        }
        Err(TransportError::Network("too many redirects".to_string()))
    }

    fn retry_after(resp: &HttpResponse) -> Option<Duration> {
        resp.header("retry-after")
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map(|secs| Duration::from_secs(secs.min(30)))
    }
}

#[async_trait]
impl HttpTransport for HyperTransport {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        let mut attempt = 0u32;
        loop {
            match self.send_following_redirects(&request).await {
                Ok(resp) if resp.status == 429 || (500..600).contains(&resp.status) => {
                    if attempt >= self.config.max_retries {
                        return Ok(resp);
                    }
                    let delay = Self::retry_after(&resp).unwrap_or_else(|| self.backoff(attempt));
                    tracing::debug!(
                        status = resp.status,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "retrying transient HTTP failure"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Ok(resp) => return Ok(resp),
                Err(err @ (TransportError::Network(_) | TransportError::Timeout))
                    if attempt < self.config.max_retries =>
                {
                    let delay = self.backoff(attempt);
                    tracing::debug!(error = %err, attempt, "retrying transient network failure");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

/// Resolve a `Location` header against the URL that produced it.
fn resolve_location(current: &str, location: &str) -> String {
    if location.starts_with("http://") || location.starts_with("https://") {
        return location.to_string();
    }
    if let Some(rest) = current.strip_prefix("https://").or_else(|| current.strip_prefix("http://")) {
        let scheme_len = current.len() - rest.len();
        let origin_end = rest.find('/').map(|i| scheme_len + i).unwrap_or(current.len());
        let origin = &current[..origin_end];
        if location.starts_with('/') {
            return format!("{origin}{location}");
        }
        let base = &current[..current.rfind('/').map(|i| i + 1).unwrap_or(current.len())];
        return format!("{base}{location}");
    }
    location.to_string()
}
