//! Per-provider protocol deviations, expressed as data.
//!
//! Real CalDAV servers disagree on details the RFCs leave soft: whether
//! ETags keep their surrounding quotes, whether response elements carry a
//! resolvable `DAV:` namespace, whether text properties arrive wrapped in
//! literal CDATA markers, and how quickly a freshly written resource becomes
//! readable. A [`QuirkProfile`] captures those choices as a plain value the
//! host selects by inspecting the server URL and passes into the client —
//! no subclassing, no global registry.

use serde::{Deserialize, Serialize};

/// Authentication scheme the transport should use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuthScheme {
    Basic,
    Bearer,
}

/// Table-driven description of one provider's protocol behavior.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuirkProfile {
    /// Strip one layer of enclosing double quotes from every ETag read off
    /// the wire (headers and `getetag` properties alike).
    pub strip_etag_quotes: bool,
    /// Accept response elements whose namespace cannot be resolved, matching
    /// them by local name only. iCloud has been observed emitting such
    /// bodies.
    pub dav_namespace_lenient: bool,
    /// Strip a literal `<![CDATA[...]]>` wrapper left inside property text
    /// by servers that double-encode.
    pub unwrap_cdata: bool,
    /// Authentication scheme expected by the provider.
    pub auth: AuthScheme,
    /// How many bounded-backoff read attempts to spend confirming that a
    /// write became visible. Zero disables the confirmation loop.
    pub post_write_read_retries: u32,
}

impl QuirkProfile {
    /// Strict RFC 4791/6578 behavior, no tolerance. The default.
    pub fn rfc_strict() -> Self {
        Self {
            strip_etag_quotes: false,
            dav_namespace_lenient: false,
            unwrap_cdata: false,
            auth: AuthScheme::Basic,
            post_write_read_retries: 0,
        }
    }

    /// iCloud: app-specific passwords over Basic auth, quoted ETags that are
    /// better stored bare, occasional namespace-less response elements and
    /// CDATA-wrapped text, and eventually-consistent reads after writes.
    pub fn icloud() -> Self {
        Self {
            strip_etag_quotes: true,
            dav_namespace_lenient: true,
            unwrap_cdata: true,
            auth: AuthScheme::Basic,
            post_write_read_retries: 3,
        }
    }

    /// Google Calendar: OAuth bearer tokens, otherwise RFC-conforming
    /// responses.
    pub fn google() -> Self {
        Self {
            strip_etag_quotes: false,
            dav_namespace_lenient: false,
            unwrap_cdata: false,
            auth: AuthScheme::Bearer,
            post_write_read_retries: 0,
        }
    }

    /// Convenience selector for hosts that dispatch on the server URL.
    pub fn for_url(url: &str) -> Self {
        let lower = url.to_ascii_lowercase();
        if lower.contains("icloud.com") {
            Self::icloud()
        } else if lower.contains("google.com") || lower.contains("googleapis.com") {
            Self::google()
        } else {
            Self::rfc_strict()
        }
    }

    /// Normalize an ETag read from the wire according to this profile.
    ///
    /// Idempotent: a bare tag passes through unchanged.
    pub fn normalize_etag(&self, raw: &str) -> String {
        let trimmed = raw.trim();
        if self.strip_etag_quotes {
            if let Some(inner) = trimmed
                .strip_prefix('"')
                .and_then(|rest| rest.strip_suffix('"'))
            {
                return inner.to_string();
            }
        }
        trimmed.to_string()
    }
}

impl Default for QuirkProfile {
    fn default() -> Self {
        Self::rfc_strict()
    }
}
