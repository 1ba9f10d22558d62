//! The tagged result type shared by every fallible protocol operation.
//!
//! Nothing in the protocol layer panics or throws past this boundary: every
//! fault is converted into a [`DavError`] variant so callers can drive their
//! state machines as total functions over the cases.

use thiserror::Error;

/// Result alias used across the protocol adapter, client, sync engine, and
/// push pipeline.
pub type DavResult<T> = Result<T, DavError>;

/// Fault taxonomy of the CalDAV core.
#[derive(Debug, Clone, Error)]
pub enum DavError {
    /// The server answered with a non-success HTTP status.
    ///
    /// `code` 0 is reserved for locally-enforced refusals (e.g. an oversized
    /// response body rejected before parsing).
    #[error("HTTP {code}: {message}")]
    Http {
        code: u16,
        message: String,
        body: Option<String>,
    },

    /// The request never produced an HTTP response (DNS, TLS, timeout, ...).
    #[error("network error: {0}")]
    Network(String),

    /// A response body could not be parsed (XML or iCalendar) at a level
    /// where no useful partial result exists.
    #[error("parse error: {0}")]
    Parse(String),

    /// An input was rejected before any network call was made.
    #[error("invalid argument: {0}")]
    Argument(String),
}

impl DavError {
    pub fn http(code: u16, message: impl Into<String>) -> Self {
        Self::Http {
            code,
            message: message.into(),
            body: None,
        }
    }

    /// HTTP status code, if this is an HTTP-level failure.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Http { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// `403` and `410` are the two defined signals for an expired RFC 6578
    /// sync token; callers interpret them equivalently.
    pub fn is_token_expired(&self) -> bool {
        matches!(self.status(), Some(403) | Some(410))
    }

    /// `412 Precondition Failed` — the conflict signal for conditional
    /// `PUT`/`DELETE`.
    pub fn is_conflict(&self) -> bool {
        self.status() == Some(412)
    }

    pub fn is_not_found(&self) -> bool {
        self.status() == Some(404)
    }

    pub fn is_unauthenticated(&self) -> bool {
        self.status() == Some(401)
    }

    /// Failures worth retrying later without operator intervention:
    /// transport faults, 5xx, and rate limiting.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Network(_) => true,
            Self::Http { code, .. } => *code == 429 || (500..600).contains(code),
            _ => false,
        }
    }
}
