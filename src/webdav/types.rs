//! Parsed shapes of the WebDAV wire protocol.

use crate::common::quirks::QuirkProfile;
use crate::webdav::xml::ns;

/// WebDAV `Depth` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Depth {
    Zero,
    One,
    Infinity,
}

impl Depth {
    pub fn as_str(self) -> &'static str {
        match self {
            Depth::Zero => "0",
            Depth::One => "1",
            Depth::Infinity => "infinity",
        }
    }
}

/// Namespace-qualified element name. An empty namespace means the element's
/// prefix could not be resolved (tolerated under lenient quirk profiles).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QName {
    pub ns: String,
    pub local: String,
}

impl QName {
    pub fn new(ns: impl Into<String>, local: impl Into<String>) -> Self {
        Self {
            ns: ns.into(),
            local: local.into(),
        }
    }

    pub fn dav(local: &str) -> Self {
        Self::new(ns::DAV, local)
    }

    pub fn caldav(local: &str) -> Self {
        Self::new(ns::CALDAV, local)
    }

    pub fn calendarserver(local: &str) -> Self {
        Self::new(ns::CALENDARSERVER, local)
    }

    /// Exact match, or local-name-only match when `lenient` and the parsed
    /// element carried no resolvable namespace.
    pub fn matches(&self, target_ns: &str, local: &str, lenient: bool) -> bool {
        if !self.local.eq_ignore_ascii_case(local) {
            return false;
        }
        self.ns == target_ns || (lenient && self.ns.is_empty())
    }
}

/// Value of one property inside a `propstat` block.
///
/// `text` collects the (whitespace-normalized) character content of the
/// property element itself; `calendar-data`/`calendar-timezone` payloads are
/// preserved byte-for-byte instead. `hrefs` collects `<href>` children
/// (principals, home sets), `children` the names of nested elements
/// (`resourcetype`), and `components` the `name` attributes of CalDAV
/// `<comp>` children.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PropValue {
    pub text: String,
    pub hrefs: Vec<String>,
    pub children: Vec<QName>,
    pub components: Vec<String>,
}

impl PropValue {
    /// Text content, or `None` when empty.
    pub fn text_opt(&self) -> Option<&str> {
        if self.text.is_empty() {
            None
        } else {
            Some(self.text.as_str())
        }
    }

    /// Whether any nested element matches `(ns, local)`.
    pub fn has_child(&self, target_ns: &str, local: &str, lenient: bool) -> bool {
        self.children.iter().any(|c| c.matches(target_ns, local, lenient))
    }
}

/// One `propstat` block: a status code and the properties it covers.
#[derive(Debug, Clone, Default)]
pub struct Propstat {
    pub status: u16,
    pub props: Vec<(QName, PropValue)>,
}

impl Propstat {
    pub fn is_ok(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// One `response` element of a `207 Multi-Status` body.
#[derive(Debug, Clone, Default)]
pub struct ResponseEntry {
    pub href: String,
    /// Resource-level status (`<response><status>`), used by
    /// `sync-collection` to signal removed resources.
    pub status: Option<u16>,
    pub propstats: Vec<Propstat>,
}

impl ResponseEntry {
    /// Look up a property in the 2xx propstat blocks.
    pub fn prop(&self, target_ns: &str, local: &str, quirks: &QuirkProfile) -> Option<&PropValue> {
        let lenient = quirks.dav_namespace_lenient;
        self.propstats
            .iter()
            .filter(|ps| ps.is_ok())
            .flat_map(|ps| ps.props.iter())
            .find(|(name, _)| name.matches(target_ns, local, lenient))
            .map(|(_, value)| value)
    }

    /// Status reported for a specific property, regardless of propstat
    /// block.
    pub fn prop_status(&self, target_ns: &str, local: &str, quirks: &QuirkProfile) -> Option<u16> {
        let lenient = quirks.dav_namespace_lenient;
        self.propstats
            .iter()
            .find(|ps| {
                ps.props
                    .iter()
                    .any(|(name, _)| name.matches(target_ns, local, lenient))
            })
            .map(|ps| ps.status)
    }

    /// The resource is reported gone: a 404 or 410 either at the resource
    /// level or as the only propstat status.
    pub fn is_gone(&self) -> bool {
        if matches!(self.status, Some(404) | Some(410)) {
            return true;
        }
        !self.propstats.is_empty()
            && self
                .propstats
                .iter()
                .all(|ps| ps.status == 404 || ps.status == 410)
    }
}

/// A parsed `207 Multi-Status` response.
#[derive(Debug, Clone, Default)]
pub struct Multistatus {
    pub responses: Vec<ResponseEntry>,
    /// Top-level RFC 6578 `sync-token`, when the body carried one.
    pub sync_token: Option<String>,
}
