//! Value types of the CalDAV client surface.

use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

use crate::ical::model::Event;

/// Result of account discovery: the principal, its calendar home, and the
/// calendar collections underneath it.
#[derive(Debug, Clone)]
pub struct Account {
    pub principal_url: String,
    pub home_set_url: String,
    pub calendars: Vec<CalendarInfo>,
}

/// One calendar collection found under a home set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalendarInfo {
    pub href: String,
    pub display_name: Option<String>,
    pub description: Option<String>,
    pub color: Option<String>,
    pub ctag: Option<String>,
    pub sync_token: Option<String>,
    pub supported_components: Vec<String>,
}

/// An addressable resource: an href plus (usually) its ETag.
///
/// Identity is the href alone — two sightings of the same resource with
/// different ETags are the *same* resource at different versions.
#[derive(Debug, Clone, Eq, Serialize, Deserialize)]
pub struct ResourceHref {
    pub href: String,
    pub etag: Option<String>,
}

impl ResourceHref {
    pub fn new(href: impl Into<String>, etag: Option<String>) -> Self {
        Self {
            href: href.into(),
            etag,
        }
    }
}

impl PartialEq for ResourceHref {
    fn eq(&self, other: &Self) -> bool {
        self.href == other.href
    }
}

impl Hash for ResourceHref {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.href.hash(state);
    }
}

/// A fully materialized event together with its addressing metadata. The
/// href is authoritative for addressing, the embedded uid for identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventWithMetadata {
    pub href: String,
    pub etag: Option<String>,
    pub event: Event,
}

/// Outcome of a fetch that parses calendar payloads: the events that
/// survived, and the resources whose iCalendar data had to be skipped.
#[derive(Debug, Clone, Default)]
pub struct FetchedEvents {
    pub events: Vec<EventWithMetadata>,
    pub parse_failures: Vec<ResourceHref>,
}

/// Parsed outcome of an RFC 6578 `sync-collection` report.
#[derive(Debug, Clone, Default)]
pub struct SyncResult {
    /// Changes that arrived with inline calendar data.
    pub added: Vec<EventWithMetadata>,
    /// Hrefs the server reported as 404/410 — removed resources.
    pub deleted: Vec<String>,
    /// Changes that arrived with an ETag but no calendar data; a follow-up
    /// multiget materializes them (iCloud style).
    pub added_hrefs: Vec<ResourceHref>,
    pub new_sync_token: Option<String>,
    /// Resources whose inline calendar data failed to parse and were
    /// skipped.
    pub parse_failures: Vec<ResourceHref>,
}

impl SyncResult {
    /// Total number of change signals in the report.
    pub fn change_count(&self) -> usize {
        self.added.len() + self.deleted.len() + self.added_hrefs.len()
    }
}
