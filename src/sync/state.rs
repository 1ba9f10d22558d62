//! Persistent sync cursor and parse-failure quarantine.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Per-calendar sync cursor. The engine never mutates a state it was given;
/// it returns a fresh value the host persists atomically, so crash recovery
/// is "either the new state landed or the old one still applies".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncState {
    pub calendar_url: String,
    pub ctag: Option<String>,
    pub sync_token: Option<String>,
    /// href → etag of every resource the engine has applied.
    pub etags: HashMap<String, String>,
    /// uid → href reverse index, used to map server-side deletions back to
    /// local identities.
    pub url_map: HashMap<String, String>,
    pub last_sync: Option<DateTime<Utc>>,
}

impl SyncState {
    pub fn new(calendar_url: impl Into<String>) -> Self {
        Self {
            calendar_url: calendar_url.into(),
            ..Self::default()
        }
    }

    /// Look up the uid addressed by an href.
    pub fn uid_for_href(&self, href: &str) -> Option<&str> {
        self.url_map
            .iter()
            .find(|(_, mapped)| mapped.as_str() == href)
            .map(|(uid, _)| uid.as_str())
    }

    /// Record an applied upsert.
    pub fn record(&mut self, uid: &str, href: &str, etag: Option<&str>) {
        self.url_map.insert(uid.to_string(), href.to_string());
        match etag {
            Some(etag) => {
                self.etags.insert(href.to_string(), etag.to_string());
            }
            None => {
                self.etags.remove(href);
            }
        }
    }

    /// Record an applied deletion.
    pub fn forget_uid(&mut self, uid: &str) {
        if let Some(href) = self.url_map.remove(uid) {
            self.etags.remove(&href);
        }
    }
}

/// Engine tuning knobs.
#[derive(Debug, Clone)]
pub struct SyncOptions {
    /// How many failed parse attempts an href gets before it is
    /// quarantined.
    pub max_parse_retries: u32,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            max_parse_retries: 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureEntry {
    pub count: u32,
    pub first_seen: DateTime<Utc>,
    /// ETag observed at the last failure; a different ETag on the server
    /// means the resource changed and deserves another chance.
    pub last_etag: Option<String>,
}

/// Tracks persistently unparseable resources per calendar. Quarantined
/// hrefs are excluded from fetches until the tracker is cleared explicitly
/// or the resource's ETag changes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FailureTracker {
    entries: HashMap<String, FailureEntry>,
}

impl FailureTracker {
    pub fn record_failure(&mut self, href: &str, etag: Option<&str>) -> u32 {
        let entry = self
            .entries
            .entry(href.to_string())
            .or_insert_with(|| FailureEntry {
                count: 0,
                first_seen: Utc::now(),
                last_etag: None,
            });
        entry.count += 1;
        if etag.is_some() {
            entry.last_etag = etag.map(str::to_string);
        }
        entry.count
    }

    /// Whether fetching this href should be skipped. A changed ETag resets
    /// the quarantine.
    pub fn is_quarantined(&mut self, href: &str, current_etag: Option<&str>, threshold: u32) -> bool {
        let Some(entry) = self.entries.get(href) else {
            return false;
        };
        if entry.count < threshold {
            return false;
        }
        if let (Some(current), Some(seen)) = (current_etag, entry.last_etag.as_deref()) {
            if current != seen {
                tracing::debug!(href, "etag changed, lifting parse quarantine");
                self.entries.remove(href);
                return false;
            }
        }
        true
    }

    pub fn failure_count(&self, href: &str) -> u32 {
        self.entries.get(href).map(|e| e.count).unwrap_or(0)
    }

    /// Administrative reset for one href.
    pub fn clear(&mut self, href: &str) {
        self.entries.remove(href);
    }

    /// Administrative reset of the whole tracker.
    pub fn clear_all(&mut self) {
        self.entries.clear();
    }
}
