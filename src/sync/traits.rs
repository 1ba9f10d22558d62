//! Host-implemented seams between the engine and local storage.

use async_trait::async_trait;

use crate::common::error::DavResult;
use crate::ical::model::Event;

/// A locally stored event as the host knows it.
#[derive(Debug, Clone)]
pub struct LocalEvent {
    pub uid: String,
    pub etag: Option<String>,
    pub event: Event,
}

/// Read-only view of the host's event store for one calendar.
#[async_trait]
pub trait LocalEventProvider: Send + Sync {
    /// All events currently stored for the calendar. Pure read.
    async fn local_events(&self, calendar_url: &str) -> DavResult<Vec<LocalEvent>>;

    /// Reverse lookup used when a server deletion names an href the sync
    /// cursor has no mapping for. Hosts that index by href should override
    /// this.
    async fn uid_for_href(&self, _href: &str) -> Option<String> {
        None
    }
}

/// Sink for the changes a sync decides on. Implementations must be
/// idempotent: the engine may re-deliver a change after an interrupted run.
#[async_trait]
pub trait SyncResultHandler: Send {
    async fn upsert_event(&mut self, event: &Event) -> DavResult<()>;

    async fn delete_event(&mut self, uid: &str) -> DavResult<()>;

    async fn record_etag(&mut self, uid: &str, href: &str, etag: &str) -> DavResult<()>;
}
