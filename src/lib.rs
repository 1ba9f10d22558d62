//! CalDAV synchronization core.
//!
//! This crate keeps a local event store consistent with a remote CalDAV
//! collection. It is built from five layers, composed top to bottom:
//!
//! - [`common::quirks::QuirkProfile`] — per-provider protocol deviations as
//!   plain data (ETag quoting, namespace tolerance, CDATA unwrapping,
//!   auth scheme, eventual-consistency budget).
//! - [`webdav`] — stateless `PROPFIND`/`REPORT`/`PUT`/`DELETE` assembly and
//!   a tolerant, namespace-aware `207 Multi-Status` parser.
//! - [`caldav::CalDavClient`] — discovery, property reads, calendar-query,
//!   calendar-multiget, RFC 6578 sync-collection, and event CRUD with ETag
//!   preconditions.
//! - [`sync::SyncEngine`] — the full/incremental sync state machine:
//!   expired-token fallback, multiget follow-ups, parse-failure isolation
//!   and quarantine, and atomic [`sync::SyncState`] hand-off.
//! - [`push::PushPipeline`] — the offline operation queue with coalescing,
//!   serial flush, and `412` conflict resolution strategies.
//!
//! Every fallible operation returns a [`common::error::DavResult`]; no
//! failure escapes as a panic or an untyped error.
//!
//! # Syncing a calendar
//!
//! ```no_run
//! use std::sync::Arc;
//! use caldav_sync_rs::common::{Credentials, HyperTransport, QuirkProfile, TransportConfig};
//! use caldav_sync_rs::caldav::CalDavClient;
//! use caldav_sync_rs::sync::{SyncEngine, SyncOptions};
//! use tokio_util::sync::CancellationToken;
//!
//! # use caldav_sync_rs::sync::{LocalEvent, LocalEventProvider, SyncResultHandler};
//! # use caldav_sync_rs::common::DavResult;
//! # use caldav_sync_rs::ical::Event;
//! # struct MyStore;
//! # #[async_trait::async_trait]
//! # impl LocalEventProvider for MyStore {
//! #     async fn local_events(&self, _: &str) -> DavResult<Vec<LocalEvent>> { Ok(vec![]) }
//! # }
//! # #[async_trait::async_trait]
//! # impl SyncResultHandler for MyStore {
//! #     async fn upsert_event(&mut self, _: &Event) -> DavResult<()> { Ok(()) }
//! #     async fn delete_event(&mut self, _: &str) -> DavResult<()> { Ok(()) }
//! #     async fn record_etag(&mut self, _: &str, _: &str, _: &str) -> DavResult<()> { Ok(()) }
//! # }
//! # async fn example() -> anyhow::Result<()> {
//! let quirks = QuirkProfile::for_url("https://caldav.icloud.com/");
//! let transport = Arc::new(HyperTransport::new(
//!     Credentials::Basic {
//!         username: "user".into(),
//!         password: "app-password".into(),
//!     },
//!     TransportConfig::default(),
//! )?);
//! let client = CalDavClient::new("https://caldav.icloud.com/", transport, quirks);
//!
//! let account = client.discover_account().await?;
//! let calendar = &account.calendars[0].href;
//!
//! let provider = MyStore;
//! let mut handler = MyStore;
//! let mut engine = SyncEngine::new(client, SyncOptions::default());
//! let report = engine
//!     .sync_with_incremental(calendar, None, &provider, &mut handler, false, &CancellationToken::new())
//!     .await;
//!
//! // Persist report.new_state and pass it back in on the next run: the
//! // engine will use the stored sync token for an incremental report.
//! # Ok(())
//! # }
//! ```
//!
//! # Queuing local edits
//!
//! ```no_run
//! use std::sync::Arc;
//! use caldav_sync_rs::ical::Event;
//! use caldav_sync_rs::push::{MemoryPendingStore, PushOptions, PushPipeline};
//!
//! # async fn example(client: caldav_sync_rs::caldav::CalDavClient) -> anyhow::Result<()> {
//! let store = Arc::new(MemoryPendingStore::new());
//! let mut pipeline = PushPipeline::new(client, store, PushOptions::default());
//!
//! let mut event = Event::new("meeting-42@example.com");
//! event.summary = Some("Planning".into());
//! # let (dtstart, dtend) = (None, None);
//! event.dtstart = dtstart;
//! event.dtend = dtend;
//!
//! pipeline.queue_create("/calendars/user/personal/", event).await?;
//! let report = pipeline.push().await?;
//! for conflict in pipeline.conflicts() {
//!     // resolve with pipeline.resolve_conflict(...)
//!     println!("conflict on {}", conflict.href);
//! }
//! # Ok(())
//! # }
//! ```

pub mod caldav;
pub mod common;
pub mod ical;
pub mod push;
pub mod sync;
pub mod webdav;

pub use caldav::{
    Account, CalDavClient, CalendarInfo, EventWithMetadata, FetchedEvents, ResourceHref,
    SyncResult, build_event_url,
};
pub use common::{
    AuthScheme, Credentials, DavError, DavResult, HttpRequest, HttpResponse, HttpTransport,
    HyperTransport, QuirkProfile, TransportConfig, TransportError,
};
pub use ical::{CalDateTime, Event, EventStatus, Transparency};
pub use push::{
    ConflictOutcome, ConflictStrategy, MemoryPendingStore, PendingOperation, PendingRecord,
    PendingStore, PushOptions, PushPipeline, PushReport,
};
pub use sync::{
    FailureTracker, LocalEvent, LocalEventProvider, SyncEngine, SyncOptions, SyncPhase,
    SyncReport, SyncResultHandler, SyncState,
};
pub use webdav::{DavAdapter, Depth, Multistatus, parse_multistatus};
