pub mod body;
pub mod client;
pub mod types;

pub use client::{CalDavClient, build_event_url};
pub use types::{
    Account, CalendarInfo, EventWithMetadata, FetchedEvents, ResourceHref, SyncResult,
};
