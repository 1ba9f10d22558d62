//! The offline operation queue and its coalescing rules.
//!
//! Every local mutation is appended as a [`PendingOperation`] and pushed
//! later. Coalescing runs on enqueue, against the store, so the durable log
//! is always the minimal representation of local intent: at most one live
//! operation per uid, no redundant chains.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::common::error::DavResult;
use crate::ical::model::Event;

/// A queued local mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PendingOperation {
    Create {
        calendar_url: String,
        event: Event,
    },
    Update {
        event: Event,
        href: String,
        base_etag: Option<String>,
    },
    Delete {
        uid: String,
        href: String,
        base_etag: Option<String>,
    },
}

impl PendingOperation {
    /// The uid this operation is about.
    pub fn uid(&self) -> &str {
        match self {
            PendingOperation::Create { event, .. } | PendingOperation::Update { event, .. } => {
                &event.uid
            }
            PendingOperation::Delete { uid, .. } => uid,
        }
    }

    /// The local event payload, when the operation carries one.
    pub fn event(&self) -> Option<&Event> {
        match self {
            PendingOperation::Create { event, .. } | PendingOperation::Update { event, .. } => {
                Some(event)
            }
            PendingOperation::Delete { .. } => None,
        }
    }
}

/// A pending operation with its bookkeeping: a monotonic id (queue order),
/// transient-retry count, last error seen, and creation time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingRecord {
    pub id: u64,
    pub op: PendingOperation,
    pub retries: u32,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl PendingRecord {
    pub fn new(id: u64, op: PendingOperation) -> Self {
        Self {
            id,
            op,
            retries: 0,
            last_error: None,
            created_at: Utc::now(),
        }
    }
}

/// What enqueueing a new operation does to an existing one for the same
/// uid.
#[derive(Debug, Clone, PartialEq)]
pub enum CoalesceOutcome {
    /// Replace the prior record's operation with this one.
    ReplacePrior(PendingOperation),
    /// Both operations cancel out; the prior record is dropped and the new
    /// one never stored.
    DropBoth,
    /// The prior record already subsumes the new operation.
    KeepPrior,
}

/// Collapse `prior` followed by `incoming` into their minimal equivalent.
///
/// Idempotent by construction: the result of a collapse never collapses
/// further with itself.
pub fn coalesce(prior: &PendingOperation, incoming: PendingOperation) -> CoalesceOutcome {
    use PendingOperation::{Create, Delete, Update};
    match (prior, incoming) {
        // Not yet on the server: edits fold into the create, a delete
        // erases it entirely.
        (Create { calendar_url, .. }, Update { event, .. }) => {
            CoalesceOutcome::ReplacePrior(Create {
                calendar_url: calendar_url.clone(),
                event,
            })
        }
        (Create { .. }, Delete { .. }) => CoalesceOutcome::DropBoth,
        (Create { .. }, Create { calendar_url, event }) => {
            CoalesceOutcome::ReplacePrior(Create {
                calendar_url,
                event,
            })
        }

        // Successive updates keep the last payload; the freshest known
        // base ETag wins.
        (
            Update { base_etag: prior_etag, .. },
            Update {
                event,
                href,
                base_etag,
            },
        ) => CoalesceOutcome::ReplacePrior(Update {
            event,
            href,
            base_etag: base_etag.or_else(|| prior_etag.clone()),
        }),
        (Update { .. }, incoming @ Delete { .. }) => CoalesceOutcome::ReplacePrior(incoming),
        (Update { href, base_etag, .. }, Create { event, .. }) => {
            CoalesceOutcome::ReplacePrior(Update {
                event,
                href: href.clone(),
                base_etag: base_etag.clone(),
            })
        }

        // A delete followed by a create is a resurrection: update in place,
        // keeping the href the server still knows.
        (Delete { href, base_etag, .. }, Create { event, .. }) => {
            CoalesceOutcome::ReplacePrior(Update {
                event,
                href: href.clone(),
                base_etag: base_etag.clone(),
            })
        }
        (Delete { href, base_etag, .. }, Update { event, .. }) => {
            CoalesceOutcome::ReplacePrior(Update {
                event,
                href: href.clone(),
                base_etag: base_etag.clone(),
            })
        }
        (Delete { .. }, Delete { .. }) => CoalesceOutcome::KeepPrior,
    }
}

/// Durable queue of pending operations, implemented by the host. Reads may
/// be concurrent; writes are serialized by the pipeline.
#[async_trait]
pub trait PendingStore: Send + Sync {
    async fn append(&self, record: PendingRecord) -> DavResult<()>;

    async fn list(&self) -> DavResult<Vec<PendingRecord>>;

    /// Remove a record after a successful push.
    async fn remove(&self, id: u64) -> DavResult<()>;

    /// Replace a record in place (coalescing, retry bookkeeping).
    async fn replace(&self, id: u64, record: PendingRecord) -> DavResult<()>;

    /// Discard a record after a terminal failure.
    async fn drop_record(&self, id: u64) -> DavResult<()>;
}

/// In-memory [`PendingStore`] for tests and hosts without durability needs.
#[derive(Debug, Default)]
pub struct MemoryPendingStore {
    records: Mutex<Vec<PendingRecord>>,
}

impl MemoryPendingStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PendingStore for MemoryPendingStore {
    async fn append(&self, record: PendingRecord) -> DavResult<()> {
        self.records.lock().await.push(record);
        Ok(())
    }

    async fn list(&self) -> DavResult<Vec<PendingRecord>> {
        let mut records = self.records.lock().await.clone();
        records.sort_by_key(|r| r.id);
        Ok(records)
    }

    async fn remove(&self, id: u64) -> DavResult<()> {
        self.records.lock().await.retain(|r| r.id != id);
        Ok(())
    }

    async fn replace(&self, id: u64, record: PendingRecord) -> DavResult<()> {
        let mut records = self.records.lock().await;
        if let Some(slot) = records.iter_mut().find(|r| r.id == id) {
            *slot = record;
        }
        Ok(())
    }

    async fn drop_record(&self, id: u64) -> DavResult<()> {
        self.records.lock().await.retain(|r| r.id != id);
        Ok(())
    }
}
