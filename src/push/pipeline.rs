//! Serial push of pending operations, with conflict parking and
//! resolution.
//!
//! Operations flush in queue order — one uid has at most one live op by
//! construction, and the server's ETag regime punishes reordering. A `412`
//! parks the operation in the conflict queue for the host to resolve with
//! an explicit strategy; transient faults are retried across pushes up to a
//! bounded count.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::caldav::client::{CalDavClient, build_event_url};
use crate::caldav::types::EventWithMetadata;
use crate::common::error::{DavError, DavResult};
use crate::ical::model::Event;
use crate::push::queue::{
    CoalesceOutcome, PendingOperation, PendingRecord, PendingStore, coalesce,
};
use crate::sync::traits::SyncResultHandler;

/// Pipeline tuning knobs.
#[derive(Debug, Clone)]
pub struct PushOptions {
    /// Transient-failure budget per operation before it is dropped.
    pub max_push_retries: u32,
}

impl Default for PushOptions {
    fn default() -> Self {
        Self {
            max_push_retries: 3,
        }
    }
}

/// A parked conflicting operation awaiting resolution.
#[derive(Debug, Clone)]
pub struct ConflictRecord {
    pub record: PendingRecord,
    /// The resource the conflict happened on.
    pub href: String,
    pub detected_at: DateTime<Utc>,
}

/// Resolution strategy for a parked conflict.
pub enum ConflictStrategy<'a> {
    /// Drop the local operation; fetch the server copy and hand it to the
    /// local store.
    ServerWins,
    /// Re-read the server ETag and replay the local operation against it.
    LocalWins,
    /// Whichever copy carries the later `DTSTAMP` (falling back to
    /// `LAST-MODIFIED`) wins; ties go to the server.
    NewestWins,
    /// Host-supplied merge of `(local, server)`; the merged event replaces
    /// both copies.
    Manual(&'a (dyn Fn(&Event, &Event) -> Event + Send + Sync)),
}

/// What a resolution did.
#[derive(Debug, Clone, PartialEq)]
pub enum ConflictOutcome {
    /// The server copy was applied locally; the local op is gone.
    ServerApplied,
    /// The local op was replayed with a fresh ETag.
    Replayed { etag: Option<String> },
    /// A merged event was written and applied locally.
    Merged { etag: Option<String> },
}

/// Outcome of one `push()` batch.
#[derive(Debug, Clone, Default)]
pub struct PushReport {
    pub pushed: usize,
    /// Operations that failed recoverably and stay queued.
    pub failed: usize,
    /// Operations discarded after a terminal failure.
    pub dropped: usize,
    /// Record ids parked in the conflict queue this batch.
    pub conflicts: Vec<u64>,
}

/// Single-writer push pipeline for one calendar's pending store.
pub struct PushPipeline {
    client: CalDavClient,
    store: Arc<dyn PendingStore>,
    options: PushOptions,
    conflicts: Vec<ConflictRecord>,
    next_id: u64,
    seeded: bool,
}

impl PushPipeline {
    pub fn new(client: CalDavClient, store: Arc<dyn PendingStore>, options: PushOptions) -> Self {
        Self {
            client,
            store,
            options,
            conflicts: Vec::new(),
            next_id: 1,
            seeded: false,
        }
    }

    /// Currently parked conflicts.
    pub fn conflicts(&self) -> &[ConflictRecord] {
        &self.conflicts
    }

    async fn allocate_id(&mut self) -> DavResult<u64> {
        if !self.seeded {
            let max = self
                .store
                .list()
                .await?
                .iter()
                .map(|r| r.id)
                .max()
                .unwrap_or(0);
            self.next_id = max + 1;
            self.seeded = true;
        }
        let id = self.next_id;
        self.next_id += 1;
        Ok(id)
    }

    /// Queue a create for later push.
    pub async fn queue_create(&mut self, calendar_url: &str, event: Event) -> DavResult<()> {
        event.validate()?;
        build_event_url(calendar_url, &event.uid)?;
        self.enqueue(PendingOperation::Create {
            calendar_url: calendar_url.to_string(),
            event,
        })
        .await
    }

    /// Queue an update for later push. `etag` is the base version the edit
    /// was made against.
    pub async fn queue_update(
        &mut self,
        event: Event,
        href: &str,
        etag: Option<String>,
    ) -> DavResult<()> {
        event.validate()?;
        self.enqueue(PendingOperation::Update {
            event,
            href: href.to_string(),
            base_etag: etag,
        })
        .await
    }

    /// Queue a delete for later push.
    pub async fn queue_delete(
        &mut self,
        uid: &str,
        href: &str,
        etag: Option<String>,
    ) -> DavResult<()> {
        if uid.trim().is_empty() {
            return Err(DavError::Argument("delete needs a uid".into()));
        }
        self.enqueue(PendingOperation::Delete {
            uid: uid.to_string(),
            href: href.to_string(),
            base_etag: etag,
        })
        .await
    }

    /// Coalesce against the store, then persist.
    async fn enqueue(&mut self, op: PendingOperation) -> DavResult<()> {
        let records = self.store.list().await?;
        let prior = records
            .iter()
            .find(|r| r.op.uid() == op.uid() && !self.is_conflicted(r.id));

        match prior {
            Some(prior) => match coalesce(&prior.op, op) {
                CoalesceOutcome::ReplacePrior(merged) => {
                    let record = PendingRecord {
                        id: prior.id,
                        op: merged,
                        retries: 0,
                        last_error: None,
                        created_at: prior.created_at,
                    };
                    self.store.replace(prior.id, record).await
                }
                CoalesceOutcome::DropBoth => self.store.drop_record(prior.id).await,
                CoalesceOutcome::KeepPrior => Ok(()),
            },
            None => {
                let id = self.allocate_id().await?;
                self.store.append(PendingRecord::new(id, op)).await
            }
        }
    }

    fn is_conflicted(&self, id: u64) -> bool {
        self.conflicts.iter().any(|c| c.record.id == id)
    }

    /// Flush the queue in order. Conflicts are parked, transient failures
    /// stay queued with an incremented retry count, terminal failures are
    /// dropped.
    pub async fn push(&mut self) -> DavResult<PushReport> {
        let mut report = PushReport::default();
        let mut records = self.store.list().await?;
        records.sort_by_key(|r| r.id);

        for record in records {
            if self.is_conflicted(record.id) {
                continue;
            }

            let href = match target_href(&record.op) {
                Ok(href) => href,
                Err(err) => {
                    tracing::warn!(id = record.id, error = %err, "dropping malformed pending op");
                    self.store.drop_record(record.id).await?;
                    report.dropped += 1;
                    continue;
                }
            };

            match self.execute(&record.op).await {
                Ok(wrote) => {
                    self.store.remove(record.id).await?;
                    report.pushed += 1;
                    if wrote && self.client.quirks().post_write_read_retries > 0 {
                        match self.client.await_visibility(&href).await {
                            Ok(true) => {}
                            Ok(false) => {
                                tracing::debug!(href = %href, "write accepted but not yet visible");
                            }
                            Err(err) => {
                                tracing::debug!(href = %href, error = %err, "visibility probe errored");
                            }
                        }
                    }
                }
                Err(err) if err.is_conflict() => {
                    tracing::info!(id = record.id, href = %href, "precondition failed, parking conflict");
                    report.conflicts.push(record.id);
                    self.conflicts.push(ConflictRecord {
                        record,
                        href,
                        detected_at: Utc::now(),
                    });
                }
                Err(err) if err.is_not_found() => {
                    // The target vanished server-side. A delete has thereby
                    // succeeded; anything else has nothing left to act on.
                    if matches!(record.op, PendingOperation::Delete { .. }) {
                        self.store.remove(record.id).await?;
                        report.pushed += 1;
                    } else {
                        tracing::warn!(id = record.id, href = %href, "target gone, dropping pending op");
                        self.store.drop_record(record.id).await?;
                        report.dropped += 1;
                    }
                }
                Err(DavError::Argument(message)) => {
                    tracing::warn!(id = record.id, error = %message, "dropping invalid pending op");
                    self.store.drop_record(record.id).await?;
                    report.dropped += 1;
                }
                Err(err) if err.is_transient() => {
                    let retries = record.retries + 1;
                    if retries >= self.options.max_push_retries {
                        tracing::warn!(
                            id = record.id,
                            retries,
                            error = %err,
                            "retry budget exhausted, dropping pending op"
                        );
                        self.store.drop_record(record.id).await?;
                        report.dropped += 1;
                    } else {
                        let mut updated = record.clone();
                        updated.retries = retries;
                        updated.last_error = Some(err.to_string());
                        self.store.replace(record.id, updated).await?;
                        report.failed += 1;
                    }
                }
                Err(err) => {
                    // Auth and similar: keep the op queued and let the host
                    // intervene.
                    tracing::warn!(id = record.id, error = %err, "push failed, keeping op queued");
                    let mut updated = record.clone();
                    updated.last_error = Some(err.to_string());
                    self.store.replace(record.id, updated).await?;
                    report.failed += 1;
                }
            }
        }

        Ok(report)
    }

    /// Returns whether the op wrote a resource body (and thus may need a
    /// visibility confirmation).
    async fn execute(&self, op: &PendingOperation) -> DavResult<bool> {
        match op {
            PendingOperation::Create {
                calendar_url,
                event,
            } => {
                self.client.create_event(calendar_url, event).await?;
                Ok(true)
            }
            PendingOperation::Update {
                event,
                href,
                base_etag,
            } => {
                self.client
                    .update_event(href, event, base_etag.as_deref())
                    .await?;
                Ok(true)
            }
            PendingOperation::Delete {
                href, base_etag, ..
            } => {
                self.client
                    .delete_event(href, base_etag.as_deref())
                    .await?;
                Ok(false)
            }
        }
    }

    /// Resolve a parked conflict. On success the operation leaves both the
    /// conflict queue and the pending store; on error it stays parked.
    pub async fn resolve_conflict(
        &mut self,
        op_id: u64,
        strategy: ConflictStrategy<'_>,
        handler: &mut dyn SyncResultHandler,
    ) -> DavResult<ConflictOutcome> {
        let index = self
            .conflicts
            .iter()
            .position(|c| c.record.id == op_id)
            .ok_or_else(|| DavError::Argument(format!("no parked conflict with id {op_id}")))?;
        let conflict = self.conflicts[index].clone();
        let server = self.client.get_event(&conflict.href).await?;

        let outcome = match strategy {
            ConflictStrategy::ServerWins => {
                self.apply_server(&conflict, server.as_ref(), handler).await?
            }
            ConflictStrategy::LocalWins => self.replay_local(&conflict, server.as_ref()).await?,
            ConflictStrategy::NewestWins => {
                let local_stamp = conflict.record.op.event().and_then(Event::conflict_stamp);
                let server_stamp = server.as_ref().and_then(|s| s.event.conflict_stamp());
                let local_wins = match (local_stamp, server_stamp) {
                    (Some(local), Some(remote)) => local > remote,
                    (Some(_), None) => true,
                    _ => false,
                };
                if local_wins {
                    self.replay_local(&conflict, server.as_ref()).await?
                } else {
                    self.apply_server(&conflict, server.as_ref(), handler).await?
                }
            }
            ConflictStrategy::Manual(merger) => {
                let local = conflict.record.op.event().ok_or_else(|| {
                    DavError::Argument("manual merge needs a local event payload".into())
                })?;
                match server.as_ref() {
                    Some(remote) => {
                        let merged = merger(local, &remote.event);
                        merged.validate()?;
                        let etag = self
                            .client
                            .update_event(&conflict.href, &merged, remote.etag.as_deref())
                            .await?;
                        handler.upsert_event(&merged).await?;
                        if let Some(etag) = &etag {
                            handler
                                .record_etag(&merged.uid, &conflict.href, etag)
                                .await?;
                        }
                        ConflictOutcome::Merged { etag }
                    }
                    // Server copy vanished: nothing to merge with, the
                    // local payload stands.
                    None => self.replay_local(&conflict, None).await?,
                }
            }
        };

        self.store.remove(op_id).await?;
        self.conflicts.remove(index);
        Ok(outcome)
    }

    async fn apply_server(
        &self,
        conflict: &ConflictRecord,
        server: Option<&EventWithMetadata>,
        handler: &mut dyn SyncResultHandler,
    ) -> DavResult<ConflictOutcome> {
        match server {
            Some(remote) => {
                handler.upsert_event(&remote.event).await?;
                if let Some(etag) = &remote.etag {
                    handler
                        .record_etag(&remote.event.uid, &remote.href, etag)
                        .await?;
                }
            }
            None => {
                handler.delete_event(conflict.record.op.uid()).await?;
            }
        }
        Ok(ConflictOutcome::ServerApplied)
    }

    async fn replay_local(
        &self,
        conflict: &ConflictRecord,
        server: Option<&EventWithMetadata>,
    ) -> DavResult<ConflictOutcome> {
        let fresh_etag = server.and_then(|s| s.etag.clone());
        match &conflict.record.op {
            // The create conflicted because the resource exists; replay as
            // an overwrite against the fresh version.
            PendingOperation::Create { event, .. } => {
                let etag = self
                    .client
                    .update_event(&conflict.href, event, fresh_etag.as_deref())
                    .await?;
                Ok(ConflictOutcome::Replayed { etag })
            }
            PendingOperation::Update { event, href, .. } => {
                let etag = self
                    .client
                    .update_event(href, event, fresh_etag.as_deref())
                    .await?;
                Ok(ConflictOutcome::Replayed { etag })
            }
            PendingOperation::Delete { href, .. } => {
                self.client
                    .delete_event(href, fresh_etag.as_deref())
                    .await?;
                Ok(ConflictOutcome::Replayed { etag: None })
            }
        }
    }
}

fn target_href(op: &PendingOperation) -> DavResult<String> {
    match op {
        PendingOperation::Create {
            calendar_url,
            event,
        } => build_event_url(calendar_url, &event.uid),
        PendingOperation::Update { href, .. } | PendingOperation::Delete { href, .. } => {
            Ok(href.clone())
        }
    }
}
