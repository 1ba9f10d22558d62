//! The incremental sync state machine.
//!
//! One entry point, [`SyncEngine::sync_with_incremental`], drives a full or
//! incremental sync as an explicit phase machine: a `loop` over a [`Phase`]
//! value, each arm performing at most one protocol step and naming its
//! successor. Token-expiry fallback and parse-failure retention are
//! transitions in the table, not special cases buried in conditionals.

use std::collections::HashSet;

use chrono::Utc;
use tokio_util::sync::CancellationToken;

use crate::caldav::client::CalDavClient;
use crate::caldav::types::{EventWithMetadata, FetchedEvents, ResourceHref, SyncResult};
use crate::common::error::{DavError, DavResult};
use crate::sync::state::{FailureTracker, SyncOptions, SyncState};
use crate::sync::traits::{LocalEventProvider, SyncResultHandler};

/// Progress notification for observers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPhase {
    FullFetch,
    IncrementalReport,
    Multiget,
    Diff,
    Apply,
    Finalize,
}

/// Outcome of one sync run.
#[derive(Debug, Clone, Default)]
pub struct SyncReport {
    pub is_full_sync: bool,
    /// The run reached finalization. Recoverable per-resource problems do
    /// not clear this; check `has_errors` for them.
    pub success: bool,
    pub has_errors: bool,
    pub cancelled: bool,
    pub upserted: usize,
    pub deleted: usize,
    /// Hrefs whose payloads were skipped as unparseable this run.
    pub parse_failures: Vec<String>,
    /// The cursor to persist. `None` when the run failed or was cancelled —
    /// the previous state remains authoritative.
    pub new_state: Option<SyncState>,
}

/// What an applied batch looks like once diffing is done.
struct ApplyPlan {
    upserts: Vec<EventWithMetadata>,
    delete_uids: Vec<String>,
    /// Whether the sync token may move forward. Any parse failure this run
    /// retains the previous token so the same window is retried.
    advance_token: bool,
    /// Token delivered by the incremental report, if any.
    incremental_token: Option<String>,
    /// Full syncs re-read token and ctag from the server afterwards.
    refresh_from_server: bool,
}

enum Phase {
    FullFetch,
    Incremental { token: String },
    Multiget { result: SyncResult },
    PlanIncremental { result: SyncResult, retained: bool },
    DiffFull { fetched: FetchedEvents },
    Apply { plan: ApplyPlan },
    Finalize { plan: ApplyPlan },
}

type ProgressFn = dyn Fn(SyncPhase) + Send + Sync;

/// Orchestrates full and incremental syncs for one calendar at a time.
///
/// The engine owns the per-calendar [`FailureTracker`]; hosts needing the
/// administrative reset path reach it through
/// [`SyncEngine::failure_tracker`].
pub struct SyncEngine {
    client: CalDavClient,
    options: SyncOptions,
    failures: FailureTracker,
    progress: Option<Box<ProgressFn>>,
}

impl SyncEngine {
    pub fn new(client: CalDavClient, options: SyncOptions) -> Self {
        Self {
            client,
            options,
            failures: FailureTracker::default(),
            progress: None,
        }
    }

    /// Install a progress observer invoked on each phase entry.
    pub fn with_progress(mut self, f: impl Fn(SyncPhase) + Send + Sync + 'static) -> Self {
        self.progress = Some(Box::new(f));
        self
    }

    /// Administrative access to the parse-failure quarantine.
    pub fn failure_tracker(&mut self) -> &mut FailureTracker {
        &mut self.failures
    }

    fn notify(&self, phase: SyncPhase) {
        if let Some(f) = &self.progress {
            f(phase);
        }
    }

    /// Run one sync against `previous` and return the report together with
    /// the next [`SyncState`] to persist. The previous state is never
    /// mutated; on failure or cancellation `new_state` stays `None` and the
    /// old cursor remains authoritative.
    pub async fn sync_with_incremental(
        &mut self,
        calendar_url: &str,
        previous: Option<&SyncState>,
        local: &dyn LocalEventProvider,
        handler: &mut dyn SyncResultHandler,
        force_full: bool,
        cancel: &CancellationToken,
    ) -> SyncReport {
        let mut report = SyncReport::default();
        let mut state = previous
            .cloned()
            .unwrap_or_else(|| SyncState::new(calendar_url));
        state.calendar_url = calendar_url.to_string();

        let previous_token = previous.and_then(|s| s.sync_token.clone());
        let mut phase = match (&previous_token, force_full) {
            (Some(token), false) if !token.is_empty() => Phase::Incremental {
                token: token.clone(),
            },
            _ => Phase::FullFetch,
        };

        loop {
            if cancel.is_cancelled() {
                return cancelled(report);
            }

            phase = match phase {
                Phase::FullFetch => {
                    self.notify(SyncPhase::FullFetch);
                    report.is_full_sync = true;
                    match self.client.fetch_events(calendar_url, None).await {
                        Ok(fetched) => Phase::DiffFull { fetched },
                        Err(err) => return fail(report, "full fetch failed", err),
                    }
                }

                Phase::Incremental { token } => {
                    self.notify(SyncPhase::IncrementalReport);
                    match self.client.sync_collection(calendar_url, &token).await {
                        Ok(result) => Phase::PlanIncremental {
                            result,
                            retained: false,
                        },
                        Err(err) if err.is_token_expired() => {
                            tracing::info!(
                                calendar = calendar_url,
                                status = err.status().unwrap_or(0),
                                "sync token expired, falling back to full sync"
                            );
                            Phase::FullFetch
                        }
                        Err(err) => return fail(report, "sync report failed", err),
                    }
                }

                Phase::PlanIncremental {
                    mut result,
                    retained,
                } => {
                    if !retained && !result.added_hrefs.is_empty() {
                        Phase::Multiget { result }
                    } else {
                        self.notify(SyncPhase::Diff);
                        self.note_parse_failures(&mut report, &result.parse_failures);
                        let delete_uids = self
                            .resolve_deleted_uids(&state, local, &result.deleted)
                            .await;
                        let advance_token = report.parse_failures.is_empty() && !retained;
                        Phase::Apply {
                            plan: ApplyPlan {
                                upserts: std::mem::take(&mut result.added),
                                delete_uids,
                                advance_token,
                                incremental_token: result.new_sync_token.clone(),
                                refresh_from_server: false,
                            },
                        }
                    }
                }

                Phase::Multiget { mut result } => {
                    self.notify(SyncPhase::Multiget);
                    let wanted: Vec<ResourceHref> = std::mem::take(&mut result.added_hrefs)
                        .into_iter()
                        .filter(|rh| {
                            !self.failures.is_quarantined(
                                &rh.href,
                                rh.etag.as_deref(),
                                self.options.max_parse_retries,
                            )
                        })
                        .collect();
                    let hrefs: Vec<&str> = wanted.iter().map(|rh| rh.href.as_str()).collect();

                    match self.client.fetch_events_by_href(calendar_url, &hrefs).await {
                        Ok(fetched) => {
                            result.added.extend(fetched.events);
                            result.parse_failures.extend(fetched.parse_failures);
                            Phase::PlanIncremental {
                                result,
                                retained: false,
                            }
                        }
                        Err(DavError::Parse(message)) => {
                            // The batch as a whole is unusable; retry each
                            // href alone to isolate the offender.
                            tracing::warn!(
                                calendar = calendar_url,
                                error = %message,
                                "multiget batch unparseable, isolating per href"
                            );
                            match self
                                .isolate_multiget(calendar_url, &wanted, &mut result, cancel)
                                .await
                            {
                                Ok(true) => Phase::PlanIncremental {
                                    result,
                                    retained: true,
                                },
                                Ok(false) => return cancelled(report),
                                Err(err) => {
                                    return fail(report, "multiget isolation failed", err);
                                }
                            }
                        }
                        Err(err) => return fail(report, "multiget failed", err),
                    }
                }

                Phase::DiffFull { fetched } => {
                    self.notify(SyncPhase::Diff);
                    self.note_parse_failures(&mut report, &fetched.parse_failures);
                    let locals = match local.local_events(calendar_url).await {
                        Ok(locals) => locals,
                        Err(err) => return fail(report, "local event read failed", err),
                    };
                    if cancel.is_cancelled() {
                        return cancelled(report);
                    }

                    // The full server list replaces the local list. A local
                    // event survives only if its uid is still on the server
                    // — or its resource failed to parse this round, in
                    // which case deleting it would destroy data we merely
                    // could not read.
                    let server_uids: HashSet<&str> = fetched
                        .events
                        .iter()
                        .map(|e| e.event.uid.as_str())
                        .collect();
                    let protected: HashSet<String> = fetched
                        .parse_failures
                        .iter()
                        .filter_map(|rh| state.uid_for_href(&rh.href).map(str::to_string))
                        .collect();
                    let delete_uids: Vec<String> = locals
                        .iter()
                        .filter(|l| {
                            !server_uids.contains(l.uid.as_str()) && !protected.contains(&l.uid)
                        })
                        .map(|l| l.uid.clone())
                        .collect();

                    let mut upserts = Vec::new();
                    for ewm in fetched.events {
                        let unchanged = previous.is_some_and(|prev| {
                            prev.url_map
                                .get(&ewm.event.uid)
                                .is_some_and(|href| *href == ewm.href)
                                && match (&ewm.etag, prev.etags.get(&ewm.href)) {
                                    (Some(new), Some(old)) => new == old,
                                    _ => false,
                                }
                        });
                        if !unchanged {
                            upserts.push(ewm);
                        }
                    }

                    let advance_token = report.parse_failures.is_empty();
                    Phase::Apply {
                        plan: ApplyPlan {
                            upserts,
                            delete_uids,
                            advance_token,
                            incremental_token: None,
                            refresh_from_server: true,
                        },
                    }
                }

                Phase::Apply { plan } => {
                    self.notify(SyncPhase::Apply);
                    match self
                        .apply_plan(&plan, &mut state, &mut report, handler, cancel)
                        .await
                    {
                        Ok(true) => Phase::Finalize { plan },
                        Ok(false) => return cancelled(report),
                        Err(err) => return fail(report, "apply failed", err),
                    }
                }

                Phase::Finalize { plan } => {
                    self.notify(SyncPhase::Finalize);
                    self.finalize(calendar_url, &plan, &mut state, &mut report)
                        .await;
                    state.last_sync = Some(Utc::now());
                    report.success = true;
                    report.new_state = Some(state);
                    return report;
                }
            };
        }
    }

    /// Feed skipped resources into the quarantine tracker and the report.
    /// Hrefs already quarantined before this run stay out of the report so
    /// a permanently broken resource cannot hold the sync token hostage.
    fn note_parse_failures(&mut self, report: &mut SyncReport, failures: &[ResourceHref]) {
        for rh in failures {
            let already_quarantined =
                self.failures.failure_count(&rh.href) >= self.options.max_parse_retries;
            let count = self.failures.record_failure(&rh.href, rh.etag.as_deref());
            if already_quarantined {
                tracing::debug!(href = %rh.href, count, "quarantined resource skipped");
            } else if !report.parse_failures.contains(&rh.href) {
                report.parse_failures.push(rh.href.clone());
            }
        }
        if !failures.is_empty() {
            report.has_errors = true;
        }
    }

    /// Map deleted hrefs to uids: first through the cursor's reverse map,
    /// then by asking the local provider.
    async fn resolve_deleted_uids(
        &self,
        state: &SyncState,
        local: &dyn LocalEventProvider,
        hrefs: &[String],
    ) -> Vec<String> {
        let mut uids = Vec::new();
        for href in hrefs {
            if let Some(uid) = state.uid_for_href(href) {
                uids.push(uid.to_string());
            } else if let Some(uid) = local.uid_for_href(href).await {
                uids.push(uid);
            } else {
                tracing::debug!(href = %href, "deleted href has no local mapping, ignoring");
            }
        }
        uids
    }

    async fn isolate_multiget(
        &mut self,
        calendar_url: &str,
        wanted: &[ResourceHref],
        result: &mut SyncResult,
        cancel: &CancellationToken,
    ) -> DavResult<bool> {
        for rh in wanted {
            if cancel.is_cancelled() {
                return Ok(false);
            }
            match self
                .client
                .fetch_events_by_href(calendar_url, &[rh.href.as_str()])
                .await
            {
                Ok(fetched) => {
                    result.added.extend(fetched.events);
                    result.parse_failures.extend(fetched.parse_failures);
                }
                Err(DavError::Parse(message)) => {
                    tracing::warn!(href = %rh.href, error = %message, "resource remains unparseable");
                    result.parse_failures.push(rh.clone());
                }
                Err(err) => return Err(err),
            }
        }
        Ok(true)
    }

    async fn apply_plan(
        &self,
        plan: &ApplyPlan,
        state: &mut SyncState,
        report: &mut SyncReport,
        handler: &mut dyn SyncResultHandler,
        cancel: &CancellationToken,
    ) -> DavResult<bool> {
        for ewm in &plan.upserts {
            if cancel.is_cancelled() {
                return Ok(false);
            }
            handler.upsert_event(&ewm.event).await?;
            if let Some(etag) = &ewm.etag {
                handler.record_etag(&ewm.event.uid, &ewm.href, etag).await?;
            }
            state.record(&ewm.event.uid, &ewm.href, ewm.etag.as_deref());
            report.upserted += 1;
        }
        for uid in &plan.delete_uids {
            if cancel.is_cancelled() {
                return Ok(false);
            }
            handler.delete_event(uid).await?;
            state.forget_uid(uid);
            report.deleted += 1;
        }
        Ok(true)
    }

    /// Advance (or deliberately retain) the cursor after a completed apply.
    async fn finalize(
        &self,
        calendar_url: &str,
        plan: &ApplyPlan,
        state: &mut SyncState,
        report: &mut SyncReport,
    ) {
        if !plan.advance_token {
            tracing::debug!(calendar = calendar_url, "retaining previous sync token");
            return;
        }
        if plan.refresh_from_server {
            match self.client.get_sync_token(calendar_url).await {
                Ok(token) => state.sync_token = token,
                Err(err) => {
                    tracing::warn!(error = %err, "could not refresh sync token");
                    report.has_errors = true;
                }
            }
        } else if let Some(token) = &plan.incremental_token {
            state.sync_token = Some(token.clone());
        }
        match self.client.get_ctag(calendar_url).await {
            Ok(ctag) => state.ctag = ctag,
            Err(err) => {
                tracing::warn!(error = %err, "could not refresh ctag");
                report.has_errors = true;
            }
        }
    }
}

fn cancelled(mut report: SyncReport) -> SyncReport {
    report.cancelled = true;
    report.success = false;
    report.new_state = None;
    report
}

fn fail(mut report: SyncReport, context: &str, err: DavError) -> SyncReport {
    tracing::error!(error = %err, "{context}");
    report.success = false;
    report.has_errors = true;
    report.new_state = None;
    report
}
