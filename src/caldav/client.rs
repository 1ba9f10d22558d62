//! The protocol-facing CalDAV client.
//!
//! Composes the WebDAV adapter, the XML body builders, and the iCalendar
//! codec into the operations the sync engine and push pipeline need:
//! discovery, property reads, calendar-query, calendar-multiget,
//! sync-collection, and event CRUD with ETag preconditions. Server quirks
//! are applied here, during parsing and ETag normalization — the layers
//! above see clean values only.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, Utc};

use crate::caldav::body;
use crate::caldav::types::{
    Account, CalendarInfo, EventWithMetadata, FetchedEvents, ResourceHref, SyncResult,
};
use crate::common::error::{DavError, DavResult};
use crate::common::quirks::QuirkProfile;
use crate::common::transport::HttpTransport;
use crate::ical::codec;
use crate::webdav::adapter::{DavAdapter, Precondition};
use crate::webdav::types::{Depth, Multistatus, ResponseEntry};
use crate::webdav::xml::ns;

const ICAL_CONTENT_TYPE: &str = "text/calendar; charset=utf-8";

/// Compute the canonical resource href for an event inside a calendar.
///
/// Every character outside `[A-Za-z0-9@.\-]` is replaced by `_`; inputs
/// containing `..`, slashes, or control characters are refused outright, so
/// the result is always a direct child of `calendar_url`. Deterministic and
/// idempotent.
pub fn build_event_url(calendar_url: &str, uid: &str) -> DavResult<String> {
    if uid.is_empty() {
        return Err(DavError::Argument("event uid must not be empty".into()));
    }
    if uid.contains("..")
        || uid.contains('/')
        || uid.contains('\\')
        || uid.chars().any(char::is_control)
    {
        return Err(DavError::Argument(format!("path traversal in uid {uid:?}")));
    }
    let sanitized: String = uid
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '@' | '.' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let mut href = String::with_capacity(calendar_url.len() + sanitized.len() + 5);
    href.push_str(calendar_url);
    if !href.ends_with('/') {
        href.push('/');
    }
    href.push_str(&sanitized);
    href.push_str(".ics");
    Ok(href)
}

/// CalDAV client bound to one server (base URL + quirk profile). Cheap to
/// clone; instances share the transport.
#[derive(Clone)]
pub struct CalDavClient {
    adapter: DavAdapter,
    base_url: String,
    quirks: QuirkProfile,
}

impl CalDavClient {
    pub fn new(
        base_url: impl Into<String>,
        transport: Arc<dyn HttpTransport>,
        quirks: QuirkProfile,
    ) -> Self {
        Self {
            adapter: DavAdapter::new(transport),
            base_url: base_url.into(),
            quirks,
        }
    }

    pub fn quirks(&self) -> &QuirkProfile {
        &self.quirks
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// `scheme://authority` of the base URL.
    fn origin(&self) -> &str {
        let base = self.base_url.as_str();
        if let Some(scheme_end) = base.find("://") {
            let rest = &base[scheme_end + 3..];
            match rest.find('/') {
                Some(i) => &base[..scheme_end + 3 + i],
                None => base,
            }
        } else {
            base
        }
    }

    /// Resolve a server-relative or absolute href against the base URL.
    pub fn resolve(&self, href: &str) -> String {
        if href.starts_with("http://") || href.starts_with("https://") {
            return href.to_string();
        }
        if href.starts_with('/') {
            return format!("{}{}", self.origin(), href);
        }
        let mut url = self.base_url.trim_end_matches('/').to_string();
        url.push('/');
        url.push_str(href);
        url
    }

    fn normalize_etag_opt(&self, raw: Option<&str>) -> Option<String> {
        raw.map(|etag| self.quirks.normalize_etag(etag))
    }

    fn entry_etag(&self, entry: &ResponseEntry) -> Option<String> {
        entry
            .prop(ns::DAV, "getetag", &self.quirks)
            .and_then(|v| v.text_opt())
            .map(|etag| self.quirks.normalize_etag(etag))
    }

    // ----------- discovery -----------

    /// Three-step account discovery: principal, calendar home, calendars.
    ///
    /// The well-known entry point is tried first; servers that do not
    /// support it fall back to the configured base URL.
    pub async fn discover_account(&self) -> DavResult<Account> {
        let well_known = format!("{}/.well-known/caldav", self.origin());
        let principal = match self.principal_at(&well_known).await {
            Ok(Some(found)) => Some(found),
            Ok(None) => None,
            Err(err) => {
                tracing::debug!(error = %err, "well-known discovery failed, using base URL");
                None
            }
        };
        let principal = match principal {
            Some(found) => found,
            None => self
                .principal_at(&self.base_url)
                .await?
                .ok_or_else(|| {
                    DavError::Parse("server did not advertise current-user-principal".into())
                })?,
        };

        let home_set_url = self.calendar_home_set(&principal).await?;
        let calendars = self.list_calendars(&home_set_url).await?;

        Ok(Account {
            principal_url: principal,
            home_set_url,
            calendars,
        })
    }

    async fn principal_at(&self, url: &str) -> DavResult<Option<String>> {
        let ms = self
            .adapter
            .propfind(
                &self.resolve(url),
                Depth::Zero,
                body::current_user_principal_body(),
                &self.quirks,
            )
            .await?;
        Ok(ms.responses.iter().find_map(|entry| {
            entry
                .prop(ns::DAV, "current-user-principal", &self.quirks)
                .and_then(|v| v.hrefs.iter().find(|h| !h.is_empty()).cloned())
        }))
    }

    async fn calendar_home_set(&self, principal_url: &str) -> DavResult<String> {
        let ms = self
            .adapter
            .propfind(
                &self.resolve(principal_url),
                Depth::Zero,
                body::calendar_home_set_body(),
                &self.quirks,
            )
            .await?;
        ms.responses
            .iter()
            .find_map(|entry| {
                entry
                    .prop(ns::CALDAV, "calendar-home-set", &self.quirks)
                    .and_then(|v| v.hrefs.iter().find(|h| !h.is_empty()).cloned())
            })
            .ok_or_else(|| DavError::Parse("server did not advertise calendar-home-set".into()))
    }

    /// List the calendar collections under a home set (`Depth: 1`).
    pub async fn list_calendars(&self, home_set_url: &str) -> DavResult<Vec<CalendarInfo>> {
        let ms = self
            .adapter
            .propfind(
                &self.resolve(home_set_url),
                Depth::One,
                body::calendar_list_body(),
                &self.quirks,
            )
            .await?;

        let q = &self.quirks;
        let mut calendars = Vec::new();
        for entry in &ms.responses {
            let Some(resourcetype) = entry.prop(ns::DAV, "resourcetype", q) else {
                continue;
            };
            if !resourcetype.has_child(ns::CALDAV, "calendar", q.dav_namespace_lenient) {
                continue;
            }
            let text_of = |target_ns: &str, local: &str| {
                entry
                    .prop(target_ns, local, q)
                    .and_then(|v| v.text_opt())
                    .map(str::to_string)
            };
            calendars.push(CalendarInfo {
                href: entry.href.clone(),
                display_name: text_of(ns::DAV, "displayname"),
                description: text_of(ns::CALDAV, "calendar-description"),
                color: text_of(ns::CALDAV, "calendar-color"),
                ctag: text_of(ns::CALENDARSERVER, "getctag"),
                sync_token: text_of(ns::DAV, "sync-token"),
                supported_components: entry
                    .prop(ns::CALDAV, "supported-calendar-component-set", q)
                    .map(|v| v.components.clone())
                    .unwrap_or_default(),
            });
        }
        calendars.sort_by(|a, b| a.href.cmp(&b.href));
        Ok(calendars)
    }

    // ----------- property reads -----------

    /// Read the collection CTag. A missing property is `Ok(None)`.
    pub async fn get_ctag(&self, calendar_url: &str) -> DavResult<Option<String>> {
        let ms = self
            .adapter
            .propfind(
                &self.resolve(calendar_url),
                Depth::Zero,
                body::ctag_body(),
                &self.quirks,
            )
            .await?;
        Ok(self.first_prop_text(&ms, ns::CALENDARSERVER, "getctag"))
    }

    /// Read the RFC 6578 sync token. A missing property is `Ok(None)`.
    pub async fn get_sync_token(&self, calendar_url: &str) -> DavResult<Option<String>> {
        let ms = self
            .adapter
            .propfind(
                &self.resolve(calendar_url),
                Depth::Zero,
                body::sync_token_body(),
                &self.quirks,
            )
            .await?;
        Ok(self.first_prop_text(&ms, ns::DAV, "sync-token"))
    }

    fn first_prop_text(&self, ms: &Multistatus, target_ns: &str, local: &str) -> Option<String> {
        ms.responses.iter().find_map(|entry| {
            entry
                .prop(target_ns, local, &self.quirks)
                .and_then(|v| v.text_opt())
                .map(str::to_string)
        })
    }

    // ----------- reports -----------

    /// Fetch events via `calendar-query`, optionally bounded by a UTC time
    /// range. Unparseable resources are logged, skipped, and reported in
    /// `parse_failures`; they never fail the batch.
    pub async fn fetch_events(
        &self,
        calendar_url: &str,
        range: Option<(&DateTime<Utc>, &DateTime<Utc>)>,
    ) -> DavResult<FetchedEvents> {
        let ms = self
            .adapter
            .report(
                &self.resolve(calendar_url),
                Depth::One,
                body::calendar_query_body(range, true),
                &self.quirks,
            )
            .await?;
        Ok(self.collect_events(&ms))
    }

    /// ETag-only `calendar-query` over a time range. The request body never
    /// asks for `calendar-data`.
    pub async fn fetch_etags_in_range(
        &self,
        calendar_url: &str,
        start: &DateTime<Utc>,
        end: &DateTime<Utc>,
    ) -> DavResult<Vec<ResourceHref>> {
        let ms = self
            .adapter
            .report(
                &self.resolve(calendar_url),
                Depth::One,
                body::calendar_query_body(Some((start, end)), false),
                &self.quirks,
            )
            .await?;
        Ok(ms
            .responses
            .iter()
            .filter(|entry| !entry.is_gone() && !entry.href.is_empty())
            .filter_map(|entry| {
                self.entry_etag(entry)
                    .map(|etag| ResourceHref::new(entry.href.clone(), Some(etag)))
            })
            .collect())
    }

    /// Materialize specific resources via `calendar-multiget`. An empty
    /// href list returns immediately without a network call; per-href 404
    /// entries are silently dropped.
    pub async fn fetch_events_by_href<S: AsRef<str>>(
        &self,
        calendar_url: &str,
        hrefs: &[S],
    ) -> DavResult<FetchedEvents> {
        let Some(request_body) = body::calendar_multiget_body(hrefs.iter().map(AsRef::as_ref))
        else {
            return Ok(FetchedEvents::default());
        };
        let ms = self
            .adapter
            .report(
                &self.resolve(calendar_url),
                Depth::One,
                request_body,
                &self.quirks,
            )
            .await?;
        Ok(self.collect_events(&ms))
    }

    fn collect_events(&self, ms: &Multistatus) -> FetchedEvents {
        let mut out = FetchedEvents::default();
        for entry in &ms.responses {
            if entry.href.is_empty() || entry.is_gone() {
                continue;
            }
            let Some(data) = entry.prop(ns::CALDAV, "calendar-data", &self.quirks) else {
                continue;
            };
            let etag = self.entry_etag(entry);
            match codec::parse(&data.text) {
                Ok(events) => {
                    for event in events {
                        out.events.push(EventWithMetadata {
                            href: entry.href.clone(),
                            etag: etag.clone(),
                            event,
                        });
                    }
                }
                Err(err) => {
                    tracing::warn!(href = %entry.href, error = %err, "skipping unparseable calendar resource");
                    out.parse_failures
                        .push(ResourceHref::new(entry.href.clone(), etag));
                }
            }
        }
        out
    }

    /// Run an RFC 6578 `sync-collection` report. Pass the previous token,
    /// or an empty string on initial sync. Expired tokens surface as
    /// `Http { code: 403 | 410, .. }`.
    pub async fn sync_collection(
        &self,
        calendar_url: &str,
        sync_token: &str,
    ) -> DavResult<SyncResult> {
        let ms = self
            .adapter
            .report(
                &self.resolve(calendar_url),
                Depth::One,
                body::sync_collection_body(sync_token),
                &self.quirks,
            )
            .await?;

        let mut result = SyncResult {
            new_sync_token: ms.sync_token.clone(),
            ..SyncResult::default()
        };
        // iCloud has been observed emitting the same href twice; the last
        // occurrence wins.
        let mut added_href_index: HashMap<String, usize> = HashMap::new();

        for entry in &ms.responses {
            let href = entry.href.clone();
            if href.is_empty() {
                continue;
            }
            if entry.is_gone() {
                if !result.deleted.contains(&href) {
                    result.deleted.push(href);
                }
                continue;
            }

            let etag = self.entry_etag(entry);
            let data = entry
                .prop(ns::CALDAV, "calendar-data", &self.quirks)
                .and_then(|v| v.text_opt());

            if let Some(text) = data {
                match codec::parse(text) {
                    Ok(events) => {
                        result.added.retain(|existing| existing.href != href);
                        for event in events {
                            result.added.push(EventWithMetadata {
                                href: href.clone(),
                                etag: etag.clone(),
                                event,
                            });
                        }
                    }
                    Err(err) => {
                        tracing::warn!(href = %href, error = %err, "skipping unparseable sync entry");
                        result.parse_failures.push(ResourceHref::new(href, etag));
                    }
                }
            } else if let Some(etag) = etag {
                match added_href_index.get(&href) {
                    Some(&i) => result.added_hrefs[i].etag = Some(etag),
                    None => {
                        added_href_index.insert(href.clone(), result.added_hrefs.len());
                        result.added_hrefs.push(ResourceHref::new(href, Some(etag)));
                    }
                }
            }
            // Entries with neither status nor ETag nor data describe the
            // collection itself; nothing to do.
        }

        Ok(result)
    }

    // ----------- event CRUD -----------

    /// Create an event with `If-None-Match: *`. A 412 means the resource
    /// already exists. Returns the computed href and the new ETag, when the
    /// server provided one.
    pub async fn create_event(
        &self,
        calendar_url: &str,
        event: &crate::ical::model::Event,
    ) -> DavResult<(String, Option<String>)> {
        event.validate()?;
        let href = build_event_url(calendar_url, &event.uid)?;
        let payload = codec::generate(event);
        let outcome = self
            .adapter
            .put(
                &self.resolve(&href),
                Bytes::from(payload),
                ICAL_CONTENT_TYPE,
                Precondition::IfNoneMatchAny,
            )
            .await?;
        Ok((href, self.normalize_etag_opt(outcome.etag.as_deref())))
    }

    /// Update an event, guarded by `If-Match` when an ETag is supplied. A
    /// 412 means the server-side copy moved on.
    pub async fn update_event(
        &self,
        href: &str,
        event: &crate::ical::model::Event,
        etag: Option<&str>,
    ) -> DavResult<Option<String>> {
        event.validate()?;
        let payload = codec::generate(event);
        let precondition = match etag {
            Some(tag) => Precondition::IfMatch(tag),
            None => Precondition::None,
        };
        let outcome = self
            .adapter
            .put(
                &self.resolve(href),
                Bytes::from(payload),
                ICAL_CONTENT_TYPE,
                precondition,
            )
            .await?;
        Ok(self.normalize_etag_opt(outcome.etag.as_deref()))
    }

    /// Delete a resource, optionally guarded by `If-Match`.
    pub async fn delete_event(&self, href: &str, etag: Option<&str>) -> DavResult<()> {
        self.adapter.delete(&self.resolve(href), etag).await
    }

    /// Fetch one resource by href. `Ok(None)` on 404. When the resource
    /// holds several VEVENTs, the master (no recurrence-id) is returned.
    pub async fn get_event(&self, href: &str) -> DavResult<Option<EventWithMetadata>> {
        let Some(resp) = self.adapter.get(&self.resolve(href)).await? else {
            return Ok(None);
        };
        let etag = self.normalize_etag_opt(resp.etag().as_deref());
        let text = resp.body_text();
        let events =
            codec::parse(&text).map_err(|e| DavError::Parse(format!("{href}: {e}")))?;
        let primary = events
            .iter()
            .position(|e| e.recurrence_id.is_none())
            .unwrap_or(0);
        Ok(events.into_iter().nth(primary).map(|event| EventWithMetadata {
            href: href.to_string(),
            etag,
            event,
        }))
    }

    /// Bounded backoff loop confirming that a freshly written resource is
    /// readable, for providers that declare eventual consistency. Base
    /// 100 ms, doubling per attempt. A resource that never turns up is
    /// `Ok(false)`, not an error.
    pub async fn await_visibility(&self, href: &str) -> DavResult<bool> {
        let retries = self.quirks.post_write_read_retries;
        if retries == 0 {
            return Ok(true);
        }
        let mut delay = Duration::from_millis(100);
        for attempt in 0..retries {
            match self.get_event(href).await {
                Ok(Some(_)) => return Ok(true),
                // A parse failure still proves the resource is there.
                Err(DavError::Parse(_)) => return Ok(true),
                Ok(None) => {}
                Err(err) if err.is_transient() => {
                    tracing::debug!(href, attempt, error = %err, "visibility probe failed");
                }
                Err(err) => return Err(err),
            }
            tokio::time::sleep(delay).await;
            delay *= 2;
        }
        tracing::debug!(href, "resource not yet visible after write");
        Ok(false)
    }

    /// Create a calendar collection via `MKCALENDAR`.
    pub async fn create_calendar(
        &self,
        calendar_url: &str,
        display_name: &str,
        description: Option<&str>,
    ) -> DavResult<()> {
        self.adapter
            .mkcalendar(
                &self.resolve(calendar_url),
                body::mkcalendar_body(display_name, description),
            )
            .await
    }
}
