//! CalDAV XML request-body builders.
//!
//! Plain string assembly, one builder per report/propfind shape. All bodies
//! declare `DAV:` as the default namespace and bind the CalDAV and
//! CalendarServer namespaces to the `C:` and `CS:` prefixes at the root.

use chrono::{DateTime, Utc};

use crate::webdav::xml::{escape_xml, ns};

const CALDAV_TIME_FMT: &str = "%Y%m%dT%H%M%SZ";

/// Format an instant the way CalDAV `time-range` filters expect it.
pub fn format_caldav_utc(t: &DateTime<Utc>) -> String {
    t.format(CALDAV_TIME_FMT).to_string()
}

/// PROPFIND body for `current-user-principal`.
pub fn current_user_principal_body() -> String {
    r#"<propfind xmlns="DAV:"><prop><current-user-principal/></prop></propfind>"#.to_string()
}

/// PROPFIND body for `calendar-home-set`.
pub fn calendar_home_set_body() -> String {
    format!(
        r#"<propfind xmlns="DAV:" xmlns:C="{caldav}"><prop><C:calendar-home-set/></prop></propfind>"#,
        caldav = ns::CALDAV
    )
}

/// Depth-1 PROPFIND body for listing the collections under a home set.
pub fn calendar_list_body() -> String {
    format!(
        concat!(
            r#"<propfind xmlns="DAV:" xmlns:C="{caldav}" xmlns:CS="{cs}">"#,
            "<prop>",
            "<displayname/>",
            "<resourcetype/>",
            "<C:calendar-description/>",
            "<C:calendar-color/>",
            "<C:supported-calendar-component-set/>",
            "<CS:getctag/>",
            "<sync-token/>",
            "</prop>",
            "</propfind>"
        ),
        caldav = ns::CALDAV,
        cs = ns::CALENDARSERVER
    )
}

/// Depth-0 PROPFIND body for the collection CTag.
pub fn ctag_body() -> String {
    format!(
        r#"<propfind xmlns="DAV:" xmlns:CS="{cs}"><prop><CS:getctag/></prop></propfind>"#,
        cs = ns::CALENDARSERVER
    )
}

/// Depth-0 PROPFIND body for the RFC 6578 sync token.
pub fn sync_token_body() -> String {
    r#"<propfind xmlns="DAV:"><prop><sync-token/></prop></propfind>"#.to_string()
}

/// `calendar-query` REPORT body filtered to VEVENTs, optionally bounded by
/// a UTC time range. With `include_data` false the body requests ETags only
/// and carries no `calendar-data` element.
pub fn calendar_query_body(
    range: Option<(&DateTime<Utc>, &DateTime<Utc>)>,
    include_data: bool,
) -> String {
    let mut body = format!(
        r#"<C:calendar-query xmlns="DAV:" xmlns:C="{caldav}"><prop><getetag/>"#,
        caldav = ns::CALDAV
    );
    if include_data {
        body.push_str("<C:calendar-data/>");
    }
    body.push_str("</prop>");
    body.push_str(r#"<C:filter><C:comp-filter name="VCALENDAR"><C:comp-filter name="VEVENT">"#);
    if let Some((start, end)) = range {
        body.push_str(&format!(
            r#"<C:time-range start="{}" end="{}"/>"#,
            format_caldav_utc(start),
            format_caldav_utc(end)
        ));
    }
    body.push_str("</C:comp-filter></C:comp-filter></C:filter></C:calendar-query>");
    body
}

/// `calendar-multiget` REPORT body. Returns `None` when no non-empty hrefs
/// remain — callers skip the round trip entirely.
pub fn calendar_multiget_body<I, S>(hrefs: I) -> Option<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut href_xml = String::new();
    let mut total = 0usize;
    for href in hrefs {
        let href = href.as_ref();
        if href.is_empty() {
            continue;
        }
        total += 1;
        href_xml.push_str("<href>");
        href_xml.push_str(&escape_xml(href));
        href_xml.push_str("</href>");
    }
    if total == 0 {
        return None;
    }

    let mut body = format!(
        r#"<C:calendar-multiget xmlns="DAV:" xmlns:C="{caldav}"><prop><getetag/><C:calendar-data/></prop>"#,
        caldav = ns::CALDAV
    );
    body.push_str(&href_xml);
    body.push_str("</C:calendar-multiget>");
    Some(body)
}

/// RFC 6578 `sync-collection` REPORT body. An empty token (initial sync)
/// becomes a self-closing element.
pub fn sync_collection_body(sync_token: &str) -> String {
    let mut body = format!(
        r#"<sync-collection xmlns="DAV:" xmlns:C="{caldav}">"#,
        caldav = ns::CALDAV
    );
    if sync_token.is_empty() {
        body.push_str("<sync-token/>");
    } else {
        body.push_str("<sync-token>");
        body.push_str(&escape_xml(sync_token));
        body.push_str("</sync-token>");
    }
    body.push_str("<sync-level>1</sync-level>");
    body.push_str("<prop><getetag/><C:calendar-data/></prop>");
    body.push_str("</sync-collection>");
    body
}

/// `MKCALENDAR` body with a display name and optional description.
pub fn mkcalendar_body(display_name: &str, description: Option<&str>) -> String {
    let mut body = format!(
        r#"<C:mkcalendar xmlns="DAV:" xmlns:C="{caldav}"><set><prop>"#,
        caldav = ns::CALDAV
    );
    body.push_str("<displayname>");
    body.push_str(&escape_xml(display_name));
    body.push_str("</displayname>");
    if let Some(desc) = description {
        body.push_str("<C:calendar-description>");
        body.push_str(&escape_xml(desc));
        body.push_str("</C:calendar-description>");
    }
    body.push_str("</prop></set></C:mkcalendar>");
    body
}
