use caldav_sync_rs::caldav::body::{
    calendar_multiget_body, calendar_query_body, mkcalendar_body, sync_collection_body,
};
use chrono::{TimeZone, Utc};

#[test]
fn calendar_query_includes_time_range_and_data() {
    let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    let end = Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap();

    let body = calendar_query_body(Some((&start, &end)), true);
    assert!(body.contains(r#"xmlns="DAV:""#));
    assert!(body.contains(r#"xmlns:C="urn:ietf:params:xml:ns:caldav""#));
    assert!(body.contains("<getetag/>"));
    assert!(body.contains("<C:calendar-data/>"));
    assert!(body.contains(r#"<C:comp-filter name="VCALENDAR">"#));
    assert!(body.contains(r#"<C:comp-filter name="VEVENT">"#));
    assert!(body.contains(r#"start="20240101T000000Z""#));
    assert!(body.contains(r#"end="20240201T000000Z""#));
}

#[test]
fn etag_only_query_never_requests_calendar_data() {
    let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    let end = Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap();

    let body = calendar_query_body(Some((&start, &end)), false);
    assert!(body.contains("<getetag/>"));
    assert!(!body.contains("calendar-data"));
}

#[test]
fn query_without_range_has_no_time_range_element() {
    let body = calendar_query_body(None, true);
    assert!(!body.contains("time-range"));
}

#[test]
fn multiget_lists_and_escapes_hrefs() {
    let body = calendar_multiget_body(["/cal/a.ics", "/cal/b&c.ics", ""]).expect("non-empty");
    assert!(body.contains("<href>/cal/a.ics</href>"));
    assert!(body.contains("<href>/cal/b&amp;c.ics</href>"));
    assert!(body.contains("<C:calendar-data/>"));
}

#[test]
fn multiget_with_no_hrefs_is_none() {
    assert!(calendar_multiget_body(Vec::<String>::new()).is_none());
    assert!(calendar_multiget_body([""]).is_none());
}

#[test]
fn sync_collection_body_handles_initial_and_resumed_tokens() {
    let initial = sync_collection_body("");
    assert!(initial.contains("<sync-token/>"));
    assert!(initial.contains("<sync-level>1</sync-level>"));
    assert!(initial.contains("<getetag/>"));
    assert!(initial.contains("<C:calendar-data/>"));

    let resumed = sync_collection_body("http://example.com/sync?a=1&b=2");
    assert!(resumed.contains("<sync-token>http://example.com/sync?a=1&amp;b=2</sync-token>"));
}

#[test]
fn mkcalendar_body_carries_display_name_and_description() {
    let body = mkcalendar_body("Family <3", Some("kids & school"));
    assert!(body.contains("<displayname>Family &lt;3</displayname>"));
    assert!(body.contains("<C:calendar-description>kids &amp; school</C:calendar-description>"));

    let bare = mkcalendar_body("Work", None);
    assert!(!bare.contains("calendar-description"));
}
