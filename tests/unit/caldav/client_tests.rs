use std::sync::Arc;

use caldav_sync_rs::caldav::CalDavClient;
use caldav_sync_rs::common::QuirkProfile;

use crate::util::{MockTransport, multistatus, request_body, sample_ics, status};

fn client_with(quirks: QuirkProfile) -> (Arc<MockTransport>, CalDavClient) {
    let transport = Arc::new(MockTransport::new());
    let client = CalDavClient::new("https://cal.example.com/u1/", transport.clone(), quirks);
    (transport, client)
}

#[tokio::test]
async fn get_ctag_reads_the_calendarserver_property() {
    let (transport, client) = client_with(QuirkProfile::rfc_strict());
    transport.push_response(multistatus(
        r#"<D:multistatus xmlns:D="DAV:" xmlns:CS="http://calendarserver.org/ns/">
  <D:response>
    <D:href>/u1/personal/</D:href>
    <D:propstat>
      <D:prop><CS:getctag>ctag-1</CS:getctag></D:prop>
      <D:status>HTTP/1.1 200 OK</D:status>
    </D:propstat>
  </D:response>
</D:multistatus>"#,
    ));

    let ctag = client.get_ctag("/u1/personal/").await.expect("propfind ok");
    assert_eq!(ctag.as_deref(), Some("ctag-1"));

    let requests = transport.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].method.as_str(), "PROPFIND");
    assert_eq!(requests[0].url, "https://cal.example.com/u1/personal/");
    assert_eq!(requests[0].header("depth"), Some("0"));
    assert!(request_body(&requests[0]).contains("CS:getctag"));
}

#[tokio::test]
async fn missing_sync_token_property_is_none_not_an_error() {
    let (transport, client) = client_with(QuirkProfile::rfc_strict());
    transport.push_response(multistatus(
        r#"<D:multistatus xmlns:D="DAV:">
  <D:response>
    <D:href>/u1/personal/</D:href>
    <D:propstat>
      <D:prop><D:sync-token/></D:prop>
      <D:status>HTTP/1.1 404 Not Found</D:status>
    </D:propstat>
  </D:response>
</D:multistatus>"#,
    ));

    let token = client
        .get_sync_token("/u1/personal/")
        .await
        .expect("propfind ok");
    assert_eq!(token, None);
}

#[tokio::test]
async fn fetch_etags_never_requests_calendar_data_and_unquotes_etags() {
    let (transport, client) = client_with(QuirkProfile::icloud());
    transport.push_response(multistatus(
        r#"<D:multistatus xmlns:D="DAV:">
  <D:response>
    <D:href>/u1/personal/e1.ics</D:href>
    <D:propstat>
      <D:prop><D:getetag>"etag-1"</D:getetag></D:prop>
      <D:status>HTTP/1.1 200 OK</D:status>
    </D:propstat>
  </D:response>
</D:multistatus>"#,
    ));

    let start = chrono::Utc::now() - chrono::Duration::days(7);
    let end = chrono::Utc::now();
    let etags = client
        .fetch_etags_in_range("/u1/personal/", &start, &end)
        .await
        .expect("report ok");

    assert_eq!(etags.len(), 1);
    assert_eq!(etags[0].href, "/u1/personal/e1.ics");
    assert_eq!(etags[0].etag.as_deref(), Some("etag-1"));

    let body = request_body(&transport.requests()[0]);
    assert!(!body.contains("calendar-data"));
}

#[tokio::test]
async fn multiget_with_no_hrefs_makes_no_network_call() {
    let (transport, client) = client_with(QuirkProfile::rfc_strict());
    let fetched = client
        .fetch_events_by_href::<&str>("/u1/personal/", &[])
        .await
        .expect("no-op");
    assert!(fetched.events.is_empty());
    assert!(transport.requests().is_empty());
}

#[tokio::test]
async fn multiget_drops_per_href_404_entries() {
    let (transport, client) = client_with(QuirkProfile::rfc_strict());
    let ics = sample_ics("e1@x", "Kept");
    transport.push_response(multistatus(&format!(
        r#"<D:multistatus xmlns:D="DAV:" xmlns:C="urn:ietf:params:xml:ns:caldav">
  <D:response>
    <D:href>/u1/personal/e1.ics</D:href>
    <D:propstat>
      <D:prop><D:getetag>"a"</D:getetag><C:calendar-data>{ics}</C:calendar-data></D:prop>
      <D:status>HTTP/1.1 200 OK</D:status>
    </D:propstat>
  </D:response>
  <D:response>
    <D:href>/u1/personal/gone.ics</D:href>
    <D:status>HTTP/1.1 404 Not Found</D:status>
  </D:response>
</D:multistatus>"#
    )));

    let fetched = client
        .fetch_events_by_href("/u1/personal/", &["/u1/personal/e1.ics", "/u1/personal/gone.ics"])
        .await
        .expect("report ok");

    assert_eq!(fetched.events.len(), 1);
    assert_eq!(fetched.events[0].event.uid, "e1@x");
    assert!(fetched.parse_failures.is_empty());
}

#[tokio::test]
async fn sync_collection_classifies_and_deduplicates_entries() {
    let (transport, client) = client_with(QuirkProfile::icloud());
    let ics = sample_ics("inline@x", "Inline");
    transport.push_response(multistatus(&format!(
        r#"<D:multistatus xmlns:D="DAV:" xmlns:C="urn:ietf:params:xml:ns:caldav">
  <D:sync-token>tok-2</D:sync-token>
  <D:response>
    <D:href>/cal/e1.ics</D:href>
    <D:propstat>
      <D:prop><D:getetag>"a1"</D:getetag></D:prop>
      <D:status>HTTP/1.1 200 OK</D:status>
    </D:propstat>
  </D:response>
  <D:response>
    <D:href>/cal/e1.ics</D:href>
    <D:propstat>
      <D:prop><D:getetag>"a1"</D:getetag></D:prop>
      <D:status>HTTP/1.1 200 OK</D:status>
    </D:propstat>
  </D:response>
  <D:response>
    <D:href>/cal/e2.ics</D:href>
    <D:propstat>
      <D:prop><D:getetag>"b2"</D:getetag></D:prop>
      <D:status>HTTP/1.1 200 OK</D:status>
    </D:propstat>
  </D:response>
  <D:response>
    <D:href>/cal/gone.ics</D:href>
    <D:status>HTTP/1.1 410 Gone</D:status>
  </D:response>
  <D:response>
    <D:href>/cal/inline.ics</D:href>
    <D:propstat>
      <D:prop><D:getetag>"c3"</D:getetag><C:calendar-data>{ics}</C:calendar-data></D:prop>
      <D:status>HTTP/1.1 200 OK</D:status>
    </D:propstat>
  </D:response>
</D:multistatus>"#
    )));

    let result = client
        .sync_collection("/cal/", "tok-1")
        .await
        .expect("report ok");

    assert_eq!(result.new_sync_token.as_deref(), Some("tok-2"));
    // Duplicate /cal/e1.ics collapses to a single entry.
    assert_eq!(result.added_hrefs.len(), 2);
    assert_eq!(result.added_hrefs[0].href, "/cal/e1.ics");
    assert_eq!(result.added_hrefs[0].etag.as_deref(), Some("a1"));
    assert_eq!(result.added_hrefs[1].href, "/cal/e2.ics");
    assert_eq!(result.deleted, vec!["/cal/gone.ics"]);
    assert_eq!(result.added.len(), 1);
    assert_eq!(result.added[0].event.uid, "inline@x");
    assert_eq!(result.added[0].etag.as_deref(), Some("c3"));

    let body = request_body(&transport.requests()[0]);
    assert!(body.contains("<sync-token>tok-1</sync-token>"));
}

#[tokio::test]
async fn create_event_puts_with_if_none_match() {
    let (transport, client) = client_with(QuirkProfile::icloud());
    transport.push_response(status(201).with_header("etag", "\"fresh-1\""));

    let event = crate::util::sample_event("new@x");
    let (href, etag) = client
        .create_event("/u1/personal/", &event)
        .await
        .expect("create ok");

    assert_eq!(href, "/u1/personal/new@x.ics");
    assert_eq!(etag.as_deref(), Some("fresh-1"));

    let requests = transport.requests();
    assert_eq!(requests[0].method.as_str(), "PUT");
    assert_eq!(requests[0].header("if-none-match"), Some("*"));
    assert_eq!(
        requests[0].header("content-type"),
        Some("text/calendar; charset=utf-8")
    );
    assert!(request_body(&requests[0]).contains("UID:new@x"));
}

#[tokio::test]
async fn update_event_quotes_bare_etags_in_if_match() {
    let (transport, client) = client_with(QuirkProfile::icloud());
    transport.push_response(status(204).with_header("etag", "\"fresh-2\""));

    let event = crate::util::sample_event("upd@x");
    let etag = client
        .update_event("/u1/personal/upd@x.ics", &event, Some("old-etag"))
        .await
        .expect("update ok");

    assert_eq!(etag.as_deref(), Some("fresh-2"));
    assert_eq!(
        transport.requests()[0].header("if-match"),
        Some("\"old-etag\"")
    );
}

#[tokio::test]
async fn oversized_responses_are_refused_before_parsing() {
    let (transport, client) = client_with(QuirkProfile::rfc_strict());
    let huge = vec![b' '; 10 * 1024 * 1024 + 1];
    transport.push_response(status(207).with_body(huge));

    let err = client
        .get_ctag("/u1/personal/")
        .await
        .expect_err("oversized body must be refused");
    match err {
        caldav_sync_rs::common::DavError::Http { code, message, .. } => {
            assert_eq!(code, 0);
            assert!(message.contains("too large"));
        }
        other => panic!("expected Http error, got {other:?}"),
    }
}

#[tokio::test]
async fn conflicting_update_surfaces_as_http_412() {
    let (transport, client) = client_with(QuirkProfile::rfc_strict());
    transport.push_response(status(412));

    let event = crate::util::sample_event("c@x");
    let err = client
        .update_event("/u1/personal/c@x.ics", &event, Some("\"stale\""))
        .await
        .expect_err("precondition must fail");
    assert!(err.is_conflict());
}

#[tokio::test]
async fn discover_account_walks_principal_home_and_calendars() {
    let (transport, client) = client_with(QuirkProfile::rfc_strict());

    // The well-known probe is allowed to fail.
    transport.push_response(status(404));
    transport.push_response(multistatus(
        r#"<D:multistatus xmlns:D="DAV:">
  <D:response>
    <D:href>/u1/</D:href>
    <D:propstat>
      <D:prop>
        <D:current-user-principal><D:href>/principals/u1/</D:href></D:current-user-principal>
      </D:prop>
      <D:status>HTTP/1.1 200 OK</D:status>
    </D:propstat>
  </D:response>
</D:multistatus>"#,
    ));
    transport.push_response(multistatus(
        r#"<D:multistatus xmlns:D="DAV:" xmlns:C="urn:ietf:params:xml:ns:caldav">
  <D:response>
    <D:href>/principals/u1/</D:href>
    <D:propstat>
      <D:prop>
        <C:calendar-home-set><D:href>/cal/u1/</D:href></C:calendar-home-set>
      </D:prop>
      <D:status>HTTP/1.1 200 OK</D:status>
    </D:propstat>
  </D:response>
</D:multistatus>"#,
    ));
    transport.push_response(multistatus(
        r#"<D:multistatus xmlns:D="DAV:" xmlns:C="urn:ietf:params:xml:ns:caldav" xmlns:CS="http://calendarserver.org/ns/">
  <D:response>
    <D:href>/cal/u1/</D:href>
    <D:propstat>
      <D:prop><D:resourcetype><D:collection/></D:resourcetype></D:prop>
      <D:status>HTTP/1.1 200 OK</D:status>
    </D:propstat>
  </D:response>
  <D:response>
    <D:href>/cal/u1/work/</D:href>
    <D:propstat>
      <D:prop>
        <D:displayname>Work</D:displayname>
        <D:resourcetype><D:collection/><C:calendar/></D:resourcetype>
        <C:calendar-color>#FF0000</C:calendar-color>
        <C:supported-calendar-component-set><C:comp name="VEVENT"/></C:supported-calendar-component-set>
        <CS:getctag>ctag-9</CS:getctag>
        <D:sync-token>tok-9</D:sync-token>
      </D:prop>
      <D:status>HTTP/1.1 200 OK</D:status>
    </D:propstat>
  </D:response>
</D:multistatus>"#,
    ));

    let account = client.discover_account().await.expect("discovery ok");
    assert_eq!(account.principal_url, "/principals/u1/");
    assert_eq!(account.home_set_url, "/cal/u1/");
    assert_eq!(account.calendars.len(), 1);

    let calendar = &account.calendars[0];
    assert_eq!(calendar.href, "/cal/u1/work/");
    assert_eq!(calendar.display_name.as_deref(), Some("Work"));
    assert_eq!(calendar.color.as_deref(), Some("#FF0000"));
    assert_eq!(calendar.ctag.as_deref(), Some("ctag-9"));
    assert_eq!(calendar.sync_token.as_deref(), Some("tok-9"));
    assert_eq!(calendar.supported_components, vec!["VEVENT"]);

    let requests = transport.requests();
    assert_eq!(requests.len(), 4);
    assert_eq!(requests[0].url, "https://cal.example.com/.well-known/caldav");
    assert_eq!(requests[3].header("depth"), Some("1"));
}
