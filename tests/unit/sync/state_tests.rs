use caldav_sync_rs::sync::{FailureTracker, SyncState};

#[test]
fn record_keeps_etags_and_url_map_consistent() {
    let mut state = SyncState::new("/cal/");
    state.record("u1", "/cal/u1.ics", Some("e1"));
    state.record("u2", "/cal/u2.ics", Some("e2"));

    assert_eq!(state.uid_for_href("/cal/u1.ics"), Some("u1"));
    assert_eq!(state.etags.get("/cal/u1.ics").map(String::as_str), Some("e1"));

    // Every href in etags has a url_map entry pointing at it.
    for (uid, href) in &state.url_map {
        assert!(state.etags.contains_key(href), "no etag for {uid}");
    }

    state.forget_uid("u1");
    assert_eq!(state.uid_for_href("/cal/u1.ics"), None);
    assert!(!state.etags.contains_key("/cal/u1.ics"));
    assert!(state.etags.contains_key("/cal/u2.ics"));
}

#[test]
fn recording_without_etag_clears_a_stale_entry() {
    let mut state = SyncState::new("/cal/");
    state.record("u1", "/cal/u1.ics", Some("e1"));
    state.record("u1", "/cal/u1.ics", None);
    assert!(!state.etags.contains_key("/cal/u1.ics"));
    assert_eq!(state.uid_for_href("/cal/u1.ics"), Some("u1"));
}

#[test]
fn tracker_quarantines_after_the_threshold() {
    let mut tracker = FailureTracker::default();
    assert!(!tracker.is_quarantined("/cal/bad.ics", Some("e1"), 3));

    tracker.record_failure("/cal/bad.ics", Some("e1"));
    tracker.record_failure("/cal/bad.ics", Some("e1"));
    assert!(!tracker.is_quarantined("/cal/bad.ics", Some("e1"), 3));

    tracker.record_failure("/cal/bad.ics", Some("e1"));
    assert!(tracker.is_quarantined("/cal/bad.ics", Some("e1"), 3));
}

#[test]
fn etag_change_lifts_the_quarantine() {
    let mut tracker = FailureTracker::default();
    for _ in 0..3 {
        tracker.record_failure("/cal/bad.ics", Some("e1"));
    }
    assert!(tracker.is_quarantined("/cal/bad.ics", Some("e1"), 3));

    // The server-side resource changed; give it another chance.
    assert!(!tracker.is_quarantined("/cal/bad.ics", Some("e2"), 3));
    assert_eq!(tracker.failure_count("/cal/bad.ics"), 0);
}

#[test]
fn explicit_clear_resets_the_tracker() {
    let mut tracker = FailureTracker::default();
    for _ in 0..3 {
        tracker.record_failure("/cal/bad.ics", Some("e1"));
        tracker.record_failure("/cal/worse.ics", None);
    }
    tracker.clear("/cal/bad.ics");
    assert!(!tracker.is_quarantined("/cal/bad.ics", Some("e1"), 3));
    assert!(tracker.is_quarantined("/cal/worse.ics", None, 3));

    tracker.clear_all();
    assert!(!tracker.is_quarantined("/cal/worse.ics", None, 3));
}
