use caldav_sync_rs::ical::codec::{generate, parse};
use caldav_sync_rs::ical::{
    Alarm, CalAddress, CalDateTime, Event, EventStatus, IcalError, Property, Transparency,
};
use chrono::{NaiveDate, TimeZone, Utc};

fn parse_one(text: &str) -> Event {
    let mut events = parse(text).expect("parse succeeds");
    assert_eq!(events.len(), 1, "expected exactly one event");
    events.remove(0)
}

#[test]
fn parses_a_basic_event() {
    let ics = "BEGIN:VCALENDAR\r\n\
VERSION:2.0\r\n\
PRODID:-//Test//Test//EN\r\n\
BEGIN:VEVENT\r\n\
UID:test-123\r\n\
DTSTAMP:20240101T090000Z\r\n\
DTSTART:20240101T100000Z\r\n\
DTEND:20240101T110000Z\r\n\
SUMMARY:Test Event\r\n\
DESCRIPTION:Test Description\r\n\
LOCATION:Test Location\r\n\
STATUS:CONFIRMED\r\n\
TRANSP:OPAQUE\r\n\
SEQUENCE:3\r\n\
END:VEVENT\r\n\
END:VCALENDAR\r\n";

    let event = parse_one(ics);
    assert_eq!(event.uid, "test-123");
    assert_eq!(event.summary.as_deref(), Some("Test Event"));
    assert_eq!(event.description.as_deref(), Some("Test Description"));
    assert_eq!(event.location.as_deref(), Some("Test Location"));
    assert_eq!(event.status, Some(EventStatus::Confirmed));
    assert_eq!(event.transparency, Some(Transparency::Opaque));
    assert_eq!(event.sequence, 3);
    assert_eq!(
        event.dtstart,
        Some(CalDateTime::Utc(
            Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap()
        ))
    );
    assert!(!event.is_all_day());
    assert_eq!(
        event.dtstamp,
        Some(Utc.with_ymd_and_hms(2024, 1, 1, 9, 0, 0).unwrap())
    );
}

#[test]
fn parses_all_day_and_timezone_forms() {
    let ics = "BEGIN:VCALENDAR\r\n\
BEGIN:VEVENT\r\n\
UID:allday@x\r\n\
DTSTART;VALUE=DATE:20240101\r\n\
DTEND;VALUE=DATE:20240102\r\n\
END:VEVENT\r\n\
BEGIN:VEVENT\r\n\
UID:zoned@x\r\n\
DTSTART;TZID=America/New_York:20240101T100000\r\n\
DTEND;TZID=America/New_York:20240101T110000\r\n\
END:VEVENT\r\n\
BEGIN:VEVENT\r\n\
UID:floating@x\r\n\
DTSTART:20240101T100000\r\n\
DTEND:20240101T110000\r\n\
END:VEVENT\r\n\
END:VCALENDAR\r\n";

    let events = parse(ics).expect("parse succeeds");
    assert_eq!(events.len(), 3);

    assert!(events[0].is_all_day());
    assert_eq!(
        events[0].dtstart,
        Some(CalDateTime::Date(
            NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()
        ))
    );

    match &events[1].dtstart {
        Some(CalDateTime::Zoned { tzid, .. }) => assert_eq!(tzid, "America/New_York"),
        other => panic!("expected zoned dtstart, got {other:?}"),
    }

    assert!(matches!(
        events[2].dtstart,
        Some(CalDateTime::Floating(_))
    ));
}

#[test]
fn unescapes_text_and_splits_categories() {
    let ics = "BEGIN:VCALENDAR\r\n\
BEGIN:VEVENT\r\n\
UID:esc@x\r\n\
DTSTART:20240101T100000Z\r\n\
DTEND:20240101T110000Z\r\n\
SUMMARY:Lunch\\, then planning\\nwith the team\r\n\
CATEGORIES:Work,Food \\& Drink\r\n\
END:VEVENT\r\n\
END:VCALENDAR\r\n";

    let event = parse_one(ics);
    assert_eq!(
        event.summary.as_deref(),
        Some("Lunch, then planning\nwith the team")
    );
    assert_eq!(event.categories, vec!["Work", "Food & Drink"]);
}

#[test]
fn unfolds_continuation_lines() {
    let ics = "BEGIN:VCALENDAR\r\n\
BEGIN:VEVENT\r\n\
UID:folded@x\r\n\
DTSTART:20240101T100000Z\r\n\
DTEND:20240101T110000Z\r\n\
SUMMARY:A summary that was fol\r\n ded across two lines\r\n\
END:VEVENT\r\n\
END:VCALENDAR\r\n";

    let event = parse_one(ics);
    assert_eq!(
        event.summary.as_deref(),
        Some("A summary that was folded across two lines")
    );
}

#[test]
fn generated_lines_fold_at_75_octets_and_survive_reparse() {
    let mut event = crate::util::sample_event("fold@x");
    event.summary = Some("An extremely long summary line that will certainly exceed the seventy-five octet folding limit of RFC 5545 content lines".to_string());

    let text = generate(&event);
    for line in text.split("\r\n") {
        assert!(line.len() <= 75, "line exceeds fold limit: {line:?}");
    }

    let reparsed = parse_one(&text);
    assert_eq!(reparsed.summary, event.summary);
}

#[test]
fn multiple_exdates_accumulate() {
    let ics = "BEGIN:VCALENDAR\r\n\
BEGIN:VEVENT\r\n\
UID:rec@x\r\n\
DTSTART:20240101T100000Z\r\n\
DTEND:20240101T110000Z\r\n\
RRULE:FREQ=WEEKLY;BYDAY=MO\r\n\
EXDATE:20240108T100000Z,20240115T100000Z\r\n\
EXDATE:20240122T100000Z\r\n\
END:VEVENT\r\n\
END:VCALENDAR\r\n";

    let event = parse_one(ics);
    assert_eq!(event.rrule.as_deref(), Some("FREQ=WEEKLY;BYDAY=MO"));
    assert_eq!(event.exdates.len(), 3);
}

#[test]
fn recurrence_override_carries_recurrence_id() {
    let ics = "BEGIN:VCALENDAR\r\n\
BEGIN:VEVENT\r\n\
UID:master@x\r\n\
DTSTART:20240101T100000Z\r\n\
DTEND:20240101T110000Z\r\n\
RRULE:FREQ=DAILY\r\n\
END:VEVENT\r\n\
BEGIN:VEVENT\r\n\
UID:master@x\r\n\
RECURRENCE-ID:20240102T100000Z\r\n\
DTSTART:20240102T120000Z\r\n\
DTEND:20240102T130000Z\r\n\
SUMMARY:Moved instance\r\n\
END:VEVENT\r\n\
END:VCALENDAR\r\n";

    let events = parse(ics).expect("parse succeeds");
    assert_eq!(events.len(), 2);
    assert!(events[0].recurrence_id.is_none());
    assert!(events[1].recurrence_id.is_some());
    assert_eq!(events[0].uid, events[1].uid);
}

#[test]
fn skips_vtimezone_components() {
    let ics = "BEGIN:VCALENDAR\r\n\
BEGIN:VTIMEZONE\r\n\
TZID:Europe/Berlin\r\n\
BEGIN:STANDARD\r\n\
DTSTART:19701025T030000\r\n\
END:STANDARD\r\n\
END:VTIMEZONE\r\n\
BEGIN:VEVENT\r\n\
UID:tz@x\r\n\
DTSTART;TZID=Europe/Berlin:20240101T100000\r\n\
DTEND;TZID=Europe/Berlin:20240101T110000\r\n\
END:VEVENT\r\n\
END:VCALENDAR\r\n";

    let event = parse_one(ics);
    assert_eq!(event.uid, "tz@x");
}

#[test]
fn missing_uid_is_an_error() {
    let ics = "BEGIN:VCALENDAR\r\nBEGIN:VEVENT\r\nDTSTART:20240101T100000Z\r\nEND:VEVENT\r\nEND:VCALENDAR\r\n";
    assert!(matches!(
        parse(ics),
        Err(IcalError::MissingProperty("UID"))
    ));
}

#[test]
fn non_calendar_text_is_an_error() {
    assert!(matches!(
        parse("hello: world\r\n"),
        Err(IcalError::NotCalendar)
    ));
    assert!(matches!(
        parse("BEGIN:VCALENDAR\r\nBEGIN:VEVENT\r\nUID:u@x\r\n"),
        Err(IcalError::Unterminated(_))
    ));
}

#[test]
fn round_trips_a_fully_featured_event() {
    let mut event = Event::new("full@example.com");
    event.summary = Some("Board meeting, Q2".to_string());
    event.description = Some("Agenda:\n- budget\n- hiring".to_string());
    event.location = Some("HQ; room 4".to_string());
    event.status = Some(EventStatus::Tentative);
    event.transparency = Some(Transparency::Transparent);
    event.sequence = 2;
    event.dtstart = Some(CalDateTime::Zoned {
        local: NaiveDate::from_ymd_opt(2024, 6, 1)
            .unwrap()
            .and_hms_opt(9, 30, 0)
            .unwrap(),
        tzid: "Europe/Berlin".to_string(),
    });
    event.dtend = Some(CalDateTime::Zoned {
        local: NaiveDate::from_ymd_opt(2024, 6, 1)
            .unwrap()
            .and_hms_opt(11, 0, 0)
            .unwrap(),
        tzid: "Europe/Berlin".to_string(),
    });
    event.rrule = Some("FREQ=MONTHLY;BYMONTHDAY=1".to_string());
    event.exdates = vec![CalDateTime::Zoned {
        local: NaiveDate::from_ymd_opt(2024, 7, 1)
            .unwrap()
            .and_hms_opt(9, 30, 0)
            .unwrap(),
        tzid: "Europe/Berlin".to_string(),
    }];
    event.categories = vec!["Work".to_string(), "Finance, strategy".to_string()];
    event.organizer = Some(CalAddress {
        value: "mailto:boss@example.com".to_string(),
        params: vec![("CN".to_string(), "The Boss".to_string())],
    });
    event.attendees = vec![CalAddress {
        value: "mailto:dev@example.com".to_string(),
        params: vec![
            ("CN".to_string(), "Dev, Senior".to_string()),
            ("PARTSTAT".to_string(), "ACCEPTED".to_string()),
        ],
    }];
    event.color = Some("tomato".to_string());
    event.dtstamp = Some(Utc.with_ymd_and_hms(2024, 5, 20, 8, 0, 0).unwrap());
    event.created = Some(Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap());
    event.last_modified = Some(Utc.with_ymd_and_hms(2024, 5, 21, 8, 0, 0).unwrap());
    event.url = Some("https://example.com/meetings/42".to_string());
    event.alarms = vec![Alarm {
        properties: vec![
            Property::new("ACTION", "DISPLAY"),
            Property::new("TRIGGER", "-PT10M"),
            Property::new("DESCRIPTION", "Reminder"),
        ],
    }];
    event.extra_properties = vec![Property {
        name: "X-APPLE-TRAVEL-ADVISORY-BEHAVIOR".to_string(),
        params: vec![],
        value: "AUTOMATIC".to_string(),
    }];

    let text = generate(&event);
    let reparsed = parse_one(&text);
    assert_eq!(reparsed, event);
}

#[test]
fn round_trips_an_all_day_event() {
    let mut event = Event::new("allday@example.com");
    event.summary = Some("Company holiday".to_string());
    event.dtstart = Some(CalDateTime::Date(
        NaiveDate::from_ymd_opt(2024, 12, 24).unwrap(),
    ));
    event.dtend = Some(CalDateTime::Date(
        NaiveDate::from_ymd_opt(2024, 12, 27).unwrap(),
    ));

    let text = generate(&event);
    assert!(text.contains("DTSTART;VALUE=DATE:20241224"));
    let reparsed = parse_one(&text);
    assert_eq!(reparsed, event);
    assert!(reparsed.is_all_day());
}

#[test]
fn round_trips_duration_instead_of_dtend() {
    let mut event = Event::new("dur@example.com");
    event.dtstart = Some(CalDateTime::Utc(
        Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap(),
    ));
    event.duration = Some("PT45M".to_string());

    let text = generate(&event);
    assert!(text.contains("DURATION:PT45M"));
    let reparsed = parse_one(&text);
    assert_eq!(reparsed, event);
}

#[test]
fn quoted_parameter_values_round_trip() {
    let ics = "BEGIN:VCALENDAR\r\n\
BEGIN:VEVENT\r\n\
UID:q@x\r\n\
DTSTART:20240101T100000Z\r\n\
DTEND:20240101T110000Z\r\n\
ATTENDEE;CN=\"Smith, Jane\";ROLE=REQ-PARTICIPANT:mailto:jane@example.com\r\n\
END:VEVENT\r\n\
END:VCALENDAR\r\n";

    let event = parse_one(ics);
    assert_eq!(event.attendees.len(), 1);
    assert_eq!(event.attendees[0].common_name(), Some("Smith, Jane"));

    let text = generate(&event);
    assert!(text.contains("CN=\"Smith, Jane\""));
    let reparsed = parse_one(&text);
    assert_eq!(reparsed.attendees, event.attendees);
}
