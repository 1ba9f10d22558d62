//! RFC 5545 content-line codec for VEVENT resources.
//!
//! `parse` maps an iCalendar stream to a list of [`Event`]s (one per VEVENT;
//! recurrence overrides appear as separate events carrying `recurrence_id`).
//! `generate` emits a single-event VCALENDAR. For every event the codec
//! accepts, `parse(generate(e)) == e` over the modeled field set.
//!
//! Components other than VEVENT/VALARM (VTIMEZONE, VJOURNAL, ...) are
//! skipped; their presence never fails a parse.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use thiserror::Error;

use crate::ical::model::{
    Alarm, CalAddress, CalDateTime, Event, EventStatus, Property, Transparency,
};

const PRODID: &str = "-//caldav-sync-rs//calendar sync//EN";
const FOLD_LIMIT: usize = 75;

/// Faults raised by the codec. Callers map these into the protocol-level
/// parse variant.
#[derive(Debug, Clone, Error)]
pub enum IcalError {
    #[error("not an iCalendar stream")]
    NotCalendar,
    #[error("unterminated component {0}")]
    Unterminated(String),
    #[error("content line without ':' separator: {0:?}")]
    MalformedLine(String),
    #[error("missing required property {0}")]
    MissingProperty(&'static str),
    #[error("invalid {kind} value {value:?}")]
    InvalidValue { kind: &'static str, value: String },
}

/// Parse an iCalendar text into events.
pub fn parse(text: &str) -> Result<Vec<Event>, IcalError> {
    let lines = unfold(text);

    let mut events = Vec::new();
    let mut in_calendar = false;
    let mut saw_calendar = false;
    let mut current: Option<Event> = None;
    let mut current_has_uid = false;
    let mut alarm: Option<Alarm> = None;
    // Depth of components we deliberately ignore (VTIMEZONE etc.).
    let mut skip_depth = 0usize;

    for line in &lines {
        if line.trim().is_empty() {
            continue;
        }
        let prop = parse_content_line(line)?;
        let name = prop.name.to_ascii_uppercase();

        if skip_depth > 0 {
            match name.as_str() {
                "BEGIN" => skip_depth += 1,
                "END" => skip_depth -= 1,
                _ => {}
            }
            continue;
        }

        match name.as_str() {
            "BEGIN" => match prop.value.trim().to_ascii_uppercase().as_str() {
                "VCALENDAR" => {
                    in_calendar = true;
                    saw_calendar = true;
                }
                "VEVENT" if in_calendar && current.is_none() => {
                    current = Some(Event::default());
                    current_has_uid = false;
                }
                "VALARM" if current.is_some() && alarm.is_none() => {
                    alarm = Some(Alarm::default());
                }
                _ => skip_depth = 1,
            },
            "END" => match prop.value.trim().to_ascii_uppercase().as_str() {
                "VALARM" if alarm.is_some() => {
                    if let (Some(event), Some(done)) = (current.as_mut(), alarm.take()) {
                        event.alarms.push(done);
                    }
                }
                "VEVENT" => {
                    if let Some(event) = current.take() {
                        if !current_has_uid {
                            return Err(IcalError::MissingProperty("UID"));
                        }
                        events.push(event);
                    }
                }
                "VCALENDAR" => {
                    if current.is_some() {
                        return Err(IcalError::Unterminated("VEVENT".into()));
                    }
                    in_calendar = false;
                }
                _ => {}
            },
            _ => {
                if let Some(alarm) = alarm.as_mut() {
                    alarm.properties.push(prop);
                } else if let Some(event) = current.as_mut() {
                    apply_event_property(event, &name, prop, &mut current_has_uid)?;
                }
                // Calendar-level properties (PRODID, VERSION, ...) are not
                // modeled.
            }
        }
    }

    if !saw_calendar {
        return Err(IcalError::NotCalendar);
    }
    if alarm.is_some() {
        return Err(IcalError::Unterminated("VALARM".into()));
    }
    if current.is_some() || in_calendar {
        return Err(IcalError::Unterminated(
            if current.is_some() { "VEVENT" } else { "VCALENDAR" }.into(),
        ));
    }

    Ok(events)
}

/// Serialize one event as a standalone VCALENDAR.
pub fn generate(event: &Event) -> String {
    let mut out = String::with_capacity(512);
    emit(&mut out, "BEGIN", &[], "VCALENDAR");
    emit(&mut out, "VERSION", &[], "2.0");
    emit(&mut out, "PRODID", &[], PRODID);
    emit(&mut out, "BEGIN", &[], "VEVENT");

    emit(&mut out, "UID", &[], &event.uid);
    if let Some(stamp) = &event.dtstamp {
        emit(&mut out, "DTSTAMP", &[], &format_utc_stamp(stamp));
    }
    if let Some(start) = &event.dtstart {
        let (params, value) = datetime_parts(start);
        emit(&mut out, "DTSTART", &params, &value);
    }
    if let Some(end) = &event.dtend {
        let (params, value) = datetime_parts(end);
        emit(&mut out, "DTEND", &params, &value);
    }
    if let Some(duration) = &event.duration {
        emit(&mut out, "DURATION", &[], duration);
    }
    if let Some(summary) = &event.summary {
        emit(&mut out, "SUMMARY", &[], &escape_text(summary));
    }
    if let Some(description) = &event.description {
        emit(&mut out, "DESCRIPTION", &[], &escape_text(description));
    }
    if let Some(location) = &event.location {
        emit(&mut out, "LOCATION", &[], &escape_text(location));
    }
    if let Some(status) = event.status {
        emit(&mut out, "STATUS", &[], status.as_ical());
    }
    if let Some(transparency) = event.transparency {
        emit(&mut out, "TRANSP", &[], transparency.as_ical());
    }
    if event.sequence > 0 {
        emit(&mut out, "SEQUENCE", &[], &event.sequence.to_string());
    }
    if let Some(rrule) = &event.rrule {
        emit(&mut out, "RRULE", &[], rrule);
    }
    for exdate in &event.exdates {
        let (params, value) = datetime_parts(exdate);
        emit(&mut out, "EXDATE", &params, &value);
    }
    if let Some(rid) = &event.recurrence_id {
        let (params, value) = datetime_parts(rid);
        emit(&mut out, "RECURRENCE-ID", &params, &value);
    }
    if !event.categories.is_empty() {
        let joined = event
            .categories
            .iter()
            .map(|c| escape_text(c))
            .collect::<Vec<_>>()
            .join(",");
        emit(&mut out, "CATEGORIES", &[], &joined);
    }
    if let Some(organizer) = &event.organizer {
        emit(&mut out, "ORGANIZER", &organizer.params, &organizer.value);
    }
    for attendee in &event.attendees {
        emit(&mut out, "ATTENDEE", &attendee.params, &attendee.value);
    }
    if let Some(created) = &event.created {
        emit(&mut out, "CREATED", &[], &format_utc_stamp(created));
    }
    if let Some(modified) = &event.last_modified {
        emit(&mut out, "LAST-MODIFIED", &[], &format_utc_stamp(modified));
    }
    if let Some(color) = &event.color {
        emit(&mut out, "COLOR", &[], color);
    }
    if let Some(url) = &event.url {
        emit(&mut out, "URL", &[], url);
    }
    for prop in &event.extra_properties {
        emit(&mut out, &prop.name, &prop.params, &prop.value);
    }
    for alarm in &event.alarms {
        emit(&mut out, "BEGIN", &[], "VALARM");
        for prop in &alarm.properties {
            emit(&mut out, &prop.name, &prop.params, &prop.value);
        }
        emit(&mut out, "END", &[], "VALARM");
    }

    emit(&mut out, "END", &[], "VEVENT");
    emit(&mut out, "END", &[], "VCALENDAR");
    out
}

fn apply_event_property(
    event: &mut Event,
    name: &str,
    prop: Property,
    has_uid: &mut bool,
) -> Result<(), IcalError> {
    match name {
        "UID" => {
            event.uid = prop.value.trim().to_string();
            *has_uid = !event.uid.is_empty();
        }
        "SUMMARY" => event.summary = Some(unescape_text(&prop.value)),
        "DESCRIPTION" => event.description = Some(unescape_text(&prop.value)),
        "LOCATION" => event.location = Some(unescape_text(&prop.value)),
        "STATUS" => event.status = EventStatus::from_ical(&prop.value),
        "TRANSP" => event.transparency = Transparency::from_ical(&prop.value),
        "SEQUENCE" => {
            event.sequence =
                prop.value
                    .trim()
                    .parse()
                    .map_err(|_| IcalError::InvalidValue {
                        kind: "SEQUENCE",
                        value: prop.value.clone(),
                    })?;
        }
        "DTSTART" => event.dtstart = Some(parse_datetime_prop(&prop)?),
        "DTEND" => event.dtend = Some(parse_datetime_prop(&prop)?),
        "DURATION" => event.duration = Some(prop.value.trim().to_string()),
        "RRULE" => event.rrule = Some(prop.value.trim().to_string()),
        "EXDATE" => {
            for value in split_unescaped(&prop.value, ',') {
                let single = Property {
                    name: prop.name.clone(),
                    params: prop.params.clone(),
                    value: value.to_string(),
                };
                event.exdates.push(parse_datetime_prop(&single)?);
            }
        }
        "RECURRENCE-ID" => event.recurrence_id = Some(parse_datetime_prop(&prop)?),
        "CATEGORIES" => {
            for value in split_unescaped(&prop.value, ',') {
                let category = unescape_text(value);
                if !category.is_empty() {
                    event.categories.push(category);
                }
            }
        }
        "ORGANIZER" => {
            event.organizer = Some(CalAddress {
                value: prop.value.trim().to_string(),
                params: prop.params,
            });
        }
        "ATTENDEE" => {
            event.attendees.push(CalAddress {
                value: prop.value.trim().to_string(),
                params: prop.params,
            });
        }
        "DTSTAMP" => event.dtstamp = Some(parse_utc_stamp(&prop)?),
        "CREATED" => event.created = Some(parse_utc_stamp(&prop)?),
        "LAST-MODIFIED" => event.last_modified = Some(parse_utc_stamp(&prop)?),
        "COLOR" => event.color = Some(prop.value.trim().to_string()),
        "URL" => event.url = Some(prop.value.trim().to_string()),
        _ => event.extra_properties.push(prop),
    }
    Ok(())
}

// ----------- content-line syntax -----------

/// Undo RFC 5545 §3.1 line folding. Handles both CRLF and bare LF input.
fn unfold(text: &str) -> Vec<String> {
    let mut lines: Vec<String> = Vec::new();
    for raw in text.split('\n') {
        let raw = raw.strip_suffix('\r').unwrap_or(raw);
        if let Some(rest) = raw.strip_prefix(' ').or_else(|| raw.strip_prefix('\t')) {
            if let Some(last) = lines.last_mut() {
                last.push_str(rest);
                continue;
            }
        }
        lines.push(raw.to_string());
    }
    lines
}

/// Split `NAME;PARAM=VALUE;...:value`, honoring quoted parameter values.
fn parse_content_line(line: &str) -> Result<Property, IcalError> {
    let mut in_quotes = false;
    let mut colon = None;
    for (i, c) in line.char_indices() {
        match c {
            '"' => in_quotes = !in_quotes,
            ':' if !in_quotes => {
                colon = Some(i);
                break;
            }
            _ => {}
        }
    }
    let colon = colon.ok_or_else(|| IcalError::MalformedLine(line.to_string()))?;
    let (head, value) = (&line[..colon], &line[colon + 1..]);

    let mut segments = split_quoted(head, ';').into_iter();
    let name = segments
        .next()
        .filter(|n| !n.is_empty())
        .ok_or_else(|| IcalError::MalformedLine(line.to_string()))?
        .to_string();

    let mut params = Vec::new();
    for segment in segments {
        let (key, raw) = segment
            .split_once('=')
            .ok_or_else(|| IcalError::MalformedLine(line.to_string()))?;
        params.push((key.to_string(), unquote_param(raw)));
    }

    Ok(Property {
        name,
        params,
        value: value.to_string(),
    })
}

/// Split on `sep` outside double quotes.
fn split_quoted(s: &str, sep: char) -> Vec<&str> {
    let mut out = Vec::new();
    let mut in_quotes = false;
    let mut start = 0;
    for (i, c) in s.char_indices() {
        if c == '"' {
            in_quotes = !in_quotes;
        } else if c == sep && !in_quotes {
            out.push(&s[start..i]);
            start = i + sep.len_utf8();
        }
    }
    out.push(&s[start..]);
    out
}

/// Split on `sep` except where preceded by a backslash.
fn split_unescaped(s: &str, sep: char) -> Vec<&str> {
    let mut out = Vec::new();
    let mut start = 0;
    let mut escaped = false;
    for (i, c) in s.char_indices() {
        if escaped {
            escaped = false;
        } else if c == '\\' {
            escaped = true;
        } else if c == sep {
            out.push(&s[start..i]);
            start = i + sep.len_utf8();
        }
    }
    out.push(&s[start..]);
    out
}

fn unquote_param(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.len() >= 2 && trimmed.starts_with('"') && trimmed.ends_with('"') {
        let inner = &trimmed[1..trimmed.len() - 1];
        if !inner.contains('"') {
            return inner.to_string();
        }
    }
    trimmed.to_string()
}

fn quote_param(value: &str) -> String {
    if value.contains([';', ':', ',']) && !value.contains('"') {
        format!("\"{value}\"")
    } else {
        value.to_string()
    }
}

/// RFC 5545 §3.3.11 TEXT escaping.
pub fn escape_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            ';' => out.push_str("\\;"),
            ',' => out.push_str("\\,"),
            '\n' => out.push_str("\\n"),
            _ => out.push(c),
        }
    }
    out
}

pub fn unescape_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') | Some('N') => out.push('\n'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}

fn emit(out: &mut String, name: &str, params: &[(String, String)], value: &str) {
    let mut line = String::with_capacity(name.len() + value.len() + 16);
    line.push_str(name);
    for (key, val) in params {
        line.push(';');
        line.push_str(key);
        line.push('=');
        line.push_str(&quote_param(val));
    }
    line.push(':');
    line.push_str(value);
    fold_into(out, &line);
}

/// RFC 5545 §3.1: lines longer than 75 octets are folded with a CRLF plus a
/// single space.
fn fold_into(out: &mut String, line: &str) {
    if line.len() <= FOLD_LIMIT {
        out.push_str(line);
        out.push_str("\r\n");
        return;
    }
    let mut rest = line;
    let mut first = true;
    while !rest.is_empty() {
        let budget = if first { FOLD_LIMIT } else { FOLD_LIMIT - 1 };
        let mut cut = budget.min(rest.len());
        while cut < rest.len() && !rest.is_char_boundary(cut) {
            cut -= 1;
        }
        if !first {
            out.push(' ');
        }
        out.push_str(&rest[..cut]);
        out.push_str("\r\n");
        rest = &rest[cut..];
        first = false;
    }
}

// ----------- date-time values -----------

const UTC_STAMP_FMT: &str = "%Y%m%dT%H%M%S";
const DATE_FMT: &str = "%Y%m%d";

fn parse_datetime_prop(prop: &Property) -> Result<CalDateTime, IcalError> {
    let value = prop.value.trim();
    let declared_date = prop
        .param("VALUE")
        .is_some_and(|v| v.eq_ignore_ascii_case("DATE"));

    if declared_date || (value.len() == 8 && !value.contains('T')) {
        let date =
            NaiveDate::parse_from_str(value, DATE_FMT).map_err(|_| IcalError::InvalidValue {
                kind: "DATE",
                value: value.to_string(),
            })?;
        return Ok(CalDateTime::Date(date));
    }

    if let Some(stripped) = value.strip_suffix('Z') {
        let naive = NaiveDateTime::parse_from_str(stripped, UTC_STAMP_FMT).map_err(|_| {
            IcalError::InvalidValue {
                kind: "DATE-TIME",
                value: value.to_string(),
            }
        })?;
        return Ok(CalDateTime::Utc(naive.and_utc()));
    }

    let local =
        NaiveDateTime::parse_from_str(value, UTC_STAMP_FMT).map_err(|_| IcalError::InvalidValue {
            kind: "DATE-TIME",
            value: value.to_string(),
        })?;
    match prop.param("TZID") {
        Some(tzid) => Ok(CalDateTime::Zoned {
            local,
            tzid: tzid.to_string(),
        }),
        None => Ok(CalDateTime::Floating(local)),
    }
}

/// DTSTAMP/CREATED/LAST-MODIFIED are UTC instants; tolerate the other forms
/// by pinning them to UTC.
fn parse_utc_stamp(prop: &Property) -> Result<DateTime<Utc>, IcalError> {
    Ok(match parse_datetime_prop(prop)? {
        CalDateTime::Utc(dt) => dt,
        CalDateTime::Floating(naive) | CalDateTime::Zoned { local: naive, .. } => naive.and_utc(),
        CalDateTime::Date(date) => match date.and_hms_opt(0, 0, 0) {
            Some(midnight) => midnight.and_utc(),
            None => {
                return Err(IcalError::InvalidValue {
                    kind: "DATE-TIME",
                    value: prop.value.clone(),
                });
            }
        },
    })
}

fn format_utc_stamp(stamp: &DateTime<Utc>) -> String {
    format!("{}Z", stamp.format(UTC_STAMP_FMT))
}

fn datetime_parts(dt: &CalDateTime) -> (Vec<(String, String)>, String) {
    match dt {
        CalDateTime::Date(date) => (
            vec![("VALUE".to_string(), "DATE".to_string())],
            date.format(DATE_FMT).to_string(),
        ),
        CalDateTime::Utc(instant) => (Vec::new(), format_utc_stamp(instant)),
        CalDateTime::Floating(local) => (Vec::new(), local.format(UTC_STAMP_FMT).to_string()),
        CalDateTime::Zoned { local, tzid } => (
            vec![("TZID".to_string(), tzid.clone())],
            local.format(UTC_STAMP_FMT).to_string(),
        ),
    }
}
