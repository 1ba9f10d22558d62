//! The in-memory event model.
//!
//! Opinionated where it pays (typed status, transparency, date-time forms)
//! and textual where round-tripping matters more than interpretation
//! (RRULE, DURATION, VALARM blocks, extension properties).

use std::cmp::Ordering;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::common::error::{DavError, DavResult};

/// RFC 5545 `STATUS` for a VEVENT.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventStatus {
    Tentative,
    Confirmed,
    Cancelled,
}

impl EventStatus {
    pub fn as_ical(self) -> &'static str {
        match self {
            EventStatus::Tentative => "TENTATIVE",
            EventStatus::Confirmed => "CONFIRMED",
            EventStatus::Cancelled => "CANCELLED",
        }
    }

    pub fn from_ical(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "TENTATIVE" => Some(EventStatus::Tentative),
            "CONFIRMED" => Some(EventStatus::Confirmed),
            "CANCELLED" => Some(EventStatus::Cancelled),
            _ => None,
        }
    }
}

/// RFC 5545 `TRANSP`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Transparency {
    Opaque,
    Transparent,
}

impl Transparency {
    pub fn as_ical(self) -> &'static str {
        match self {
            Transparency::Opaque => "OPAQUE",
            Transparency::Transparent => "TRANSPARENT",
        }
    }

    pub fn from_ical(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "OPAQUE" => Some(Transparency::Opaque),
            "TRANSPARENT" => Some(Transparency::Transparent),
            _ => None,
        }
    }
}

/// The four date-time shapes RFC 5545 allows in practice: a bare date, a UTC
/// instant, a floating local time, and a local time anchored to a named
/// zone. The zone name is carried verbatim; resolving it against a tz
/// database is out of scope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CalDateTime {
    Date(NaiveDate),
    Utc(DateTime<Utc>),
    Floating(NaiveDateTime),
    Zoned { local: NaiveDateTime, tzid: String },
}

impl CalDateTime {
    pub fn is_date(&self) -> bool {
        matches!(self, CalDateTime::Date(_))
    }

    /// Compare two values of the same shape. Values of different shapes (or
    /// different zones) have no defined order.
    pub fn cmp_same_kind(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (CalDateTime::Date(a), CalDateTime::Date(b)) => Some(a.cmp(b)),
            (CalDateTime::Utc(a), CalDateTime::Utc(b)) => Some(a.cmp(b)),
            (CalDateTime::Floating(a), CalDateTime::Floating(b)) => Some(a.cmp(b)),
            (
                CalDateTime::Zoned { local: a, tzid: za },
                CalDateTime::Zoned { local: b, tzid: zb },
            ) if za == zb => Some(a.cmp(b)),
            _ => None,
        }
    }
}

/// A raw content line: name, parameters, and an uninterpreted value.
///
/// Values are stored exactly as they appear on the wire (still escaped);
/// this is what makes VALARM blocks and X-properties round-trip unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Property {
    pub name: String,
    pub params: Vec<(String, String)>,
    pub value: String,
}

impl Property {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            params: Vec::new(),
            value: value.into(),
        }
    }

    pub fn param(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// `ORGANIZER` / `ATTENDEE`: a calendar user address plus its parameters
/// (CN, PARTSTAT, ROLE, ...), kept textual for faithful round-trips.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalAddress {
    pub value: String,
    pub params: Vec<(String, String)>,
}

impl CalAddress {
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            params: Vec::new(),
        }
    }

    pub fn param(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn common_name(&self) -> Option<&str> {
        self.param("CN")
    }
}

/// A VALARM block, round-tripped as its raw property list.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Alarm {
    pub properties: Vec<Property>,
}

impl Alarm {
    pub fn action(&self) -> Option<&str> {
        self.prop("ACTION")
    }

    pub fn trigger(&self) -> Option<&str> {
        self.prop("TRIGGER")
    }

    fn prop(&self, name: &str) -> Option<&str> {
        self.properties
            .iter()
            .find(|p| p.name.eq_ignore_ascii_case(name))
            .map(|p| p.value.as_str())
    }
}

/// One calendar event, identified by its stable `uid`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub uid: String,
    pub summary: Option<String>,
    pub description: Option<String>,
    pub location: Option<String>,
    pub status: Option<EventStatus>,
    pub transparency: Option<Transparency>,
    /// Monotonic per uid under local edits; never decreases without a fresh
    /// create.
    pub sequence: u32,
    pub dtstart: Option<CalDateTime>,
    pub dtend: Option<CalDateTime>,
    /// RFC 5545 duration text, e.g. `PT1H`. Mutually exclusive with
    /// `dtend` as the source of truth.
    pub duration: Option<String>,
    /// RRULE text, round-tripped without expansion.
    pub rrule: Option<String>,
    pub exdates: Vec<CalDateTime>,
    /// Set on recurrence overrides.
    pub recurrence_id: Option<CalDateTime>,
    pub alarms: Vec<Alarm>,
    pub categories: Vec<String>,
    pub organizer: Option<CalAddress>,
    pub attendees: Vec<CalAddress>,
    pub color: Option<String>,
    pub dtstamp: Option<DateTime<Utc>>,
    pub last_modified: Option<DateTime<Utc>>,
    pub created: Option<DateTime<Utc>>,
    pub url: Option<String>,
    /// X-/IANA properties preserved verbatim.
    pub extra_properties: Vec<Property>,
}

impl Event {
    pub fn new(uid: impl Into<String>) -> Self {
        Self {
            uid: uid.into(),
            ..Self::default()
        }
    }

    /// All-day is a property of the endpoint shapes, not a stored flag: an
    /// event is all-day iff its start is a bare date.
    pub fn is_all_day(&self) -> bool {
        self.dtstart.as_ref().is_some_and(CalDateTime::is_date)
    }

    /// Enforce the structural invariants before an event is written out.
    pub fn validate(&self) -> DavResult<()> {
        if self.uid.trim().is_empty() {
            return Err(DavError::Argument("event uid must not be empty".into()));
        }
        if self.dtend.is_some() && self.duration.is_some() {
            return Err(DavError::Argument(
                "dtend and duration are mutually exclusive".into(),
            ));
        }
        match (&self.dtstart, &self.dtend) {
            (Some(start), Some(end)) => {
                if start.is_date() != end.is_date() {
                    return Err(DavError::Argument(
                        "all-day events need date-only endpoints on both sides".into(),
                    ));
                }
                if start.cmp_same_kind(end) == Some(Ordering::Greater) {
                    return Err(DavError::Argument("dtstart is after dtend".into()));
                }
            }
            (Some(start), None) => {
                if !start.is_date() && self.duration.is_none() {
                    return Err(DavError::Argument(
                        "timed events need either dtend or duration".into(),
                    ));
                }
            }
            _ => {}
        }
        Ok(())
    }

    /// Timestamp used to order conflicting copies: `DTSTAMP`, falling back
    /// to `LAST-MODIFIED`.
    pub fn conflict_stamp(&self) -> Option<DateTime<Utc>> {
        self.dtstamp.or(self.last_modified)
    }
}
