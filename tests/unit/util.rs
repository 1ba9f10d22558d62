#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use caldav_sync_rs::common::{HttpRequest, HttpResponse, HttpTransport, TransportError};
use caldav_sync_rs::ical::{CalDateTime, Event};
use chrono::{TimeZone, Utc};

/// Scripted transport: plays back a queue of canned responses in order and
/// records every request it saw.
#[derive(Default)]
pub struct MockTransport {
    responses: Mutex<VecDeque<Result<HttpResponse, TransportError>>>,
    requests: Mutex<Vec<HttpRequest>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_response(&self, response: HttpResponse) {
        self.responses.lock().unwrap().push_back(Ok(response));
    }

    pub fn push_error(&self, error: TransportError) {
        self.responses.lock().unwrap().push_back(Err(error));
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn remaining_responses(&self) -> usize {
        self.responses.lock().unwrap().len()
    }
}

#[async_trait]
impl HttpTransport for MockTransport {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        self.requests.lock().unwrap().push(request);
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| {
                Err(TransportError::Network(
                    "mock transport has no response queued".to_string(),
                ))
            })
    }
}

/// A `207 Multi-Status` response carrying the given XML body.
pub fn multistatus(xml: &str) -> HttpResponse {
    HttpResponse::new(207)
        .with_header("content-type", "application/xml; charset=utf-8")
        .with_body(xml.to_string())
}

pub fn status(code: u16) -> HttpResponse {
    HttpResponse::new(code)
}

pub fn request_body(request: &HttpRequest) -> String {
    request
        .body
        .as_ref()
        .map(|b| String::from_utf8_lossy(b).into_owned())
        .unwrap_or_default()
}

/// A timed one-hour event suitable for round-trips and pushes.
pub fn sample_event(uid: &str) -> Event {
    let mut event = Event::new(uid);
    event.summary = Some("Team standup".to_string());
    event.dtstart = Some(CalDateTime::Utc(
        Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap(),
    ));
    event.dtend = Some(CalDateTime::Utc(
        Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap(),
    ));
    event
}

/// Minimal VCALENDAR text with one VEVENT.
pub fn sample_ics(uid: &str, summary: &str) -> String {
    format!(
        "BEGIN:VCALENDAR\r\nVERSION:2.0\r\nPRODID:-//test//EN\r\nBEGIN:VEVENT\r\nUID:{uid}\r\nDTSTAMP:20240301T080000Z\r\nDTSTART:20240301T090000Z\r\nDTEND:20240301T100000Z\r\nSUMMARY:{summary}\r\nEND:VEVENT\r\nEND:VCALENDAR\r\n"
    )
}
