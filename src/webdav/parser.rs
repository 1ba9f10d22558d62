//! Streaming-style `207 Multi-Status` parser.
//!
//! A single pass over the XML event stream with an element stack, the same
//! discipline as a SAX parser: no DOM is built, `calendar-data` payloads are
//! accumulated chunk by chunk, and namespace prefixes are resolved against a
//! scope stack maintained from `xmlns` declarations. Under a lenient quirk
//! profile, elements whose prefix cannot be resolved are still classified by
//! local name (iCloud has been observed emitting such bodies).

use quick_xml::Reader;
use quick_xml::escape::unescape;
use quick_xml::events::{BytesStart, Event};

use crate::common::error::{DavError, DavResult};
use crate::common::quirks::QuirkProfile;
use crate::webdav::types::{Multistatus, PropValue, Propstat, QName, ResponseEntry};
use crate::webdav::xml::{ns, parse_status_line};

/// Parse an aggregated `207 Multi-Status` body.
pub fn parse_multistatus(body: &[u8], quirks: &QuirkProfile) -> DavResult<Multistatus> {
    let mut reader = Reader::from_reader(body);
    reader.config_mut().trim_text(false);

    let mut parser = MultistatusParser::new(quirks);
    let mut buf = Vec::with_capacity(8 * 1024);

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => parser.on_start(&e)?,
            Ok(Event::Empty(e)) => {
                parser.on_start(&e)?;
                parser.on_end();
            }
            Ok(Event::Text(e)) => {
                let text = decode_text(e.as_ref())?;
                parser.on_text(&text);
            }
            Ok(Event::CData(e)) => {
                let text = String::from_utf8_lossy(e.as_ref()).into_owned();
                parser.on_text(&text);
            }
            Ok(Event::End(_)) => parser.on_end(),
            Ok(Event::Eof) => break,
            Err(e) => return Err(DavError::Parse(format!("multistatus XML error: {e}"))),
            _ => {}
        }
        buf.clear();
    }

    Ok(parser.finish())
}

fn decode_text(raw: &[u8]) -> DavResult<String> {
    match std::str::from_utf8(raw) {
        Ok(s) => Ok(unescape(s)
            .map_err(|err| DavError::Parse(format!("XML decode error: {err}")))?
            .into_owned()),
        Err(_) => Ok(String::from_utf8_lossy(raw).into_owned()),
    }
}

struct MultistatusParser<'q> {
    quirks: &'q QuirkProfile,
    stack: Vec<QName>,
    /// `(depth, prefix, uri)` — prefix `None` is the default namespace.
    bindings: Vec<(usize, Option<String>, String)>,
    leaf_buf: String,
    out: Multistatus,
    entry: Option<ResponseEntry>,
    propstat: Option<Propstat>,
    current_prop: Option<(QName, PropValue)>,
    response_depth: Option<usize>,
    propstat_depth: Option<usize>,
    prop_depth: Option<usize>,
}

impl<'q> MultistatusParser<'q> {
    fn new(quirks: &'q QuirkProfile) -> Self {
        Self {
            quirks,
            stack: Vec::with_capacity(16),
            bindings: Vec::with_capacity(8),
            leaf_buf: String::new(),
            out: Multistatus::default(),
            entry: None,
            propstat: None,
            current_prop: None,
            response_depth: None,
            propstat_depth: None,
            prop_depth: None,
        }
    }

    fn finish(self) -> Multistatus {
        self.out
    }

    fn lenient(&self) -> bool {
        self.quirks.dav_namespace_lenient
    }

    fn resolve_prefix(&self, prefix: Option<&str>) -> String {
        for (_, bound, uri) in self.bindings.iter().rev() {
            match (prefix, bound.as_deref()) {
                (Some(p), Some(b)) if p == b => return uri.clone(),
                (None, None) => return uri.clone(),
                _ => {}
            }
        }
        String::new()
    }

    fn resolve_name(&self, raw: &[u8]) -> QName {
        let raw = String::from_utf8_lossy(raw).into_owned();
        match raw.split_once(':') {
            Some((prefix, local)) => QName::new(self.resolve_prefix(Some(prefix)), local),
            None => QName::new(self.resolve_prefix(None), raw),
        }
    }

    fn on_start(&mut self, e: &BytesStart<'_>) -> DavResult<()> {
        self.leaf_buf.clear();
        let depth = self.stack.len() + 1;

        // Namespace declarations apply to the element they appear on.
        for attr in e.attributes().with_checks(false) {
            let attr = attr.map_err(|e| DavError::Parse(format!("bad XML attribute: {e}")))?;
            let key = attr.key.as_ref();
            if key == b"xmlns" {
                let uri = String::from_utf8_lossy(&attr.value).into_owned();
                self.bindings.push((depth, None, uri));
            } else if let Some(prefix) = key.strip_prefix(b"xmlns:") {
                let prefix = String::from_utf8_lossy(prefix).into_owned();
                let uri = String::from_utf8_lossy(&attr.value).into_owned();
                self.bindings.push((depth, Some(prefix), uri));
            }
        }

        let qname = self.resolve_name(e.name().as_ref());
        self.stack.push(qname.clone());
        let lenient = self.lenient();

        if qname.matches(ns::DAV, "response", lenient) && self.response_depth.is_none() {
            self.entry = Some(ResponseEntry::default());
            self.response_depth = Some(depth);
        } else if qname.matches(ns::DAV, "propstat", lenient)
            && self.response_depth.is_some()
            && self.propstat_depth.is_none()
        {
            self.propstat = Some(Propstat::default());
            self.propstat_depth = Some(depth);
        } else if qname.matches(ns::DAV, "prop", lenient)
            && self.propstat_depth.is_some()
            && self.prop_depth.is_none()
        {
            self.prop_depth = Some(depth);
        } else if let Some(pd) = self.prop_depth {
            if depth == pd + 1 {
                self.current_prop = Some((qname, PropValue::default()));
            } else if depth == pd + 2
                && let Some((_, value)) = self.current_prop.as_mut()
            {
                if qname.local.eq_ignore_ascii_case("comp") {
                    for attr in e.attributes().with_checks(false) {
                        let attr =
                            attr.map_err(|e| DavError::Parse(format!("bad XML attribute: {e}")))?;
                        if attr.key.as_ref().eq_ignore_ascii_case(b"name") {
                            let name = attr
                                .unescape_value()
                                .map_err(|e| DavError::Parse(format!("bad comp name: {e}")))?
                                .into_owned();
                            if !name.is_empty()
                                && !value.components.iter().any(|c| c.eq_ignore_ascii_case(&name))
                            {
                                value.components.push(name);
                            }
                        }
                    }
                } else if !qname.local.eq_ignore_ascii_case("href") {
                    value.children.push(qname);
                }
            }
        }

        Ok(())
    }

    fn on_text(&mut self, text: &str) {
        self.leaf_buf.push_str(text);
    }

    fn on_end(&mut self) {
        let Some(qname) = self.stack.pop() else {
            return;
        };
        let depth = self.stack.len() + 1;
        self.bindings.retain(|(d, _, _)| *d != depth);
        let text = std::mem::take(&mut self.leaf_buf);
        let lenient = self.lenient();

        if let Some(pd) = self.prop_depth {
            if depth == pd + 1 {
                // A property element closed; attach its collected value.
                if let Some((name, mut value)) = self.current_prop.take() {
                    if is_raw_payload(&name, lenient) {
                        value.text.push_str(&text);
                    } else {
                        let trimmed = text.trim();
                        if !trimmed.is_empty() {
                            value.text.push_str(trimmed);
                        }
                    }
                    if self.quirks.unwrap_cdata {
                        value.text = unwrap_literal_cdata(&value.text);
                    }
                    if let Some(ps) = self.propstat.as_mut() {
                        ps.props.push((name, value));
                    }
                }
            } else if depth > pd + 1 {
                if qname.local.eq_ignore_ascii_case("href")
                    && let Some((_, value)) = self.current_prop.as_mut()
                {
                    let trimmed = text.trim();
                    if !trimmed.is_empty() {
                        value.hrefs.push(trimmed.to_string());
                    }
                }
            } else if depth == pd {
                self.prop_depth = None;
            }
            if depth != pd {
                return;
            }
        }

        if qname.matches(ns::DAV, "href", lenient) {
            if self.response_depth == Some(depth - 1)
                && let Some(entry) = self.entry.as_mut()
            {
                entry.href = text.trim().to_string();
            }
        } else if qname.matches(ns::DAV, "status", lenient) {
            let code = parse_status_line(text.trim());
            if self.propstat_depth == Some(depth - 1) {
                if let (Some(ps), Some(code)) = (self.propstat.as_mut(), code) {
                    ps.status = code;
                }
            } else if self.response_depth == Some(depth - 1)
                && let Some(entry) = self.entry.as_mut()
            {
                entry.status = code;
            }
        } else if qname.matches(ns::DAV, "sync-token", lenient)
            && depth == 2
            && self.response_depth.is_none()
        {
            let trimmed = text.trim();
            if !trimmed.is_empty() {
                self.out.sync_token = Some(trimmed.to_string());
            }
        } else if qname.matches(ns::DAV, "propstat", lenient)
            && self.propstat_depth == Some(depth)
        {
            if let (Some(mut ps), Some(entry)) = (self.propstat.take(), self.entry.as_mut()) {
                if ps.status == 0 {
                    ps.status = 200;
                }
                entry.propstats.push(ps);
            }
            self.propstat_depth = None;
        } else if qname.matches(ns::DAV, "response", lenient)
            && self.response_depth == Some(depth)
        {
            if let Some(entry) = self.entry.take() {
                self.out.responses.push(entry);
            }
            self.response_depth = None;
        }
    }
}

/// `calendar-data` and `calendar-timezone` carry iCalendar payloads whose
/// whitespace is significant; everything else is a normalized text leaf.
fn is_raw_payload(name: &QName, lenient: bool) -> bool {
    name.matches(ns::CALDAV, "calendar-data", lenient)
        || name.matches(ns::CALDAV, "calendar-timezone", lenient)
}

/// Strip a literal `<![CDATA[...]]>` wrapper that some servers leave inside
/// escaped text content.
fn unwrap_literal_cdata(text: &str) -> String {
    let trimmed = text.trim_start();
    if let Some(inner) = trimmed
        .strip_prefix("<![CDATA[")
        .and_then(|rest| rest.trim_end().strip_suffix("]]>"))
    {
        inner.to_string()
    } else {
        text.to_string()
    }
}
