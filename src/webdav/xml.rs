//! XML namespace constants and escaping shared by request builders and the
//! multistatus parser.

/// Well-known namespaces of the WebDAV/CalDAV protocol family.
pub mod ns {
    pub const DAV: &str = "DAV:";
    pub const CALDAV: &str = "urn:ietf:params:xml:ns:caldav";
    pub const CALENDARSERVER: &str = "http://calendarserver.org/ns/";
}

/// Escape a string for use in XML text content or attribute values.
pub fn escape_xml(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for ch in input.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(ch),
        }
    }
    out
}

/// Parse the numeric code out of an RFC 2616 status line such as
/// `HTTP/1.1 404 Not Found`.
pub fn parse_status_line(line: &str) -> Option<u16> {
    line.split_whitespace().nth(1)?.parse().ok()
}
