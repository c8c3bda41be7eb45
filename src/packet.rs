//! # RFC 5424 Packet Module
//!
//! This module provides the wire-format value type used by every transport:
//! an immutable record of one tailed log line, its priority, timestamp, and
//! source identity, together with the RFC 5424 framing and sanitization
//! rules that turn it into bytes on the wire.
//!
//! ## Design Considerations
//!
//! - **Immutable**: a `Packet` is built once per line and never mutated.
//! - **Sanitizing**: the message is cleaned of bytes that would break the
//!   single-line wire framing before it is ever rendered.
//! - **Size-capped**: callers pick a `max_size` appropriate to the transport
//!   (UDP datagrams vs. TCP/TLS streamed lines) and truncation is exact.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, FixedOffset, SecondsFormat, Utc};

use crate::error::PriorityError;

/// A Syslog Priority is a combination of Severity and Facility, encoded as
/// `facility * 8 + severity` per RFC 5424.
pub type Priority = u8;

/// RFC 5424 severities, 0..=7.
pub mod severity {
    use super::Priority;

    pub const EMERG: Priority = 0;
    pub const ALERT: Priority = 1;
    pub const CRIT: Priority = 2;
    pub const ERR: Priority = 3;
    pub const WARNING: Priority = 4;
    pub const NOTICE: Priority = 5;
    pub const INFO: Priority = 6;
    pub const DEBUG: Priority = 7;
}

/// RFC 5424 facilities, 0..=23.
pub mod facility {
    use super::Priority;

    pub const KERN: Priority = 0;
    pub const USER: Priority = 1;
    pub const MAIL: Priority = 2;
    pub const DAEMON: Priority = 3;
    pub const AUTH: Priority = 4;
    pub const SYSLOG: Priority = 5;
    pub const LPR: Priority = 6;
    pub const NEWS: Priority = 7;
    pub const UUCP: Priority = 8;
    pub const CRON: Priority = 9;
    pub const AUTHPRIV: Priority = 10;
    pub const FTP: Priority = 11;
    pub const NTP: Priority = 12;
    pub const AUDIT: Priority = 13;
    pub const ALERT: Priority = 14;
    pub const AT: Priority = 15;
    pub const LOCAL0: Priority = 16;
    pub const LOCAL1: Priority = 17;
    pub const LOCAL2: Priority = 18;
    pub const LOCAL3: Priority = 19;
    pub const LOCAL4: Priority = 20;
    pub const LOCAL5: Priority = 21;
    pub const LOCAL6: Priority = 22;
    pub const LOCAL7: Priority = 23;
}

fn severity_table() -> &'static HashMap<&'static str, Priority> {
    use std::sync::OnceLock;
    static TABLE: OnceLock<HashMap<&'static str, Priority>> = OnceLock::new();
    TABLE.get_or_init(|| {
        HashMap::from([
            ("emerg", severity::EMERG),
            ("alert", severity::ALERT),
            ("crit", severity::CRIT),
            ("err", severity::ERR),
            ("warning", severity::WARNING),
            ("notice", severity::NOTICE),
            ("info", severity::INFO),
            ("debug", severity::DEBUG),
        ])
    })
}

fn facility_table() -> &'static HashMap<&'static str, Priority> {
    use std::sync::OnceLock;
    static TABLE: OnceLock<HashMap<&'static str, Priority>> = OnceLock::new();
    TABLE.get_or_init(|| {
        HashMap::from([
            ("kern", facility::KERN),
            ("user", facility::USER),
            ("mail", facility::MAIL),
            ("daemon", facility::DAEMON),
            ("auth", facility::AUTH),
            ("syslog", facility::SYSLOG),
            ("lpr", facility::LPR),
            ("news", facility::NEWS),
            ("uucp", facility::UUCP),
            ("cron", facility::CRON),
            ("authpriv", facility::AUTHPRIV),
            ("ftp", facility::FTP),
            ("ntp", facility::NTP),
            ("audit", facility::AUDIT),
            ("alert", facility::ALERT),
            ("at", facility::AT),
            ("local0", facility::LOCAL0),
            ("local1", facility::LOCAL1),
            ("local2", facility::LOCAL2),
            ("local3", facility::LOCAL3),
            ("local4", facility::LOCAL4),
            ("local5", facility::LOCAL5),
            ("local6", facility::LOCAL6),
            ("local7", facility::LOCAL7),
        ])
    })
}

/// Look up a named severity. Returns [`PriorityError`] if the name is unknown.
pub fn severity_by_name(name: &str) -> Result<Priority, PriorityError> {
    severity_table()
        .get(name)
        .copied()
        .ok_or_else(|| PriorityError(name.to_string()))
}

/// Look up a named facility. Returns [`PriorityError`] if the name is unknown.
pub fn facility_by_name(name: &str) -> Result<Priority, PriorityError> {
    facility_table()
        .get(name)
        .copied()
        .ok_or_else(|| PriorityError(name.to_string()))
}

/// Enterprise ID used for the optional ingestion-token structured-data element.
const INGESTION_TOKEN_ENTERPRISE_ID: u32 = 41058;

/// An immutable RFC 5424 syslog record built from one tailed log line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub severity: Priority,
    pub facility: Priority,
    /// Absolute point in time with nanosecond precision, keeping the
    /// sender's original UTC offset rather than normalizing to UTC.
    pub timestamp: DateTime<FixedOffset>,
    pub hostname: String,
    pub tag: String,
    pub ingestion_token: Option<String>,
    pub message: String,
}

impl Packet {
    /// Build a new packet. `severity` and `facility` are not validated here;
    /// callers that accept untrusted input should validate with
    /// [`severity_by_name`]/[`facility_by_name`] first.
    pub fn new(
        severity: Priority,
        facility: Priority,
        timestamp: impl Into<DateTime<FixedOffset>>,
        hostname: impl Into<String>,
        tag: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            severity,
            facility,
            timestamp: timestamp.into(),
            hostname: hostname.into(),
            tag: tag.into(),
            ingestion_token: None,
            message: message.into(),
        }
    }

    pub fn with_ingestion_token(mut self, token: impl Into<String>) -> Self {
        self.ingestion_token = Some(token.into());
        self
    }

    /// The combined Facility and Severity of this packet, per RFC 5424.
    pub fn priority(&self) -> Priority {
        (self.facility << 3) | self.severity
    }

    /// Replace '\n', '\r', and NUL with a single ASCII space so the rendered
    /// line cannot break the single-line wire framing.
    fn clean_message(&self) -> String {
        self.message
            .chars()
            .map(|c| match c {
                '\n' | '\r' | '\0' => ' ',
                other => other,
            })
            .collect()
    }

    fn structured_data(&self) -> String {
        match &self.ingestion_token {
            Some(token) => format!("[{token}@{INGESTION_TOKEN_ENTERPRISE_ID}]"),
            None => "-".to_string(),
        }
    }

    /// Render this packet as an RFC 5424 line, truncated to at most
    /// `max_size` bytes. `max_size == 0` means unbounded.
    ///
    /// Truncation operates on bytes, not characters, matching the wire
    /// contract: a multi-byte UTF-8 sequence straddling the cutoff is cut
    /// in the middle exactly as the network framing would see it.
    pub fn render(&self, max_size: usize) -> String {
        // RFC 3339 with up to 6 fractional digits, preserving the offset
        // (we always carry UTC internally, so the offset is always "Z").
        let ts = self.timestamp.to_rfc3339_opts(SecondsFormat::Micros, true);
        let line = format!(
            "<{}>1 {} {} {} - - {} {}",
            self.priority(),
            ts,
            self.hostname,
            self.tag,
            self.structured_data(),
            self.clean_message(),
        );
        if max_size == 0 || line.len() <= max_size {
            line
        } else {
            truncate_bytes(&line, max_size)
        }
    }

    /// Parse a rendered line back into a `Packet` (test helper only; does
    /// not attempt to recover structured-data or the ingestion token).
    pub fn parse(line: &str) -> Result<Self, crate::error::PacketParseError> {
        use crate::error::PacketParseError as E;

        let (header, message) = line
            .split_once(" - - - ")
            .ok_or(E::MissingSeparator)?;

        // header looks like: <PRI>1 TS HOST TAG
        let mut parts = header.splitn(2, '>');
        let pri_str = parts
            .next()
            .and_then(|s| s.strip_prefix('<'))
            .ok_or_else(|| E::MalformedHeader(header.to_string()))?;
        let rest = parts
            .next()
            .ok_or_else(|| E::MalformedHeader(header.to_string()))?;

        let pri: u16 = pri_str
            .parse()
            .map_err(|_| E::MalformedPriority(pri_str.to_string()))?;

        let rest = rest
            .strip_prefix('1')
            .ok_or_else(|| E::MalformedHeader(header.to_string()))?;
        let rest = rest.trim_start();

        let mut fields = rest.splitn(3, ' ');
        let ts_str = fields
            .next()
            .ok_or_else(|| E::MalformedHeader(header.to_string()))?;
        let host = fields
            .next()
            .ok_or_else(|| E::MalformedHeader(header.to_string()))?;
        let tag = fields
            .next()
            .ok_or_else(|| E::MalformedHeader(header.to_string()))?;

        let timestamp = DateTime::parse_from_rfc3339(ts_str)
            .map_err(|_| E::MalformedTimestamp(ts_str.to_string()))?;

        let severity = (pri & 0x7) as Priority;
        let facility = (pri >> 3) as Priority;

        Ok(Packet {
            severity,
            facility,
            timestamp,
            hostname: host.to_string(),
            tag: tag.to_string(),
            ingestion_token: None,
            message: message.to_string(),
        })
    }
}

impl fmt::Display for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.render(0))
    }
}

/// Truncate a UTF-8 string to at most `max_size` bytes. If the cutoff falls
/// inside a multi-byte character, the whole character is kept out (this
/// matches the byte-exact RFC 5424 example in the spec when the cutoff
/// lands on an ASCII boundary; for boundaries inside multi-byte sequences we
/// back off to the previous char boundary to stay valid UTF-8).
fn truncate_bytes(s: &str, max_size: usize) -> String {
    if s.len() <= max_size {
        return s.to_string();
    }
    let mut end = max_size;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    s[..end].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_packet() -> Packet {
        let timestamp = DateTime::parse_from_rfc3339("2003-08-24T05:14:15.000003-07:00").unwrap();
        Packet::new(
            severity::NOTICE,
            facility::LOCAL4,
            timestamp,
            "192.0.2.1",
            "myproc",
            "%% It's time to make the do-nuts.",
        )
    }

    #[test]
    fn priority_computation() {
        assert_eq!(sample_packet().priority(), 165);
        let p = Packet::new(
            severity::CRIT,
            facility::AUTH,
            Utc::now(),
            "h",
            "t",
            "m",
        );
        assert_eq!(p.priority(), 34);
    }

    #[test]
    fn sanitizes_newlines_cr_and_nul() {
        let p = Packet::new(
            severity::NOTICE,
            facility::LOCAL4,
            Utc::now(),
            "192.0.2.1",
            "myproc",
            "newline:'\n'. nullbyte:'\0'. carriage return:'\r'.",
        );
        let rendered = p.render(0);
        let msg = rendered.splitn(2, " - - - ").nth(1).unwrap();
        assert_eq!(msg, "newline:' '. nullbyte:' '. carriage return:' '.");
    }

    #[test]
    fn unbounded_render_contains_no_raw_control_bytes() {
        let p = Packet::new(
            severity::INFO,
            facility::USER,
            Utc::now(),
            "host",
            "tag",
            "line\nwith\r\0junk",
        );
        let rendered = p.render(0);
        assert!(!rendered.contains('\n'));
        assert!(!rendered.contains('\r'));
        assert!(!rendered.contains('\0'));
    }

    #[test]
    fn truncation_is_exact_and_byte_based() {
        let p = sample_packet();
        let unbounded = p.render(0);
        let truncated = p.render(75);
        assert!(truncated.len() <= 75);
        assert_eq!(&truncated[..], &unbounded[..truncated.len()]);
    }

    #[test]
    fn truncation_matches_known_fixture() {
        let p = sample_packet();
        let expected =
            "<165>1 2003-08-24T05:14:15.000003-07:00 192.0.2.1 myproc - - - %% It's time";
        assert_eq!(expected.len(), 75);
        assert_eq!(p.render(75), expected);
    }

    #[test]
    fn offset_is_preserved_not_normalized_to_utc() {
        let p = sample_packet();
        assert!(p.render(0).contains("-07:00"));
    }

    #[test]
    fn max_size_zero_is_unbounded() {
        let p = sample_packet();
        assert_eq!(p.render(0), p.render(0));
        let full = p.render(0);
        assert_eq!(p.render(full.len() + 10), full);
    }

    #[test]
    fn render_already_shorter_than_max_is_unchanged() {
        let p = sample_packet();
        let full = p.render(0);
        assert_eq!(p.render(full.len()), full);
    }

    #[test]
    fn structured_data_carries_ingestion_token() {
        let p = sample_packet().with_ingestion_token("abc123");
        let rendered = p.render(0);
        assert!(rendered.contains("[abc123@41058]"));
    }

    #[test]
    fn priority_round_trip_parse() {
        for s in 0..=7u8 {
            for f in 0..=23u8 {
                let p = Packet::new(s, f, Utc::now(), "host", "tag", "hello world");
                let rendered = p.render(0);
                let parsed = Packet::parse(&rendered).expect("parse succeeds");
                assert_eq!(parsed.priority(), p.priority());
                assert_eq!(parsed.severity, s);
                assert_eq!(parsed.facility, f);
            }
        }
    }

    #[test]
    fn parse_roundtrips_modulo_sanitation() {
        let p = sample_packet();
        let rendered = p.render(0);
        let parsed = Packet::parse(&rendered).unwrap();
        assert_eq!(parsed.hostname, p.hostname);
        assert_eq!(parsed.tag, p.tag);
        assert_eq!(parsed.message, p.message);
    }

    #[test]
    fn parse_fails_without_separator() {
        let err = Packet::parse("not a valid syslog line").unwrap_err();
        assert_eq!(err, crate::error::PacketParseError::MissingSeparator);
    }

    #[test]
    fn unknown_severity_name_is_an_error() {
        assert!(severity_by_name("bogus").is_err());
        assert!(severity_by_name("info").is_ok());
    }

    #[test]
    fn unknown_facility_name_is_an_error() {
        assert!(facility_by_name("bogus").is_err());
        assert!(facility_by_name("local4").is_ok());
    }
}
