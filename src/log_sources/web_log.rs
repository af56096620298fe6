//! Parsers for Apache/Nginx access log layouts.
//!
//! - `common`:   `host ident user [DD/Mon/YYYY:HH:MM:SS +ZZZZ] "request" status bytes`
//! - `combined`: `common` followed by `"referer" "user-agent"`
//! - `vhost`:    `vhost[:port] ` followed by `combined`
//!
//! Only the host, date and request line are extracted. Everything else on
//! the line is matched to validate the layout and then discarded.

use chrono::DateTime;
use regex::Regex;
use serde::de::{self, Deserializer, Visitor};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use crate::ReplayError;

/// `host ident user [date] "request" status bytes`, shared by every layout.
const CLF_BODY: &str =
    r#"(?P<host>\S+) \S+ \S+ \[(?P<date>[^\]]+)\] "(?P<request>(?:[^"\\]|\\.)*)" (?:\d{3}|-) \S+"#;

/// ` "referer" "user-agent"`, quoted fields allowing backslash escapes.
const COMBINED_TAIL: &str = r#" "(?:[^"\\]|\\.)*" "(?:[^"\\]|\\.)*""#;

static RE_COMMON: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(&format!("^{}", CLF_BODY)).expect("regex"));

static RE_COMBINED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!("^{}{}", CLF_BODY, COMBINED_TAIL)).expect("regex")
});

static RE_VHOST: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(r"^\S+ {}{}", CLF_BODY, COMBINED_TAIL)).expect("regex")
});

/// `METHOD URI [HTTP/x.y]`
static RE_REQUEST: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Z]+ (\S+)(?: HTTP/\d+(?:\.\d+)?)?$").expect("regex")
});

/// Access log line layout, chosen once per run.
///
/// Config files may name it (`"combined"`) or use its number, either as a
/// string (`"1"`) or a bare integer (`1`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogLayout {
    /// Common Log Format.
    #[value(alias = "0")]
    Common,

    /// Combined Log Format (common + referer + user agent).
    #[default]
    #[value(alias = "1")]
    Combined,

    /// Combined prefixed with the virtual host.
    #[value(alias = "2")]
    Vhost,
}

impl FromStr for LogLayout {
    type Err = ReplayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "common" | "0" => Ok(LogLayout::Common),
            "combined" | "1" => Ok(LogLayout::Combined),
            "vhost" | "2" => Ok(LogLayout::Vhost),
            other => Err(ReplayError::Config(format!(
                "unknown log layout {:?}, expected common/combined/vhost or 0/1/2",
                other
            ))),
        }
    }
}

struct LogLayoutVisitor;

impl Visitor<'_> for LogLayoutVisitor {
    type Value = LogLayout;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a log layout name or number 0-2")
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<LogLayout, E> {
        v.parse().map_err(E::custom)
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<LogLayout, E> {
        LogLayout::from_index(v)
            .ok_or_else(|| E::invalid_value(de::Unexpected::Unsigned(v), &self))
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<LogLayout, E> {
        u64::try_from(v)
            .ok()
            .and_then(LogLayout::from_index)
            .ok_or_else(|| E::invalid_value(de::Unexpected::Signed(v), &self))
    }
}

impl<'de> Deserialize<'de> for LogLayout {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(LogLayoutVisitor)
    }
}

/// The three fields a layout extracts, borrowed from the line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawRequest<'a> {
    pub host: &'a str,
    pub date: &'a str,
    pub request: &'a str,
}

impl LogLayout {
    fn from_index(index: u64) -> Option<Self> {
        match index {
            0 => Some(LogLayout::Common),
            1 => Some(LogLayout::Combined),
            2 => Some(LogLayout::Vhost),
            _ => None,
        }
    }

    fn regex(&self) -> &'static Regex {
        match self {
            LogLayout::Common => &RE_COMMON,
            LogLayout::Combined => &RE_COMBINED,
            LogLayout::Vhost => &RE_VHOST,
        }
    }

    /// Split a line into host, date and request. `None` if the line does
    /// not follow this layout.
    pub fn parse_line<'a>(&self, line: &'a str) -> Option<RawRequest<'a>> {
        let caps = self.regex().captures(line)?;
        Some(RawRequest {
            host: caps.name("host")?.as_str(),
            date: caps.name("date")?.as_str(),
            request: caps.name("request")?.as_str(),
        })
    }
}

/// Extract the URI from a request line, rejecting anything that is not
/// `METHOD URI [PROTOCOL]`.
pub fn parse_request_line(request: &str) -> Option<&str> {
    RE_REQUEST
        .captures(request)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
}

/// Parse `DD/Mon/YYYY:HH:MM:SS +ZZZZ` into epoch seconds.
pub fn parse_clf_timestamp(ts: &str) -> Option<i64> {
    DateTime::parse_from_str(ts, "%d/%b/%Y:%H:%M:%S %z")
        .ok()
        .map(|dt| dt.timestamp())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::InputConfig;

    #[test]
    fn test_layout_config_accepts_names_and_numbers() {
        let layout = |text: &str| toml::from_str::<InputConfig>(text).map(|c| c.layout);
        assert_eq!(layout(r#"layout = "vhost""#).expect("name"), LogLayout::Vhost);
        assert_eq!(layout(r#"layout = "0""#).expect("numeric string"), LogLayout::Common);
        assert_eq!(layout("layout = 2").expect("integer"), LogLayout::Vhost);
        assert_eq!(layout("layout = 1").expect("integer"), LogLayout::Combined);
        assert!(layout("layout = 3").is_err());
        assert!(layout("layout = -1").is_err());
        assert!(layout(r#"layout = "apache""#).is_err());

        let text = toml::to_string(&InputConfig::default()).expect("serialize");
        assert!(text.contains(r#"layout = "combined""#));
    }

    const COMMON: &str = r#"10.1.1.1 - frank [10/Oct/2024:13:55:36 +0000] "GET /index.html HTTP/1.1" 200 2326"#;
    const COMBINED: &str = r#"10.1.1.1 - - [10/Oct/2024:13:55:36 +0000] "GET /a?b=1 HTTP/1.1" 404 - "http://ref/" "Mozilla/5.0 (X11)""#;
    const VHOST: &str = r#"www.example.com:443 10.1.1.1 - - [10/Oct/2024:13:55:36 +0000] "POST /login HTTP/2.0" 302 0 "-" "curl/8.0""#;

    #[test]
    fn test_common_layout() {
        let raw = LogLayout::Common.parse_line(COMMON).expect("should parse");
        assert_eq!(raw.host, "10.1.1.1");
        assert_eq!(raw.date, "10/Oct/2024:13:55:36 +0000");
        assert_eq!(raw.request, "GET /index.html HTTP/1.1");
    }

    #[test]
    fn test_combined_layout() {
        let raw = LogLayout::Combined.parse_line(COMBINED).expect("should parse");
        assert_eq!(raw.host, "10.1.1.1");
        assert_eq!(raw.request, "GET /a?b=1 HTTP/1.1");
        // Common lines lack the referer and user agent.
        assert!(LogLayout::Combined.parse_line(COMMON).is_none());
    }

    #[test]
    fn test_vhost_layout() {
        let raw = LogLayout::Vhost.parse_line(VHOST).expect("should parse");
        assert_eq!(raw.host, "10.1.1.1");
        assert_eq!(raw.request, "POST /login HTTP/2.0");
    }

    #[test]
    fn test_escaped_quote_in_request() {
        let line = r#"1.2.3.4 - - [10/Oct/2024:13:55:36 +0000] "GET /q\"x HTTP/1.0" 200 5 "-" "ua""#;
        let raw = LogLayout::Combined.parse_line(line).expect("should parse");
        assert_eq!(raw.request, r#"GET /q\"x HTTP/1.0"#);
    }

    #[test]
    fn test_garbage_returns_none() {
        for layout in [LogLayout::Common, LogLayout::Combined, LogLayout::Vhost] {
            assert!(layout.parse_line("").is_none());
            assert!(layout.parse_line("not a log line").is_none());
        }
    }

    #[test]
    fn test_request_line_validation() {
        assert_eq!(parse_request_line("GET / HTTP/1.1"), Some("/"));
        assert_eq!(parse_request_line("GET /old"), Some("/old"));
        assert_eq!(parse_request_line("HEAD /x HTTP/2"), Some("/x"));
        assert_eq!(parse_request_line("-"), None);
        assert_eq!(parse_request_line("\\x16\\x03\\x01"), None);
        assert_eq!(parse_request_line("get / HTTP/1.1"), None);
        assert_eq!(parse_request_line("GET / HTTP/1.1 extra"), None);
    }

    #[test]
    fn test_timestamp_with_offset() {
        assert_eq!(parse_clf_timestamp("01/Jan/1970:00:00:10 +0000"), Some(10));
        // 23:59:59 at -0500 is 04:59:59 UTC the next day.
        let west = parse_clf_timestamp("25/Dec/2024:23:59:59 -0500").expect("parse");
        let utc = parse_clf_timestamp("26/Dec/2024:04:59:59 +0000").expect("parse");
        assert_eq!(west, utc);
        assert_eq!(parse_clf_timestamp("32/Dec/2024:00:00:00 +0000"), None);
        assert_eq!(parse_clf_timestamp("garbage"), None);
    }
}
