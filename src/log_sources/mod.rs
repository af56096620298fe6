//! Log reading and event normalization.
//!
//! Turns access log files into a stream of `Event`s. Each input file is read
//! line by line (gzip-compressed when its name ends in `.gz`). The line is
//! split by the configured `LogLayout`, its request line is validated, the
//! ignore patterns are applied, and the URI is normalized into a resource key.
//!
//! Lines that fail any of those steps are skipped and counted. Only a file
//! that cannot be opened or decompressed stops the run.

pub mod filter;
pub mod web_log;

use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::Path;

use flate2::read::MultiGzDecoder;
use serde::{Deserialize, Serialize};

use crate::{Event, InputConfig, ReplayError, ReplayResult};
use filter::RequestFilter;
use web_log::LogLayout;

/// Per-run line accounting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputStats {
    pub files: u64,
    pub lines: u64,
    pub events: u64,

    /// Lines not matching the layout, or with a bad request line or date.
    pub malformed: u64,

    /// Lines dropped by an ignore pattern.
    pub filtered: u64,
}

/// What became of a single input line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineOutcome {
    Event(Event),
    Malformed,
    Filtered,
}

pub struct LogReader {
    layout: LogLayout,
    filter: RequestFilter,
    stats: InputStats,
}

impl LogReader {
    pub fn new(layout: LogLayout, filter: RequestFilter) -> Self {
        Self {
            layout,
            filter,
            stats: InputStats::default(),
        }
    }

    pub fn from_config(config: &InputConfig) -> ReplayResult<Self> {
        Ok(Self::new(config.layout, RequestFilter::from_config(config)?))
    }

    /// Normalize one line. Does not touch the run statistics.
    pub fn parse_line(&self, line: &str, source_label: &str) -> LineOutcome {
        let Some(raw) = self.layout.parse_line(line) else {
            return LineOutcome::Malformed;
        };
        let Some(uri) = web_log::parse_request_line(raw.request) else {
            return LineOutcome::Malformed;
        };
        if self.filter.is_ignored(uri) {
            return LineOutcome::Filtered;
        }
        let Some(timestamp) = web_log::parse_clf_timestamp(raw.date) else {
            return LineOutcome::Malformed;
        };
        LineOutcome::Event(Event::new(
            timestamp,
            raw.host,
            self.filter.normalize(uri),
            source_label,
        ))
    }

    /// Replay every line of `path` into `sink`, in file order.
    ///
    /// Stops at the first error from opening, reading or the sink.
    pub fn replay_file<F>(&mut self, path: &Path, sink: F) -> ReplayResult<()>
    where
        F: FnMut(Event) -> ReplayResult<()>,
    {
        let reader = open_input(path)?;
        log::info!("Replaying {}", path.display());
        self.replay_reader(reader, &path.display().to_string(), sink)
    }

    /// Replay lines from any buffered reader. Source labels are
    /// `<name>:<line number>`, counting from 1.
    pub fn replay_reader<R, F>(&mut self, mut reader: R, name: &str, mut sink: F) -> ReplayResult<()>
    where
        R: BufRead,
        F: FnMut(Event) -> ReplayResult<()>,
    {
        self.stats.files += 1;
        let mut buf = Vec::new();
        let mut line_no: u64 = 0;

        loop {
            buf.clear();
            let read = reader
                .read_until(b'\n', &mut buf)
                .map_err(|e| ReplayError::Input(format!("{}: {}", name, e)))?;
            if read == 0 {
                break;
            }
            line_no += 1;

            // Logs are not guaranteed to be valid UTF-8.
            let text = String::from_utf8_lossy(&buf);
            let line = text.trim_end_matches(['\n', '\r']);
            if line.is_empty() {
                continue;
            }
            self.stats.lines += 1;

            let label = format!("{}:{}", name, line_no);
            match self.parse_line(line, &label) {
                LineOutcome::Event(event) => {
                    self.stats.events += 1;
                    sink(event)?;
                }
                LineOutcome::Malformed => {
                    self.stats.malformed += 1;
                    log::trace!("Skipping malformed line {}", label);
                }
                LineOutcome::Filtered => {
                    self.stats.filtered += 1;
                    log::trace!("Ignoring filtered request {}", label);
                }
            }
        }

        Ok(())
    }

    pub fn stats(&self) -> InputStats {
        self.stats
    }
}

/// Open an input file, gunzipping it when the name ends in `.gz`. Every
/// member of a concatenated gzip file is read.
fn open_input(path: &Path) -> ReplayResult<Box<dyn BufRead>> {
    let file = File::open(path)
        .map_err(|e| ReplayError::Input(format!("cannot open {}: {}", path.display(), e)))?;
    let is_gzip = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("gz"));
    let inner: Box<dyn Read> = if is_gzip {
        Box::new(MultiGzDecoder::new(file))
    } else {
        Box::new(file)
    };
    Ok(Box::new(BufReader::new(inner)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reader(patterns: &[&str]) -> LogReader {
        let patterns: Vec<String> = patterns.iter().map(|p| p.to_string()).collect();
        LogReader::new(
            LogLayout::Common,
            RequestFilter::new(&patterns, true).expect("filter"),
        )
    }

    fn line(host: &str, ts: &str, request: &str) -> String {
        format!(r#"{} - - [{}] "{}" 200 512"#, host, ts, request)
    }

    #[test]
    fn test_parse_line_builds_event() {
        let r = reader(&[]);
        let l = line("10.0.0.1", "01/Jan/1970:00:01:00 +0000", "GET /docs/?page=2 HTTP/1.1");
        match r.parse_line(&l, "a.log:3") {
            LineOutcome::Event(e) => {
                assert_eq!(e, Event::new(60, "10.0.0.1", "/docs", "a.log:3"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_parse_line_rejections() {
        let r = reader(&[r"\.png$"]);
        let ts = "01/Jan/1970:00:01:00 +0000";
        assert_eq!(r.parse_line("junk", "x"), LineOutcome::Malformed);
        assert_eq!(r.parse_line(&line("h", ts, "-"), "x"), LineOutcome::Malformed);
        assert_eq!(r.parse_line(&line("h", "yesterday", "GET / HTTP/1.0"), "x"), LineOutcome::Malformed);
        assert_eq!(r.parse_line(&line("h", ts, "GET /logo.png HTTP/1.0"), "x"), LineOutcome::Filtered);
    }

    #[test]
    fn test_replay_reader_counts_and_labels() {
        let ts = "01/Jan/1970:00:00:05 +0000";
        let input = format!(
            "{}\r\n\nnot a line\n{}\n{}",
            line("a", ts, "GET / HTTP/1.1"),
            line("b", ts, "GET /x.png HTTP/1.1"),
            line("c", ts, "GET /y HTTP/1.1"),
        );
        let mut r = reader(&[r"\.png$"]);
        let mut events = Vec::new();
        r.replay_reader(input.as_bytes(), "mem", |e| {
            events.push(e);
            Ok(())
        })
        .expect("replay");

        let labels: Vec<&str> = events.iter().map(|e| e.source_label.as_str()).collect();
        assert_eq!(labels, vec!["mem:1", "mem:5"]);
        let stats = r.stats();
        assert_eq!(stats.files, 1);
        assert_eq!(stats.lines, 4);
        assert_eq!(stats.events, 2);
        assert_eq!(stats.malformed, 1);
        assert_eq!(stats.filtered, 1);
    }

    #[test]
    fn test_sink_error_stops_replay() {
        let ts = "01/Jan/1970:00:00:05 +0000";
        let input = format!("{}\n{}\n", line("a", ts, "GET / HTTP/1.1"), line("b", ts, "GET / HTTP/1.1"));
        let mut r = reader(&[]);
        let mut seen = 0;
        let result = r.replay_reader(input.as_bytes(), "mem", |_| {
            seen += 1;
            Err(ReplayError::Input("stop".into()))
        });
        assert!(result.is_err());
        assert_eq!(seen, 1);
    }

    #[test]
    fn test_missing_file_is_input_error() {
        let mut r = reader(&[]);
        let err = r
            .replay_file(Path::new("/nonexistent/evasive-replay/access.log"), |_| Ok(()))
            .unwrap_err();
        assert!(matches!(err, ReplayError::Input(_)));
    }
}
