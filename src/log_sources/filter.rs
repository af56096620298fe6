//! Request filtering and resource key normalization.

use regex::Regex;

use crate::{InputConfig, ReplayError, ReplayResult};

/// Ignore patterns plus URI normalization rules.
#[derive(Debug, Clone, Default)]
pub struct RequestFilter {
    ignore: Vec<Regex>,
    strip_query: bool,
}

impl RequestFilter {
    pub fn new(patterns: &[String], strip_query: bool) -> ReplayResult<Self> {
        let ignore = patterns
            .iter()
            .map(|p| {
                Regex::new(p).map_err(|e| {
                    ReplayError::Config(format!("invalid ignore pattern {:?}: {}", p, e))
                })
            })
            .collect::<ReplayResult<Vec<_>>>()?;
        Ok(Self { ignore, strip_query })
    }

    pub fn from_config(config: &InputConfig) -> ReplayResult<Self> {
        Self::new(&config.ignore_patterns, config.strip_query)
    }

    /// True when the raw request URI matches any ignore pattern.
    pub fn is_ignored(&self, uri: &str) -> bool {
        self.ignore.iter().any(|re| re.is_match(uri))
    }

    /// Resource key for a URI: optionally drop the query string, then drop
    /// trailing slashes. The root path stays `/`.
    pub fn normalize<'a>(&self, uri: &'a str) -> &'a str {
        let path = if self.strip_query {
            uri.split_once('?').map_or(uri, |(path, _)| path)
        } else {
            uri
        };
        let trimmed = path.trim_end_matches('/');
        if trimmed.is_empty() && path.starts_with('/') {
            "/"
        } else {
            trimmed
        }
    }
}
