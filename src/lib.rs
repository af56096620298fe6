//! # Evasive Replay - Core Library
//!
//! Offline threshold tuning for request-rate DoS detectors.
//!
//! Evasive Replay reads archived web server access logs in chronological
//! order and replays every request through the same counting rules a
//! live "too many requests" module would apply. It then reports which clients
//! would have been tripped, how hard, and how often they came back.
//!
//! Two detection categories run side by side, each with its own interval,
//! threshold and key store:
//! - **page**: same client hitting the same resource.
//! - **site**: same client hitting anything.
//!
//! ## Pipeline
//! `log_sources` (read, parse, filter, normalize) -> `detection` (rate state,
//! garbage collection, threshold evaluation) -> `report` (sorted summary).
//!
//! Everything is single-threaded. Events must arrive in non-decreasing
//! timestamp order across the whole run.

pub mod detection;
pub mod log_sources;
pub mod report;

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Unified error type for Evasive Replay.
#[derive(Error, Debug)]
pub enum ReplayError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Input error: {0}")]
    Input(String),

    #[error("Out-of-order event at {source_label}: timestamp {timestamp} precedes {previous}")]
    OutOfOrder {
        previous: i64,
        timestamp: i64,
        source_label: String,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML deserialization error: {0}")]
    TomlDe(#[from] toml::de::Error),
}

pub type ReplayResult<T> = Result<T, ReplayError>;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Top-level configuration.
///
/// Loaded from `evasive-replay.toml` in the working directory or a path
/// supplied via CLI flag. Command-line options override individual values.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ReplayConfig {
    /// Rate rules for both detection categories.
    pub detection: DetectionConfig,

    /// Key store garbage collection.
    pub gc: GcConfig,

    /// Log reading and request normalization.
    pub input: InputConfig,

    /// Report output.
    pub report: ReportConfig,
}

/// How the per-key rate state counts requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum CountingMode {
    /// Renewing single timer: the count resets only after a quiet gap of at
    /// least one interval.
    #[default]
    Decay,

    /// Exact sliding window over the last interval seconds.
    Window,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    /// Counting mode shared by both categories.
    pub mode: CountingMode,

    /// Interval in seconds for same-client-same-resource counting.
    pub page_interval_secs: i64,

    /// Hits on one resource within the interval that trip the page rule.
    pub page_threshold: u64,

    /// Interval in seconds for same-client-any-resource counting.
    pub site_interval_secs: i64,

    /// Hits on the whole site within the interval that trip the site rule.
    pub site_threshold: u64,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            mode: CountingMode::Decay,
            page_interval_secs: 1,
            page_threshold: 2,
            site_interval_secs: 1,
            site_threshold: 50,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GcConfig {
    /// Store size at or below which no sweep is ever attempted.
    pub scan_size: usize,

    /// Once above `scan_size`, sweep on every Nth new key.
    pub prune_period: u64,
}

impl Default for GcConfig {
    fn default() -> Self {
        Self {
            scan_size: 3097,
            prune_period: 100,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct InputConfig {
    /// Access log line layout.
    pub layout: log_sources::web_log::LogLayout,

    /// Drop everything from the first `?` of the request URI.
    pub strip_query: bool,

    /// Regular expressions matched against the raw request URI. Matching
    /// requests are skipped entirely.
    pub ignore_patterns: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ReportConfig {
    pub format: report::ReportFormat,
}

impl ReplayConfig {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &Path) -> ReplayResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: ReplayConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Write the default configuration to a TOML file.
    pub fn write_default(path: &Path) -> ReplayResult<()> {
        let content = toml::to_string_pretty(&Self::default())
            .map_err(|e| ReplayError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Reject parameter values the counting rules cannot run with.
    ///
    /// Must pass before any input is read.
    pub fn validate(&self) -> ReplayResult<()> {
        let d = &self.detection;
        if d.page_interval_secs <= 0 {
            return Err(ReplayError::Config(format!(
                "page_interval_secs must be positive, got {}",
                d.page_interval_secs
            )));
        }
        if d.site_interval_secs <= 0 {
            return Err(ReplayError::Config(format!(
                "site_interval_secs must be positive, got {}",
                d.site_interval_secs
            )));
        }
        if d.page_threshold == 0 {
            return Err(ReplayError::Config("page_threshold must be at least 1".into()));
        }
        if d.site_threshold == 0 {
            return Err(ReplayError::Config("site_threshold must be at least 1".into()));
        }
        if self.gc.scan_size == 0 {
            return Err(ReplayError::Config("gc.scan_size must be positive".into()));
        }
        if self.gc.prune_period == 0 {
            return Err(ReplayError::Config("gc.prune_period must be positive".into()));
        }
        for pattern in &self.input.ignore_patterns {
            regex::Regex::new(pattern).map_err(|e| {
                ReplayError::Config(format!("invalid ignore pattern {:?}: {}", pattern, e))
            })?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Core Types
// ---------------------------------------------------------------------------

/// A single normalized request.
///
/// This is the atomic unit of observation. The log reader produces these;
/// the detection engine consumes each one exactly once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    /// Request time in epoch seconds.
    pub timestamp: i64,

    /// Client identity (host field of the log line).
    pub actor_id: String,

    /// Normalized request path.
    pub resource_key: String,

    /// Where the request came from, as `path:line`.
    pub source_label: String,
}

impl Event {
    pub fn new(
        timestamp: i64,
        actor_id: impl Into<String>,
        resource_key: impl Into<String>,
        source_label: impl Into<String>,
    ) -> Self {
        Self {
            timestamp,
            actor_id: actor_id.into(),
            resource_key: resource_key.into(),
            source_label: source_label.into(),
        }
    }
}
