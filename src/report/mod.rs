//! # Replay Report
//!
//! Snapshot of both categories' breach aggregates after a replay, plus run
//! statistics. Rows are sorted by last trip time (oldest first) and each row
//! carries a flag for clients tripped in both categories.
//!
//! Rendered as an aligned text table for operators or as JSON for scripts.

use std::collections::HashMap;
use std::fmt;

use chrono::DateTime;
use serde::{Deserialize, Serialize};

use crate::detection::evaluator::ActorAggregate;
use crate::detection::gc::GcStats;
use crate::detection::{Category, DetectionEngine};
use crate::log_sources::InputStats;
use crate::{CountingMode, ReplayResult};

/// Report output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ReportFormat {
    #[default]
    Text,
    Json,
}

/// One tripped client in one category.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportRow {
    pub actor_id: String,
    pub last_trip_time: i64,

    /// `last_trip_time` as `%Y-%m-%d %H:%M:%S` UTC.
    pub last_trip_at: String,
    pub last_trip_source: String,
    pub high_score: u64,
    pub high_score_duration: i64,
    pub recurrences: u64,

    /// Also tripped in the other category.
    pub cross_category: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategoryReport {
    pub category: Category,
    pub interval_secs: i64,
    pub threshold: u64,
    pub store_size: usize,
    pub gc: GcStats,
    pub rows: Vec<ReportRow>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplayReport {
    pub mode: CountingMode,
    pub input: InputStats,
    pub events: u64,
    pub page: CategoryReport,
    pub site: CategoryReport,
}

impl ReplayReport {
    /// Usually reached through `DetectionEngine::finish`.
    pub fn from_engine(engine: &DetectionEngine, input: InputStats) -> Self {
        Self {
            mode: engine.mode(),
            input,
            events: engine.event_count(),
            page: CategoryReport::build(engine, Category::Page),
            site: CategoryReport::build(engine, Category::Site),
        }
    }

    pub fn render(&self, format: ReportFormat) -> ReplayResult<String> {
        match format {
            ReportFormat::Text => Ok(self.to_text()),
            ReportFormat::Json => Ok(serde_json::to_string_pretty(self)?),
        }
    }

    pub fn to_text(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for ReplayReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Evasive Replay ({:?} mode)", self.mode)?;
        writeln!(
            f,
            "  Files: {}  Lines: {}  Events: {}  Malformed: {}  Filtered: {}",
            self.input.files, self.input.lines, self.events, self.input.malformed, self.input.filtered,
        )?;
        for section in [&self.page, &self.site] {
            writeln!(f)?;
            write!(f, "{}", section)?;
        }
        Ok(())
    }
}

impl CategoryReport {
    /// Rows for `category`, flagged against the opposite category's trips.
    pub fn build(engine: &DetectionEngine, category: Category) -> Self {
        let detector = engine.detector(category);
        let other = engine.detector(category.other());
        Self {
            category,
            interval_secs: detector.interval(),
            threshold: detector.threshold(),
            store_size: detector.store().len(),
            gc: detector.gc_stats(),
            rows: build_rows(detector.aggregates(), other.aggregates()),
        }
    }
}

impl fmt::Display for CategoryReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "[{}] threshold {} hits / {}s: {} client(s) tripped",
            self.category,
            self.threshold,
            self.interval_secs,
            self.rows.len(),
        )?;
        writeln!(
            f,
            "  GC: {} sweeps, {} keys evicted, peak {} keys, {} keys at end",
            self.gc.sweeps, self.gc.evicted, self.gc.peak_store_size, self.store_size,
        )?;
        if self.rows.is_empty() {
            return Ok(());
        }

        let actor_width = self
            .rows
            .iter()
            .map(|r| r.actor_id.len())
            .max()
            .unwrap_or(0)
            .max("CLIENT".len());
        writeln!(
            f,
            "  {:<aw$}  {:<19}  {:>10}  {:>6}  {:<5}  SOURCE",
            "CLIENT",
            "LAST TRIP (UTC)",
            "HIGH/SECS",
            "RECUR",
            "BOTH",
            aw = actor_width,
        )?;
        for row in &self.rows {
            writeln!(
                f,
                "  {:<aw$}  {:<19}  {:>10}  {:>6}  {:<5}  {}",
                row.actor_id,
                row.last_trip_at,
                format!("{}/{}", row.high_score, row.high_score_duration),
                row.recurrences,
                if row.cross_category { "yes" } else { "-" },
                row.last_trip_source,
                aw = actor_width,
            )?;
        }
        Ok(())
    }
}

/// Rows sorted ascending by last trip time, then client id.
pub fn build_rows(
    aggregates: &HashMap<String, ActorAggregate>,
    other: &HashMap<String, ActorAggregate>,
) -> Vec<ReportRow> {
    let mut rows: Vec<ReportRow> = aggregates
        .iter()
        .map(|(actor, agg)| ReportRow {
            actor_id: actor.clone(),
            last_trip_time: agg.last_trip_time,
            last_trip_at: format_epoch(agg.last_trip_time),
            last_trip_source: agg.last_trip_source.clone(),
            high_score: agg.high_score.count,
            high_score_duration: agg.high_score.duration,
            recurrences: agg.recurrence_count,
            cross_category: other.contains_key(actor),
        })
        .collect();
    rows.sort_by(|a, b| {
        a.last_trip_time
            .cmp(&b.last_trip_time)
            .then_with(|| a.actor_id.cmp(&b.actor_id))
    });
    rows
}

fn format_epoch(secs: i64) -> String {
    DateTime::from_timestamp(secs, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| secs.to_string())
}
