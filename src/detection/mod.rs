//! # Detection Engine
//!
//! Runs every normalized `Event` through two independent detectors:
//!
//! - **page**: keyed by client + resource, catches hammering of one URL.
//! - **site**: keyed by client alone, catches overall request floods.
//!
//! Each detector owns its own `RateStore`, `GarbageCollector` and
//! `ThresholdEvaluator`, built from its category's interval and threshold.
//! The only thing the two share is client identity, which the report uses to
//! flag clients caught by both.
//!
//! Per event and per detector the order is fixed:
//! store update -> threshold evaluation -> garbage collection.

pub mod evaluator;
pub mod gc;
pub mod rate_state;

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::log_sources::InputStats;
use crate::report::ReplayReport;
use crate::{CountingMode, DetectionConfig, Event, GcConfig, ReplayError, ReplayResult};
use evaluator::{ActorAggregate, Breach, ThresholdEvaluator};
use gc::{GarbageCollector, GcStats};
use rate_state::RateStore;

/// The two detection categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    /// Same client, same resource.
    Page,

    /// Same client, any resource.
    Site,
}

impl Category {
    /// Store key for an event in this category.
    pub fn key(&self, event: &Event) -> String {
        match self {
            Category::Page => format!("{} {}", event.actor_id, event.resource_key),
            Category::Site => event.actor_id.clone(),
        }
    }

    pub fn other(&self) -> Category {
        match self {
            Category::Page => Category::Site,
            Category::Site => Category::Page,
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Category::Page => write!(f, "page"),
            Category::Site => write!(f, "site"),
        }
    }
}

/// Rate store, collector and evaluator for one category.
pub struct Detector {
    category: Category,
    store: RateStore,
    gc: GarbageCollector,
    evaluator: ThresholdEvaluator,
}

impl Detector {
    pub fn new(
        category: Category,
        mode: CountingMode,
        interval: i64,
        threshold: u64,
        gc_config: &GcConfig,
    ) -> Self {
        Self {
            category,
            store: RateStore::new(mode, interval),
            gc: GarbageCollector::new(gc_config),
            evaluator: ThresholdEvaluator::new(threshold, interval),
        }
    }

    /// Fully process one event: update its key, evaluate, then maybe sweep.
    pub fn observe(&mut self, event: &Event) -> Option<Breach> {
        let key = self.category.key(event);
        let update = self.store.record(&key, event.timestamp);

        let breach = self.evaluator.evaluate(
            &event.actor_id,
            update.reading,
            event.timestamp,
            &event.source_label,
        );

        if let Some(ref b) = breach {
            log::debug!(
                "[{}] {} tripped at {} with {} hits over {}s ({})",
                self.category,
                event.actor_id,
                event.timestamp,
                b.reading.hit_count,
                b.reading.duration,
                event.source_label,
            );
        }

        if let Some(sweep) = self.gc.after_update(&mut self.store, update.inserted, event.timestamp) {
            log::trace!(
                "[{}] swept {} keys at {}, {} remain",
                self.category,
                sweep.evicted,
                event.timestamp,
                sweep.remaining,
            );
        }

        breach
    }

    pub fn category(&self) -> Category {
        self.category
    }

    pub fn threshold(&self) -> u64 {
        self.evaluator.threshold()
    }

    pub fn interval(&self) -> i64 {
        self.evaluator.interval()
    }

    pub fn store(&self) -> &RateStore {
        &self.store
    }

    pub fn aggregates(&self) -> &HashMap<String, ActorAggregate> {
        self.evaluator.aggregates()
    }

    pub fn gc_stats(&self) -> GcStats {
        self.gc.stats()
    }
}

/// Breaches caused by a single event, one slot per category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EventOutcome {
    pub page: Option<Breach>,
    pub site: Option<Breach>,
}

impl EventOutcome {
    pub fn is_breach(&self) -> bool {
        self.page.is_some() || self.site.is_some()
    }
}

/// Owns both detectors and enforces chronological input.
pub struct DetectionEngine {
    page: Detector,
    site: Detector,

    /// Timestamp of the last accepted event.
    last_timestamp: Option<i64>,

    /// Events accepted so far.
    events: u64,
}

impl DetectionEngine {
    pub fn new(config: &DetectionConfig, gc_config: &GcConfig) -> Self {
        Self {
            page: Detector::new(
                Category::Page,
                config.mode,
                config.page_interval_secs,
                config.page_threshold,
                gc_config,
            ),
            site: Detector::new(
                Category::Site,
                config.mode,
                config.site_interval_secs,
                config.site_threshold,
                gc_config,
            ),
            last_timestamp: None,
            events: 0,
        }
    }

    /// Feed one event to both detectors.
    ///
    /// Timestamps must be non-decreasing over the whole run. An event older
    /// than its predecessor is refused with `ReplayError::OutOfOrder` and
    /// leaves all state untouched.
    pub fn process_event(&mut self, event: &Event) -> ReplayResult<EventOutcome> {
        if let Some(previous) = self.last_timestamp {
            if event.timestamp < previous {
                return Err(ReplayError::OutOfOrder {
                    previous,
                    timestamp: event.timestamp,
                    source_label: event.source_label.clone(),
                });
            }
        }
        self.last_timestamp = Some(event.timestamp);
        self.events += 1;

        Ok(EventOutcome {
            page: self.page.observe(event),
            site: self.site.observe(event),
        })
    }

    pub fn page(&self) -> &Detector {
        &self.page
    }

    pub fn site(&self) -> &Detector {
        &self.site
    }

    pub fn detector(&self, category: Category) -> &Detector {
        match category {
            Category::Page => &self.page,
            Category::Site => &self.site,
        }
    }

    pub fn event_count(&self) -> u64 {
        self.events
    }

    /// Counting mode shared by both detectors.
    pub fn mode(&self) -> CountingMode {
        self.page.store().mode()
    }

    /// Snapshot both categories into a report. May be called at any point;
    /// the engine keeps accepting events afterwards.
    pub fn finish(&self, input: InputStats) -> ReplayReport {
        ReplayReport::from_engine(self, input)
    }
}
