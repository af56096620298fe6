//! # Threshold Evaluator
//!
//! Turns rate readings into breaches and folds breaches into one
//! `ActorAggregate` per client. An aggregate is created on a client's first
//! breach and kept for the rest of the run.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::rate_state::RateReading;

/// Largest hit count seen for a client, with the duration it took.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HighScore {
    pub count: u64,
    pub duration: i64,
}

impl From<RateReading> for HighScore {
    fn from(reading: RateReading) -> Self {
        Self {
            count: reading.hit_count,
            duration: reading.duration,
        }
    }
}

/// Breach history of one client within one category.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActorAggregate {
    /// Timestamp of the latest breach.
    pub last_trip_time: i64,

    /// Source label of the request behind the latest breach.
    pub last_trip_source: String,

    /// Only ever replaced by a strictly larger count.
    pub high_score: HighScore,

    /// Times the client breached again after a gap longer than the interval.
    pub recurrence_count: u64,
}

/// What a single breaching request changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Breach {
    pub reading: RateReading,

    /// First breach recorded for this client.
    pub first: bool,

    /// The client came back after cooling down for more than one interval.
    pub recurred: bool,

    /// The high score was replaced.
    pub new_high_score: bool,
}

pub struct ThresholdEvaluator {
    threshold: u64,
    interval: i64,
    aggregates: HashMap<String, ActorAggregate>,
}

impl ThresholdEvaluator {
    pub fn new(threshold: u64, interval: i64) -> Self {
        Self {
            threshold,
            interval,
            aggregates: HashMap::new(),
        }
    }

    /// Check one reading against the threshold and update the client's
    /// aggregate on breach. Readings below the threshold change nothing.
    pub fn evaluate(
        &mut self,
        actor_id: &str,
        reading: RateReading,
        timestamp: i64,
        source_label: &str,
    ) -> Option<Breach> {
        if reading.hit_count < self.threshold {
            return None;
        }

        let Some(aggregate) = self.aggregates.get_mut(actor_id) else {
            self.aggregates.insert(
                actor_id.to_string(),
                ActorAggregate {
                    last_trip_time: timestamp,
                    last_trip_source: source_label.to_string(),
                    high_score: reading.into(),
                    recurrence_count: 0,
                },
            );
            return Some(Breach {
                reading,
                first: true,
                recurred: false,
                new_high_score: true,
            });
        };

        let recurred = timestamp - aggregate.last_trip_time > self.interval;
        if recurred {
            aggregate.recurrence_count += 1;
        }

        aggregate.last_trip_time = timestamp;
        aggregate.last_trip_source.clear();
        aggregate.last_trip_source.push_str(source_label);

        let new_high_score = reading.hit_count > aggregate.high_score.count;
        if new_high_score {
            aggregate.high_score = reading.into();
        }

        Some(Breach {
            reading,
            first: false,
            recurred,
            new_high_score,
        })
    }

    pub fn threshold(&self) -> u64 {
        self.threshold
    }

    pub fn interval(&self) -> i64 {
        self.interval
    }

    pub fn aggregates(&self) -> &HashMap<String, ActorAggregate> {
        &self.aggregates
    }
}
