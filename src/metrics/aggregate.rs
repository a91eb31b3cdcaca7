//! Per-scrape aggregate: metric -> database -> queue -> value
//!
//! # TigerStyle Invariants
//!
//! - First write wins: once (metric, database, queue) holds a value, later
//!   values for the same key are discarded
//! - Databases keep first-seen order; queues within a database are ordered
//!   by name

use std::collections::{BTreeMap, HashMap};

use super::set::MetricId;

/// Typed results for one queue, produced right after a batch round trip.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueCounts {
    pub queue: String,
    /// One entry per metric; `None` when the store rejected that command
    pub samples: Vec<(MetricId, Option<u64>)>,
}

impl QueueCounts {
    pub fn get(&self, metric: MetricId) -> Option<u64> {
        self.samples
            .iter()
            .find(|(id, _)| *id == metric)
            .and_then(|(_, value)| *value)
    }
}

/// Samples of one metric within one database
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseSeries {
    pub label: String,
    pub queues: BTreeMap<String, u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Aggregate {
    series: HashMap<MetricId, Vec<DatabaseSeries>>,
}

impl Aggregate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert one sample. Returns false when the key already held a value.
    pub fn record(&mut self, metric: MetricId, db: &str, queue: &str, value: u64) -> bool {
        let databases = self.series.entry(metric).or_default();
        let position = match databases.iter().position(|series| series.label == db) {
            Some(position) => position,
            None => {
                databases.push(DatabaseSeries {
                    label: db.to_string(),
                    queues: BTreeMap::new(),
                });
                databases.len() - 1
            }
        };

        let queues = &mut databases[position].queues;
        if queues.contains_key(queue) {
            return false;
        }
        queues.insert(queue.to_string(), value);
        true
    }

    /// Fold one database's batch results in. Absent values are skipped.
    /// Returns the number of samples actually inserted.
    pub fn fold(&mut self, db: &str, counts: &[QueueCounts]) -> usize {
        let mut inserted = 0;
        for queue in counts {
            for &(metric, value) in &queue.samples {
                if let Some(value) = value {
                    if self.record(metric, db, &queue.queue, value) {
                        inserted += 1;
                    }
                }
            }
        }
        inserted
    }

    pub fn get(&self, metric: MetricId, db: &str, queue: &str) -> Option<u64> {
        self.series(metric)
            .iter()
            .find(|series| series.label == db)
            .and_then(|series| series.queues.get(queue).copied())
    }

    /// All samples of `metric`, grouped by database
    pub fn series(&self, metric: MetricId) -> &[DatabaseSeries] {
        self.series.get(&metric).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn has_samples(&self, metric: MetricId) -> bool {
        self.series(metric).iter().any(|series| !series.queues.is_empty())
    }

    /// True when at least one sample of `metric` is non-zero
    pub fn has_nonzero(&self, metric: MetricId) -> bool {
        self.series(metric)
            .iter()
            .any(|series| series.queues.values().any(|value| *value > 0))
    }

    pub fn sample_count(&self) -> usize {
        self.series
            .values()
            .flatten()
            .map(|series| series.queues.len())
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.sample_count() == 0
    }
}
