//! Queue Metrics
//!
//! - `set`: the static list of metrics and the command reading each one
//! - `aggregate`: per-scrape metric -> database -> queue -> value table
//! - `exposition`: Prometheus text rendering of an aggregate

mod aggregate;
mod exposition;
mod set;

pub use aggregate::{Aggregate, DatabaseSeries, QueueCounts};
pub use exposition::{escape_label_value, render, Exposition};
pub use set::{queue_key, JobState, MetricDescriptor, MetricId, MetricSet};
