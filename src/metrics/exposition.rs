//! Prometheus text exposition
//!
//! Output layout, per metric in metric-set order:
//!
//! ```text
//! # HELP bull_active_total Number of jobs in processing
//! # TYPE bull_active_total gauge
//! bull_active_total{queue="emails",db="default"} 3
//!
//! ```
//!
//! A metric is skipped entirely when none of its samples is non-zero. Once a
//! metric is emitted, every one of its samples is rendered, zeros included.

use std::borrow::Cow;
use std::fmt;

use super::aggregate::Aggregate;
use super::set::MetricSet;

/// Borrowing renderer; use `to_string()` or [`render`].
pub struct Exposition<'a> {
    metrics: &'a MetricSet,
    aggregate: &'a Aggregate,
}

impl<'a> Exposition<'a> {
    pub fn new(metrics: &'a MetricSet, aggregate: &'a Aggregate) -> Self {
        Exposition { metrics, aggregate }
    }
}

impl fmt::Display for Exposition<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for descriptor in self.metrics.iter() {
            if !self.aggregate.has_nonzero(descriptor.id) {
                continue;
            }

            writeln!(f, "# HELP {} {}", descriptor.name, escape_help(&descriptor.help))?;
            writeln!(f, "# TYPE {} gauge", descriptor.name)?;
            for series in self.aggregate.series(descriptor.id) {
                let db = escape_label_value(&series.label);
                for (queue, value) in &series.queues {
                    writeln!(
                        f,
                        "{}{{queue=\"{}\",db=\"{}\"}} {}",
                        descriptor.name,
                        escape_label_value(queue),
                        db,
                        value
                    )?;
                }
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

/// Render `aggregate` in exposition format
pub fn render(metrics: &MetricSet, aggregate: &Aggregate) -> String {
    Exposition::new(metrics, aggregate).to_string()
}

/// Escape a label value: backslash, double quote and newline.
pub fn escape_label_value(value: &str) -> Cow<'_, str> {
    if !value.contains(['\\', '"', '\n']) {
        return Cow::Borrowed(value);
    }
    let mut escaped = String::with_capacity(value.len() + 8);
    for c in value.chars() {
        match c {
            '\\' => escaped.push_str("\\\\"),
            '"' => escaped.push_str("\\\""),
            '\n' => escaped.push_str("\\n"),
            other => escaped.push(other),
        }
    }
    Cow::Owned(escaped)
}

/// Escape `# HELP` text: backslash and newline.
fn escape_help(help: &str) -> Cow<'_, str> {
    if !help.contains(['\\', '\n']) {
        return Cow::Borrowed(help);
    }
    Cow::Owned(help.replace('\\', "\\\\").replace('\n', "\\n"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::set::{JobState, MetricId};

    const ACTIVE: MetricId = MetricId::State(JobState::Active);
    const WAIT: MetricId = MetricId::State(JobState::Wait);
    const FAILED: MetricId = MetricId::State(JobState::Failed);

    #[test]
    fn test_empty_aggregate_renders_nothing() {
        let metrics = MetricSet::new("bull", &[]);
        assert_eq!(render(&metrics, &Aggregate::new()), "");
    }

    #[test]
    fn test_single_block() {
        let metrics = MetricSet::new("bull", &[]);
        let mut aggregate = Aggregate::new();
        aggregate.record(ACTIVE, "default", "emails", 3);

        assert_eq!(
            render(&metrics, &aggregate),
            "# HELP bull_active_total Number of jobs in processing\n\
             # TYPE bull_active_total gauge\n\
             bull_active_total{queue=\"emails\",db=\"default\"} 3\n\
             \n"
        );
    }

    #[test]
    fn test_metric_order_follows_set_not_insertion() {
        let metrics = MetricSet::new("bull", &[]);
        let mut aggregate = Aggregate::new();
        aggregate.record(FAILED, "default", "q", 1);
        aggregate.record(WAIT, "default", "q", 2);
        aggregate.record(ACTIVE, "default", "q", 3);

        let output = render(&metrics, &aggregate);
        let active = output.find("# HELP bull_active_total").unwrap();
        let wait = output.find("# HELP bull_wait_total").unwrap();
        let failed = output.find("# HELP bull_failed_total").unwrap();
        assert!(active < wait && wait < failed);
    }

    #[test]
    fn test_all_zero_metric_is_omitted() {
        let metrics = MetricSet::new("bull", &[]);
        let mut aggregate = Aggregate::new();
        aggregate.record(ACTIVE, "default", "a", 0);
        aggregate.record(ACTIVE, "default", "b", 0);
        aggregate.record(WAIT, "default", "a", 0);
        aggregate.record(WAIT, "default", "b", 4);

        let output = render(&metrics, &aggregate);
        assert!(!output.contains("bull_active_total"));
        assert!(output.contains("bull_wait_total{queue=\"a\",db=\"default\"} 0\n"));
        assert!(output.contains("bull_wait_total{queue=\"b\",db=\"default\"} 4\n"));
    }

    #[test]
    fn test_label_escaping() {
        assert_eq!(escape_label_value("plain"), "plain");
        assert!(matches!(escape_label_value("plain"), Cow::Borrowed(_)));
        assert_eq!(escape_label_value("a\"b"), "a\\\"b");
        assert_eq!(escape_label_value("a\\b"), "a\\\\b");
        assert_eq!(escape_label_value("a\nb"), "a\\nb");

        let metrics = MetricSet::new("bull", &[]);
        let mut aggregate = Aggregate::new();
        aggregate.record(ACTIVE, "d\"b", "q\nx", 1);
        let output = render(&metrics, &aggregate);
        assert!(output.contains("bull_active_total{queue=\"q\\nx\",db=\"d\\\"b\"} 1\n"));
        // Every rendered sample stays on one line
        assert_eq!(output.lines().filter(|l| l.starts_with("bull_")).count(), 1);
    }

    #[test]
    fn test_help_escaping() {
        assert_eq!(escape_help("a\\b\nc"), "a\\\\b\\nc");
        assert_eq!(escape_help("jobs"), "jobs");
    }
}
