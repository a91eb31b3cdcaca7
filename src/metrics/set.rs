//! The static metric set
//!
//! Every metric the exporter can emit is known at startup: one gauge per job
//! state plus optional windowed completed counts. The set's order drives both
//! the command layout of a queue's batch and the order of the rendered output.

use crate::store::{ReadCommand, ReadOp};

/// Job states tracked per queue, in batch order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum JobState {
    Active,
    Wait,
    WaitingChildren,
    Prioritized,
    Delayed,
    Failed,
    Completed,
}

impl JobState {
    pub const ALL: [JobState; 7] = [
        JobState::Active,
        JobState::Wait,
        JobState::WaitingChildren,
        JobState::Prioritized,
        JobState::Delayed,
        JobState::Failed,
        JobState::Completed,
    ];

    /// Last segment of the queue key holding this state
    pub fn key_suffix(self) -> &'static str {
        match self {
            JobState::Active => "active",
            JobState::Wait => "wait",
            JobState::WaitingChildren => "waiting-children",
            JobState::Prioritized => "prioritized",
            JobState::Delayed => "delayed",
            JobState::Failed => "failed",
            JobState::Completed => "completed",
        }
    }

    /// Metric name segment between the prefix and `_total`
    pub fn metric_suffix(self) -> &'static str {
        match self {
            JobState::Active => "active",
            JobState::Wait => "wait",
            JobState::WaitingChildren => "waiting_children",
            JobState::Prioritized => "prioritized",
            JobState::Delayed => "delayed",
            JobState::Failed => "failed",
            JobState::Completed => "completed",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            JobState::Active => "Number of jobs in processing",
            JobState::Wait => "Number of pending jobs",
            JobState::WaitingChildren => "Number of pending children jobs",
            JobState::Prioritized => "Number of prioritized jobs",
            JobState::Delayed => "Number of delayed jobs",
            JobState::Failed => "Number of failed jobs",
            JobState::Completed => "Number of completed jobs",
        }
    }

    /// `active` and `wait` are lists; everything else is a sorted set
    fn lookup(self) -> Lookup {
        match self {
            JobState::Active | JobState::Wait => Lookup::ListLength,
            _ => Lookup::SortedSetCardinality,
        }
    }
}

/// Identity of one emitted metric
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricId {
    State(JobState),
    /// Completed jobs whose finish timestamp lies within the trailing window
    CompletedWithin { window_secs: u64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lookup {
    ListLength,
    SortedSetCardinality,
    /// Sorted set members scored (in ms) at or after `now - window`
    SortedSetSince { window_secs: u64 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricDescriptor {
    pub id: MetricId,
    /// Full metric name including the prefix
    pub name: String,
    /// One-line `# HELP` text
    pub help: String,
    key_suffix: &'static str,
    lookup: Lookup,
}

impl MetricDescriptor {
    /// The command reading this metric for `queue`.
    ///
    /// `now_ms` only matters for windowed metrics.
    pub fn read_command(&self, key_prefix: &str, queue: &str, now_ms: u64) -> ReadCommand {
        let op = match self.lookup {
            Lookup::ListLength => ReadOp::ListLength,
            Lookup::SortedSetCardinality => ReadOp::SortedSetCardinality,
            Lookup::SortedSetSince { window_secs } => ReadOp::SortedSetCountFrom {
                min_score: now_ms.saturating_sub(window_secs.saturating_mul(1000)),
            },
        };
        ReadCommand::new(op, queue_key(key_prefix, queue, self.key_suffix))
    }
}

/// `<prefix>:<queue>:<suffix>`
pub fn queue_key(key_prefix: &str, queue: &str, suffix: &str) -> String {
    format!("{}:{}:{}", key_prefix, queue, suffix)
}

/// Ordered, immutable list of metric descriptors
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricSet {
    descriptors: Vec<MetricDescriptor>,
}

impl MetricSet {
    /// Build the set for `prefix`, appending one windowed completed metric
    /// per entry of `completed_windows`.
    pub fn new(prefix: &str, completed_windows: &[u64]) -> Self {
        let mut descriptors: Vec<MetricDescriptor> = JobState::ALL
            .iter()
            .map(|&state| MetricDescriptor {
                id: MetricId::State(state),
                name: format!("{}_{}_total", prefix, state.metric_suffix()),
                help: state.description().to_string(),
                key_suffix: state.key_suffix(),
                lookup: state.lookup(),
            })
            .collect();

        for &window_secs in completed_windows {
            descriptors.push(MetricDescriptor {
                id: MetricId::CompletedWithin { window_secs },
                name: format!("{}_completed_last_{}s_total", prefix, window_secs),
                help: format!("Number of jobs completed in the last {} seconds", window_secs),
                key_suffix: JobState::Completed.key_suffix(),
                lookup: Lookup::SortedSetSince { window_secs },
            });
        }

        MetricSet { descriptors }
    }

    /// Commands issued per queue
    pub fn stride(&self) -> usize {
        self.descriptors.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &MetricDescriptor> {
        self.descriptors.iter()
    }

    pub fn get(&self, id: MetricId) -> Option<&MetricDescriptor> {
        self.descriptors.iter().find(|d| d.id == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_set() {
        let set = MetricSet::new("bull", &[]);
        assert_eq!(set.stride(), 7);

        let names: Vec<&str> = set.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "bull_active_total",
                "bull_wait_total",
                "bull_waiting_children_total",
                "bull_prioritized_total",
                "bull_delayed_total",
                "bull_failed_total",
                "bull_completed_total",
            ]
        );
    }

    #[test]
    fn test_read_commands() {
        let set = MetricSet::new("bull", &[]);
        let commands: Vec<ReadCommand> = set
            .iter()
            .map(|d| d.read_command("bull", "emails", 0))
            .collect();

        assert_eq!(commands[0], ReadCommand::new(ReadOp::ListLength, "bull:emails:active"));
        assert_eq!(commands[1], ReadCommand::new(ReadOp::ListLength, "bull:emails:wait"));
        assert_eq!(
            commands[2],
            ReadCommand::new(ReadOp::SortedSetCardinality, "bull:emails:waiting-children")
        );
        assert_eq!(
            commands[6],
            ReadCommand::new(ReadOp::SortedSetCardinality, "bull:emails:completed")
        );
    }

    #[test]
    fn test_windowed_metric() {
        let set = MetricSet::new("jobs", &[60]);
        assert_eq!(set.stride(), 8);

        let windowed = set
            .get(MetricId::CompletedWithin { window_secs: 60 })
            .unwrap();
        assert_eq!(windowed.name, "jobs_completed_last_60s_total");
        assert_eq!(
            windowed.read_command("bull", "q", 100_000),
            ReadCommand::new(
                ReadOp::SortedSetCountFrom { min_score: 40_000 },
                "bull:q:completed"
            )
        );
        // Clock earlier than the window saturates at zero
        assert_eq!(
            windowed.read_command("bull", "q", 1_000).op,
            ReadOp::SortedSetCountFrom { min_score: 0 }
        );
    }
}
