//! Per-database command batch
//!
//! # TigerStyle Invariants
//!
//! - `commands.len() == queues.len() * stride`
//! - Commands for queue `i` occupy `[i * stride, (i + 1) * stride)`, in
//!   metric-set order

use crate::metrics::{MetricSet, QueueCounts};
use crate::store::{ReadCommand, StoreError, StoreResult};

pub struct QueueBatch<'m> {
    metrics: &'m MetricSet,
    queues: Vec<String>,
    commands: Vec<ReadCommand>,
}

impl<'m> QueueBatch<'m> {
    pub fn build(metrics: &'m MetricSet, key_prefix: &str, queues: Vec<String>, now_ms: u64) -> Self {
        let mut commands = Vec::with_capacity(queues.len() * metrics.stride());
        for queue in &queues {
            commands.extend(
                metrics
                    .iter()
                    .map(|descriptor| descriptor.read_command(key_prefix, queue, now_ms)),
            );
        }

        // TigerStyle: Postcondition - layout matches stride
        debug_assert_eq!(
            commands.len(),
            queues.len() * metrics.stride(),
            "Postcondition violated: batch must hold stride commands per queue"
        );

        QueueBatch {
            metrics,
            queues,
            commands,
        }
    }

    pub fn commands(&self) -> &[ReadCommand] {
        &self.commands
    }

    pub fn is_empty(&self) -> bool {
        self.queues.is_empty()
    }

    /// Pair the raw replies back up with their queue and metric.
    pub fn into_counts(self, replies: Vec<Option<u64>>) -> StoreResult<Vec<QueueCounts>> {
        if replies.len() != self.commands.len() {
            return Err(StoreError::ReplyShape {
                expected: self.commands.len(),
                actual: replies.len(),
            });
        }

        let stride = self.metrics.stride();
        if stride == 0 {
            return Ok(Vec::new());
        }

        let counts = self
            .queues
            .into_iter()
            .zip(replies.chunks_exact(stride))
            .map(|(queue, chunk)| QueueCounts {
                queue,
                samples: self
                    .metrics
                    .iter()
                    .zip(chunk)
                    .map(|(descriptor, value)| (descriptor.id, *value))
                    .collect(),
            })
            .collect();
        Ok(counts)
    }
}
