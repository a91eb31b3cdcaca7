//! Scrape-time collection
//!
//! One scrape walks the configured databases in order. For each database:
//! discover queues, run one pipelined batch, fold the typed results into the
//! aggregate. A store failure at either step drops that database from the
//! scrape and is logged; it never fails the scrape itself.

mod batch;
mod discovery;

pub use batch::QueueBatch;
pub use discovery::QueueDiscovery;

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::{debug, warn};

use crate::config::{Database, ExporterConfig};
use crate::metrics::{render, Aggregate, MetricSet};
use crate::store::{ConnectionState, QueueStore, StoreResult};

pub struct Collector<S> {
    store: Arc<S>,
    metrics: MetricSet,
    discovery: QueueDiscovery,
    databases: Vec<Database>,
    key_prefix: String,
}

impl<S: QueueStore> Collector<S> {
    pub fn new(store: Arc<S>, config: &ExporterConfig) -> Self {
        debug_assert!(
            !config.databases.is_empty(),
            "Precondition: at least one database must be configured"
        );

        Collector {
            store,
            metrics: MetricSet::new(&config.metric_prefix, &config.completed_windows),
            discovery: QueueDiscovery::new(config.key_prefix.clone(), config.queues.clone()),
            databases: config.databases.clone(),
            key_prefix: config.key_prefix.clone(),
        }
    }

    pub fn metrics(&self) -> &MetricSet {
        &self.metrics
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn state(&self) -> ConnectionState {
        self.store.state()
    }

    /// Collect every database with the wall clock as the window reference.
    pub async fn collect(&self) -> Aggregate {
        self.collect_at(now_ms()).await
    }

    /// Collect every database; `now_ms` anchors the windowed metrics.
    pub async fn collect_at(&self, now_ms: u64) -> Aggregate {
        let mut aggregate = Aggregate::new();
        for db in &self.databases {
            match self.collect_database(db, now_ms, &mut aggregate).await {
                Ok(samples) => {
                    debug!(db = %db.label, samples, "Collected database");
                }
                Err(e) => {
                    warn!(db = %db.label, index = db.index, error = %e, "Skipping database for this scrape");
                }
            }
        }
        aggregate
    }

    /// Collect and render in one go
    pub async fn scrape(&self) -> String {
        let aggregate = self.collect().await;
        render(&self.metrics, &aggregate)
    }

    async fn collect_database(
        &self,
        db: &Database,
        now_ms: u64,
        aggregate: &mut Aggregate,
    ) -> StoreResult<usize> {
        let queues = self.discovery.discover(self.store.as_ref(), db).await?;
        let batch = QueueBatch::build(&self.metrics, &self.key_prefix, queues, now_ms);
        if batch.is_empty() {
            return Ok(0);
        }

        let replies = self.store.execute_batch(db, batch.commands()).await?;
        let counts = batch.into_counts(replies)?;
        Ok(aggregate.fold(&db.label, &counts))
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or(0)
}
