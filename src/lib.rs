//! Prometheus exporter for BullMQ-style job queues stored in Redis.
//!
//! A scrape discovers queues per logical database, reads their depths with one
//! pipelined batch per database, and renders the result in the Prometheus text
//! exposition format.

pub mod collector;
pub mod config;
pub mod metrics;
pub mod observability;
pub mod server;
pub mod store;

pub use collector::Collector;
pub use config::{ConfigError, Database, ExporterConfig};
pub use store::{ConnectionState, InMemoryQueueStore, QueueStore, RedisQueueStore, StoreError};
