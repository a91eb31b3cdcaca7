//! Queue Store Abstraction
//!
//! The exporter only ever reads from the store, and only through two calls:
//! a cursor-based key scan and a pipelined batch of counting commands. Both
//! are expressed by the [`QueueStore`] trait, in the same boxed-future style
//! as the rest of the crate's I/O seams.
//!
//! Implementations:
//! - `RedisQueueStore`: Redis (direct or via Sentinel), one connection per
//!   logical database
//! - `InMemoryQueueStore`: For unit tests and deterministic simulation

mod glob;
mod memory;
mod redis_store;
mod sentinel;

pub use glob::{escape_glob, glob_match};
pub use memory::InMemoryQueueStore;
pub use redis_store::RedisQueueStore;

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::config::Database;

/// Errors surfaced by store calls. Every variant degrades a single database's
/// contribution to a scrape; none of them fail the request.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store connection is not ready")]
    NotReady,
    #[error("store connection is closed")]
    Closed,
    #[error("store call timed out after {0:?}")]
    Timeout(Duration),
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
    #[error("no sentinel could resolve master {0:?}")]
    NoMaster(String),
    #[error("invalid endpoint {endpoint:?}: {reason}")]
    InvalidEndpoint { endpoint: String, reason: String },
    #[error("batch reply has {actual} results, expected {expected}")]
    ReplyShape { expected: usize, actual: usize },
    #[error("SCAN did not complete within {steps} steps")]
    ScanIncomplete { steps: usize },
    #[error("injected fault: {0}")]
    Injected(&'static str),
}

pub type StoreResult<T> = Result<T, StoreError>;

pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = StoreResult<T>> + Send + 'a>>;

/// Connection lifecycle as reported by `/health`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionState {
    /// Initial connect has not completed yet
    Connecting = 0,
    Ready = 1,
    /// A call failed; the supervisor is re-establishing connections
    Reconnecting = 2,
    /// Shut down; terminal
    Closed = 3,
}

impl ConnectionState {
    pub fn is_ready(self) -> bool {
        self == ConnectionState::Ready
    }

    fn from_u8(raw: u8) -> Self {
        match raw {
            1 => ConnectionState::Ready,
            2 => ConnectionState::Reconnecting,
            3 => ConnectionState::Closed,
            _ => ConnectionState::Connecting,
        }
    }
}

/// Shared, lock-free connection state. `Closed` is sticky.
#[derive(Debug, Clone)]
pub struct StateCell(Arc<AtomicU8>);

impl StateCell {
    pub fn new(initial: ConnectionState) -> Self {
        StateCell(Arc::new(AtomicU8::new(initial as u8)))
    }

    pub fn get(&self) -> ConnectionState {
        ConnectionState::from_u8(self.0.load(Ordering::Acquire))
    }

    /// Move to `next` unless already closed. Returns the previous state.
    pub fn set(&self, next: ConnectionState) -> ConnectionState {
        let previous = self
            .0
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                if current == ConnectionState::Closed as u8 {
                    None
                } else {
                    Some(next as u8)
                }
            })
            .unwrap_or_else(|closed| closed);
        ConnectionState::from_u8(previous)
    }
}

impl Default for StateCell {
    fn default() -> Self {
        Self::new(ConnectionState::Connecting)
    }
}

/// One page of a cursor-based key scan
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanPage {
    /// Continuation cursor; `0` means the iteration is complete
    pub cursor: u64,
    pub keys: Vec<String>,
}

/// A read-only counting command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOp {
    /// `LLEN key`
    ListLength,
    /// `ZCARD key`
    SortedSetCardinality,
    /// `ZCOUNT key <min_score> +inf`
    SortedSetCountFrom { min_score: u64 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadCommand {
    pub op: ReadOp,
    pub key: String,
}

impl ReadCommand {
    pub fn new(op: ReadOp, key: impl Into<String>) -> Self {
        ReadCommand { op, key: key.into() }
    }
}

/// Read access to a queue keyspace.
///
/// Calls are addressed to a logical database explicitly, so implementations
/// never depend on a per-connection "current database".
pub trait QueueStore: Send + Sync + 'static {
    /// One `SCAN cursor MATCH pattern` step
    fn scan<'a>(
        &'a self,
        db: &'a Database,
        cursor: u64,
        pattern: &'a str,
    ) -> StoreFuture<'a, ScanPage>;

    /// Execute `commands` as one atomic pipelined round trip.
    ///
    /// The reply has exactly one entry per command. A command that the store
    /// rejected individually (e.g. `WRONGTYPE`) yields `None`; a failure of the
    /// round trip itself is an `Err`.
    fn execute_batch<'a>(
        &'a self,
        db: &'a Database,
        commands: &'a [ReadCommand],
    ) -> StoreFuture<'a, Vec<Option<u64>>>;

    fn state(&self) -> ConnectionState;
}

impl<S: QueueStore + ?Sized> QueueStore for Arc<S> {
    fn scan<'a>(
        &'a self,
        db: &'a Database,
        cursor: u64,
        pattern: &'a str,
    ) -> StoreFuture<'a, ScanPage> {
        (**self).scan(db, cursor, pattern)
    }

    fn execute_batch<'a>(
        &'a self,
        db: &'a Database,
        commands: &'a [ReadCommand],
    ) -> StoreFuture<'a, Vec<Option<u64>>> {
        (**self).execute_batch(db, commands)
    }

    fn state(&self) -> ConnectionState {
        (**self).state()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_cell_transitions() {
        let state = StateCell::default();
        assert_eq!(state.get(), ConnectionState::Connecting);
        assert!(!state.get().is_ready());

        assert_eq!(state.set(ConnectionState::Ready), ConnectionState::Connecting);
        assert!(state.get().is_ready());

        state.set(ConnectionState::Reconnecting);
        assert_eq!(state.get(), ConnectionState::Reconnecting);
    }

    #[test]
    fn test_closed_is_sticky() {
        let state = StateCell::new(ConnectionState::Ready);
        state.set(ConnectionState::Closed);
        assert_eq!(state.set(ConnectionState::Ready), ConnectionState::Closed);
        assert_eq!(state.get(), ConnectionState::Closed);
    }

    #[test]
    fn test_state_cell_is_shared_between_clones() {
        let state = StateCell::default();
        let observer = state.clone();
        state.set(ConnectionState::Ready);
        assert!(observer.get().is_ready());
    }
}
