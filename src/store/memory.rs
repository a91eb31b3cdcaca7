//! In-memory queue store for unit tests and deterministic simulation.
//!
//! Models just enough of Redis for the exporter: plain keys, lists (by
//! length), and sorted sets (by member score). `SCAN` pages over the whole
//! keyspace in key order and filters each page with the glob afterwards, the
//! way Redis does, so pages may come back empty with a non-zero cursor.
//!
//! Faults can be injected per database: failing scans, failing batches, and
//! scan revisits (a key from the previous page is returned again, as a real
//! `SCAN` may do while the keyspace is rehashed).

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use parking_lot::RwLock;

use super::{
    glob_match, ConnectionState, QueueStore, ReadCommand, ReadOp, ScanPage, StateCell, StoreError,
    StoreFuture, StoreResult,
};
use crate::config::Database;

const DEFAULT_SCAN_PAGE_SIZE: usize = 10;

#[derive(Debug, Clone)]
enum Entry {
    Plain,
    List(u64),
    SortedSet(Vec<u64>),
}

#[derive(Debug)]
struct Inner {
    dbs: HashMap<u32, BTreeMap<String, Entry>>,
    scan_page_size: usize,
    scan_revisits: bool,
    failing_scans: HashSet<u32>,
    failing_batches: HashSet<u32>,
    scan_calls: u64,
    batch_calls: u64,
}

/// In-memory queue store. Clones share the same keyspace.
#[derive(Debug, Clone)]
pub struct InMemoryQueueStore {
    inner: Arc<RwLock<Inner>>,
    state: StateCell,
}

impl InMemoryQueueStore {
    /// Create an empty store in the `Ready` state
    pub fn new() -> Self {
        InMemoryQueueStore {
            inner: Arc::new(RwLock::new(Inner {
                dbs: HashMap::new(),
                scan_page_size: DEFAULT_SCAN_PAGE_SIZE,
                scan_revisits: false,
                failing_scans: HashSet::new(),
                failing_batches: HashSet::new(),
                scan_calls: 0,
                batch_calls: 0,
            })),
            state: StateCell::new(ConnectionState::Ready),
        }
    }

    pub fn set_state(&self, state: ConnectionState) {
        self.state.set(state);
    }

    /// Number of keys examined per `SCAN` step
    pub fn set_scan_page_size(&self, size: usize) {
        debug_assert!(size > 0, "Precondition: scan page size must be positive");
        self.inner.write().scan_page_size = size.max(1);
    }

    pub fn set_scan_revisits(&self, enabled: bool) {
        self.inner.write().scan_revisits = enabled;
    }

    pub fn fail_scans(&self, db: u32, failing: bool) {
        let mut inner = self.inner.write();
        if failing {
            inner.failing_scans.insert(db);
        } else {
            inner.failing_scans.remove(&db);
        }
    }

    pub fn fail_batches(&self, db: u32, failing: bool) {
        let mut inner = self.inner.write();
        if failing {
            inner.failing_batches.insert(db);
        } else {
            inner.failing_batches.remove(&db);
        }
    }

    /// Set a plain string key (e.g. a queue's `meta` key)
    pub fn set_plain(&self, db: u32, key: impl Into<String>) {
        self.insert(db, key.into(), Entry::Plain);
    }

    /// Set a list key holding `len` elements
    pub fn set_list(&self, db: u32, key: impl Into<String>, len: u64) {
        self.insert(db, key.into(), Entry::List(len));
    }

    /// Set a sorted set key whose members carry `scores`
    pub fn set_sorted_set(&self, db: u32, key: impl Into<String>, scores: &[u64]) {
        self.insert(db, key.into(), Entry::SortedSet(scores.to_vec()));
    }

    pub fn remove(&self, db: u32, key: &str) {
        if let Some(keys) = self.inner.write().dbs.get_mut(&db) {
            keys.remove(key);
        }
    }

    pub fn scan_calls(&self) -> u64 {
        self.inner.read().scan_calls
    }

    pub fn batch_calls(&self) -> u64 {
        self.inner.read().batch_calls
    }

    fn insert(&self, db: u32, key: String, entry: Entry) {
        self.inner.write().dbs.entry(db).or_default().insert(key, entry);
    }

    fn scan_sync(&self, db: u32, cursor: u64, pattern: &str) -> StoreResult<ScanPage> {
        let mut inner = self.inner.write();
        inner.scan_calls += 1;
        if inner.failing_scans.contains(&db) {
            return Err(StoreError::Injected("scan"));
        }

        let Some(keys) = inner.dbs.get(&db) else {
            return Ok(ScanPage::default());
        };

        let page_size = inner.scan_page_size;
        let start = if inner.scan_revisits && cursor > 0 {
            cursor as usize - 1
        } else {
            cursor as usize
        };
        let end = (cursor as usize + page_size).min(keys.len());

        let matched: Vec<String> = keys
            .keys()
            .skip(start)
            .take(end.saturating_sub(start))
            .filter(|key| glob_match(pattern, key))
            .cloned()
            .collect();

        let next = if end >= keys.len() { 0 } else { end as u64 };

        // TigerStyle: Postcondition - cursor strictly advances or completes
        debug_assert!(
            next == 0 || next > cursor,
            "Postcondition violated: SCAN cursor must advance"
        );

        Ok(ScanPage {
            cursor: next,
            keys: matched,
        })
    }

    fn batch_sync(&self, db: u32, commands: &[ReadCommand]) -> StoreResult<Vec<Option<u64>>> {
        let mut inner = self.inner.write();
        inner.batch_calls += 1;
        if inner.failing_batches.contains(&db) {
            return Err(StoreError::Injected("batch"));
        }

        let keys = inner.dbs.get(&db);
        let replies = commands
            .iter()
            .map(|command| {
                let entry = keys.and_then(|keys| keys.get(&command.key));
                match (command.op, entry) {
                    // Missing keys count as empty, as in Redis
                    (_, None) => Some(0),
                    (ReadOp::ListLength, Some(Entry::List(len))) => Some(*len),
                    (ReadOp::SortedSetCardinality, Some(Entry::SortedSet(scores))) => {
                        Some(scores.len() as u64)
                    }
                    (ReadOp::SortedSetCountFrom { min_score }, Some(Entry::SortedSet(scores))) => {
                        Some(scores.iter().filter(|score| **score >= min_score).count() as u64)
                    }
                    // WRONGTYPE
                    _ => None,
                }
            })
            .collect();
        Ok(replies)
    }
}

impl Default for InMemoryQueueStore {
    fn default() -> Self {
        Self::new()
    }
}

impl QueueStore for InMemoryQueueStore {
    fn scan<'a>(
        &'a self,
        db: &'a Database,
        cursor: u64,
        pattern: &'a str,
    ) -> StoreFuture<'a, ScanPage> {
        Box::pin(async move { self.scan_sync(db.index, cursor, pattern) })
    }

    fn execute_batch<'a>(
        &'a self,
        db: &'a Database,
        commands: &'a [ReadCommand],
    ) -> StoreFuture<'a, Vec<Option<u64>>> {
        Box::pin(async move { self.batch_sync(db.index, commands) })
    }

    fn state(&self) -> ConnectionState {
        self.state.get()
    }
}
