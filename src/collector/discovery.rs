//! Queue discovery
//!
//! A queue exists in a database when its `<prefix>:<name>:meta` key does.
//! Discovery walks the keyspace with `SCAN` until the cursor returns to zero,
//! or uses the configured queue list without touching the store.

use std::collections::HashSet;

use tracing::debug;

use crate::config::Database;
use crate::store::{escape_glob, QueueStore, StoreError, StoreResult};

const META_SUFFIX: &str = ":meta";

/// Default bound on SCAN steps per database. Reaching it is an error, never
/// a partial result.
const SCAN_STEPS_MAX: usize = 1_000_000;

#[derive(Debug, Clone)]
pub struct QueueDiscovery {
    key_prefix: String,
    explicit: Option<Vec<String>>,
    scan_steps_max: usize,
}

impl QueueDiscovery {
    pub fn new(key_prefix: impl Into<String>, explicit: Option<Vec<String>>) -> Self {
        QueueDiscovery {
            key_prefix: key_prefix.into(),
            explicit,
            scan_steps_max: SCAN_STEPS_MAX,
        }
    }

    /// Override the SCAN step bound
    pub fn with_scan_steps_max(mut self, steps: usize) -> Self {
        debug_assert!(steps > 0, "Precondition: scan step bound must be positive");
        self.scan_steps_max = steps.max(1);
        self
    }

    /// `SCAN` pattern matching every queue's meta key. The prefix is taken
    /// literally.
    pub fn scan_pattern(&self) -> String {
        format!("{}:*{}", escape_glob(&self.key_prefix), META_SUFFIX)
    }

    /// Queue name embedded in a meta key: everything between `<prefix>:` and
    /// the trailing `:meta`.
    pub fn queue_name<'k>(&self, meta_key: &'k str) -> Option<&'k str> {
        let name = meta_key
            .strip_prefix(self.key_prefix.as_str())?
            .strip_prefix(':')?
            .strip_suffix(META_SUFFIX)?;
        if name.is_empty() {
            None
        } else {
            Some(name)
        }
    }

    /// Queue names present in `db`, in first-seen order without duplicates.
    pub async fn discover<S: QueueStore + ?Sized>(
        &self,
        store: &S,
        db: &Database,
    ) -> StoreResult<Vec<String>> {
        if let Some(queues) = &self.explicit {
            return Ok(queues.clone());
        }

        let pattern = self.scan_pattern();
        let mut seen = HashSet::new();
        let mut queues = Vec::new();
        let mut cursor = 0;
        let mut steps = 0;

        loop {
            let page = store.scan(db, cursor, &pattern).await?;
            steps += 1;
            for key in &page.keys {
                if let Some(name) = self.queue_name(key) {
                    if seen.insert(name.to_string()) {
                        queues.push(name.to_string());
                    }
                }
            }

            cursor = page.cursor;
            if cursor == 0 {
                break;
            }
            if steps >= self.scan_steps_max {
                return Err(StoreError::ScanIncomplete { steps });
            }
        }

        debug!(
            db = %db.label,
            steps,
            queues = queues.len(),
            "Queue discovery finished"
        );

        // TigerStyle: Postcondition - no duplicates
        debug_assert_eq!(
            queues.iter().collect::<HashSet<_>>().len(),
            queues.len(),
            "Postcondition violated: discovered queues must be unique"
        );

        Ok(queues)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryQueueStore;

    #[test]
    fn test_scan_pattern_escapes_prefix() {
        assert_eq!(QueueDiscovery::new("bull", None).scan_pattern(), "bull:*:meta");
        assert_eq!(
            QueueDiscovery::new("app[1]", None).scan_pattern(),
            "app\\[1\\]:*:meta"
        );
    }

    #[test]
    fn test_queue_name() {
        let discovery = QueueDiscovery::new("bull", None);
        assert_eq!(discovery.queue_name("bull:emails:meta"), Some("emails"));
        assert_eq!(discovery.queue_name("bull:a:b:meta"), Some("a:b"));
        assert_eq!(discovery.queue_name("bull::meta"), None);
        assert_eq!(discovery.queue_name("other:emails:meta"), None);
        assert_eq!(discovery.queue_name("bullx:emails:meta"), None);
        assert_eq!(discovery.queue_name("bull:emails:wait"), None);
    }

    #[tokio::test]
    async fn test_discover_scans_all_pages() {
        let store = InMemoryQueueStore::new();
        store.set_scan_page_size(2);
        for name in ["a", "b", "c"] {
            store.set_plain(0, format!("bull:{}:meta", name));
            store.set_list(0, format!("bull:{}:wait", name), 1);
        }
        store.set_plain(0, "other:z:meta");

        let discovery = QueueDiscovery::new("bull", None);
        let mut queues = discovery
            .discover(&store, &Database::new(0, "default"))
            .await
            .unwrap();
        queues.sort();
        assert_eq!(queues, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_discover_explicit_list_skips_scan() {
        let store = InMemoryQueueStore::new();
        let discovery = QueueDiscovery::new("bull", Some(vec!["x".into(), "y".into()]));
        let queues = discovery
            .discover(&store, &Database::new(0, "default"))
            .await
            .unwrap();
        assert_eq!(queues, vec!["x", "y"]);
        assert_eq!(store.scan_calls(), 0);
    }

    #[tokio::test]
    async fn test_discover_step_bound_is_an_error() {
        let store = InMemoryQueueStore::new();
        store.set_scan_page_size(1);
        for name in ["a", "b", "c"] {
            store.set_plain(0, format!("bull:{}:meta", name));
        }

        let db = Database::new(0, "default");
        let bounded = QueueDiscovery::new("bull", None).with_scan_steps_max(2);
        assert!(matches!(
            bounded.discover(&store, &db).await,
            Err(StoreError::ScanIncomplete { steps: 2 })
        ));

        // Exactly enough steps completes
        let enough = QueueDiscovery::new("bull", None).with_scan_steps_max(3);
        assert_eq!(enough.discover(&store, &db).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_discover_deduplicates_revisits() {
        let store = InMemoryQueueStore::new();
        store.set_scan_page_size(1);
        store.set_scan_revisits(true);
        for name in ["a", "b", "c", "d"] {
            store.set_plain(0, format!("bull:{}:meta", name));
        }

        let discovery = QueueDiscovery::new("bull", None);
        let queues = discovery
            .discover(&store, &Database::new(0, "default"))
            .await
            .unwrap();
        assert_eq!(queues, vec!["a", "b", "c", "d"]);
    }
}
