//! Shared fixtures for integration tests

#![allow(dead_code)]

use bull_exporter::InMemoryQueueStore;

/// Depths of one queue, in job-state order
#[derive(Debug, Clone, Copy, Default)]
pub struct QueueDepths {
    pub active: u64,
    pub wait: u64,
    pub waiting_children: u64,
    pub prioritized: u64,
    pub delayed: u64,
    pub failed: u64,
    pub completed: u64,
}

/// Lay out one queue the way BullMQ does: a meta key, two lists and the
/// sorted sets. Completed members are scored 1ms apart ending at
/// `completed_until_ms`.
pub fn insert_queue(
    store: &InMemoryQueueStore,
    db: u32,
    prefix: &str,
    queue: &str,
    depths: QueueDepths,
    completed_until_ms: u64,
) {
    let key = |suffix: &str| format!("{}:{}:{}", prefix, queue, suffix);

    store.set_plain(db, key("meta"));
    store.set_list(db, key("active"), depths.active);
    store.set_list(db, key("wait"), depths.wait);
    store.set_sorted_set(db, key("waiting-children"), &vec![0; depths.waiting_children as usize]);
    store.set_sorted_set(db, key("prioritized"), &vec![0; depths.prioritized as usize]);
    store.set_sorted_set(db, key("delayed"), &vec![0; depths.delayed as usize]);
    store.set_sorted_set(db, key("failed"), &vec![0; depths.failed as usize]);

    let completed: Vec<u64> = (0..depths.completed)
        .map(|i| completed_until_ms.saturating_sub(i))
        .collect();
    store.set_sorted_set(db, key("completed"), &completed);
}

/// Sample lines of the exposition body, headers and blanks dropped
pub fn sample_lines(body: &str) -> Vec<&str> {
    body.lines()
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .collect()
}
