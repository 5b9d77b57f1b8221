use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use rustc_hash::FxHashMap;

/// Per-client-key success counter.
pub trait UsageRecorder: Send + Sync {
    /// Called exactly once per successfully completed call.
    fn increment_usage(&self, key_id: &str);

    fn usage(&self, key_id: &str) -> u64;
}

/// Atomic counters keyed by client key id.
#[derive(Debug, Default)]
pub struct MemoryUsageRecorder {
    counters: RwLock<FxHashMap<String, Arc<AtomicU64>>>,
}

impl MemoryUsageRecorder {
    /// Pre-register known ids so the hot path only takes the read lock.
    #[must_use]
    pub fn with_keys<'a, I>(ids: I) -> Self
    where
        I: IntoIterator<Item = &'a str>,
    {
        let counters = ids
            .into_iter()
            .map(|id| (id.to_string(), Arc::new(AtomicU64::new(0))))
            .collect();
        Self {
            counters: RwLock::new(counters),
        }
    }

    fn counter(&self, key_id: &str) -> Arc<AtomicU64> {
        if let Some(counter) = self.counters.read().get(key_id) {
            return Arc::clone(counter);
        }
        let mut guard = self.counters.write();
        Arc::clone(
            guard
                .entry(key_id.to_string())
                .or_insert_with(|| Arc::new(AtomicU64::new(0))),
        )
    }
}

impl UsageRecorder for MemoryUsageRecorder {
    fn increment_usage(&self, key_id: &str) {
        self.counter(key_id).fetch_add(1, Ordering::Relaxed);
    }

    fn usage(&self, key_id: &str) -> u64 {
        self.counters
            .read()
            .get(key_id)
            .map_or(0, |c| c.load(Ordering::Relaxed))
    }
}
