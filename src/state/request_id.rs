use std::sync::atomic::{AtomicU64, Ordering};

/// Process-unique response ids without a syscall per request.
pub(crate) struct RequestIdGenerator {
    seed: u128,
    counter: AtomicU64,
}

impl RequestIdGenerator {
    #[must_use]
    pub(crate) fn new() -> Self {
        let seed_hi = u128::from(fastrand::u64(..));
        let seed_lo = u128::from(fastrand::u64(..));
        Self {
            seed: (seed_hi << 64) | seed_lo,
            counter: AtomicU64::new(1),
        }
    }

    /// Next id as `{prefix}{32 hex digits}`.
    pub(crate) fn next_id(&self, prefix: &str) -> String {
        let seq = self.counter.fetch_add(1, Ordering::Relaxed);
        let id = uuid::Uuid::from_u128(self.seed ^ u128::from(seq));
        format!("{prefix}{}", id.simple())
    }
}
