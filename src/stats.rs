use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Counters shared between a [`BatchLoader`](crate::BatchLoader) and its
/// worker task.
#[derive(Debug, Default, Clone)]
pub(crate) struct LoaderStats {
    inner: Arc<Counters>,
}

#[derive(Debug, Default)]
struct Counters {
    load_requests: AtomicU64,
    keys_requested: AtomicU64,
    cache_hits: AtomicU64,
    dispatches: AtomicU64,
    keys_dispatched: AtomicU64,
    failed_dispatches: AtomicU64,
    unmatched_records: AtomicU64,
}

impl LoaderStats {
    pub(crate) fn record_load_request(&self, keys_requested: usize, cache_hits: usize) {
        self.inner.load_requests.fetch_add(1, Ordering::Relaxed);
        self.inner
            .keys_requested
            .fetch_add(keys_requested as u64, Ordering::Relaxed);
        self.inner
            .cache_hits
            .fetch_add(cache_hits as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_dispatch(&self, batch_size: usize) {
        self.inner.dispatches.fetch_add(1, Ordering::Relaxed);
        self.inner
            .keys_dispatched
            .fetch_add(batch_size as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_failed_dispatch(&self) {
        self.inner.failed_dispatches.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_unmatched(&self, unmatched: usize) {
        self.inner
            .unmatched_records
            .fetch_add(unmatched as u64, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> StatsSnapshot {
        let counters = &self.inner;
        StatsSnapshot {
            load_requests: counters.load_requests.load(Ordering::Relaxed),
            keys_requested: counters.keys_requested.load(Ordering::Relaxed),
            cache_hits: counters.cache_hits.load(Ordering::Relaxed),
            dispatches: counters.dispatches.load(Ordering::Relaxed),
            keys_dispatched: counters.keys_dispatched.load(Ordering::Relaxed),
            failed_dispatches: counters.failed_dispatches.load(Ordering::Relaxed),
            unmatched_records: counters.unmatched_records.load(Ordering::Relaxed),
        }
    }
}

/// A point-in-time copy of a loader's counters.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Number of `load` and `load_many` calls.
    pub load_requests: u64,
    /// Total keys passed to `load` and `load_many`, including duplicates.
    pub keys_requested: u64,
    /// Keys answered from the request cache without a fetch, including
    /// duplicates.
    pub cache_hits: u64,
    /// Number of times the batch function was called.
    pub dispatches: u64,
    /// Total distinct keys passed to the batch function.
    pub keys_dispatched: u64,
    /// Dispatches that ended in an error or missed their deadline.
    pub failed_dispatches: u64,
    /// Fetched records whose correlation key was never requested.
    pub unmatched_records: u64,
}
