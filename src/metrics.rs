//! Counters exposed by transforms, stream pools and offload backends.
//!
//! Counters are relaxed atomics; a snapshot is a best-effort view and fields
//! may be read at slightly different instants.

use std::sync::atomic::{AtomicU64, Ordering};

/// Snapshot of a transform's request counters.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub struct TransformMetricsSnapshot {
    /// Compress and decompress submissions.
    pub requests: u64,
    /// Submissions handed straight to the backend without a chain state.
    pub fast_path: u64,
    /// Chain states created.
    pub chains_created: u64,
    /// Jobs issued by the chain coordinator, fallback runs included.
    pub jobs_executed: u64,
    /// Jobs routed to the synchronous fallback because of NONDMA buffers.
    pub nondma_fallbacks: u64,
    /// Submissions that returned `Busy` to the caller.
    pub busy_returns: u64,
    /// Jobs that finished with an error.
    pub failures: u64,
}

#[derive(Debug, Default)]
pub(crate) struct TransformMetrics {
    requests: AtomicU64,
    fast_path: AtomicU64,
    chains_created: AtomicU64,
    jobs_executed: AtomicU64,
    nondma_fallbacks: AtomicU64,
    busy_returns: AtomicU64,
    failures: AtomicU64,
}

impl TransformMetrics {
    pub(crate) fn record_request(&self) {
        self.requests.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_fast_path(&self) {
        self.fast_path.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_chain(&self) {
        self.chains_created.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_job(&self, nondma: bool) {
        self.jobs_executed.fetch_add(1, Ordering::Relaxed);
        if nondma {
            self.nondma_fallbacks.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub(crate) fn record_busy(&self) {
        self.busy_returns.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_failure(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> TransformMetricsSnapshot {
        TransformMetricsSnapshot {
            requests: self.requests.load(Ordering::Relaxed),
            fast_path: self.fast_path.load(Ordering::Relaxed),
            chains_created: self.chains_created.load(Ordering::Relaxed),
            jobs_executed: self.jobs_executed.load(Ordering::Relaxed),
            nondma_fallbacks: self.nondma_fallbacks.load(Ordering::Relaxed),
            busy_returns: self.busy_returns.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of a scratch stream pool's counters.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub struct StreamMetricsSnapshot {
    /// Contexts allocated, eager and background.
    pub fills: u64,
    /// Background allocations that failed and were left for the next trigger.
    pub fill_failures: u64,
    /// Locks served from the bootstrap slot because the caller's own was empty.
    pub borrowed_locks: u64,
}

#[derive(Debug, Default)]
pub(crate) struct StreamMetrics {
    fills: AtomicU64,
    fill_failures: AtomicU64,
    borrowed_locks: AtomicU64,
}

impl StreamMetrics {
    pub(crate) fn record_fill(&self) {
        self.fills.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_fill_failure(&self) {
        self.fill_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_borrowed(&self) {
        self.borrowed_locks.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> StreamMetricsSnapshot {
        StreamMetricsSnapshot {
            fills: self.fills.load(Ordering::Relaxed),
            fill_failures: self.fill_failures.load(Ordering::Relaxed),
            borrowed_locks: self.borrowed_locks.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of an offload backend's queue counters.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub struct OffloadMetricsSnapshot {
    /// Jobs handed to a worker.
    pub queued: u64,
    /// Jobs parked on the backlog because the queue was full.
    pub backlogged: u64,
    /// Jobs turned away with `Busy` because the queue was full and they did
    /// not allow backlogging.
    pub rejected: u64,
    /// Highest number of jobs in flight at once.
    pub max_in_flight: u64,
}

#[derive(Debug, Default)]
pub(crate) struct OffloadMetrics {
    queued: AtomicU64,
    backlogged: AtomicU64,
    rejected: AtomicU64,
    max_in_flight: AtomicU64,
}

impl OffloadMetrics {
    pub(crate) fn record_queued(&self, in_flight: usize) {
        self.queued.fetch_add(1, Ordering::Relaxed);
        self.max_in_flight
            .fetch_max(in_flight as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_backlogged(&self) {
        self.backlogged.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_rejected(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> OffloadMetricsSnapshot {
        OffloadMetricsSnapshot {
            queued: self.queued.load(Ordering::Relaxed),
            backlogged: self.backlogged.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            max_in_flight: self.max_in_flight.load(Ordering::Relaxed),
        }
    }
}
