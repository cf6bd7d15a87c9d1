use std::num::NonZeroUsize;

/// Upper bound on the per-request context a fallback transform may need.
///
/// Fallback requests are built in place for a single synchronous call, so their
/// context has to stay small.
pub const MAX_SYNC_COMP_REQSIZE: usize = 384;

/// Scratch bytes per direction for synchronous software backends.
pub const SCOMP_SCRATCH_SIZE: usize = 128 * 1024;

/// Construction options for a [`Transform`](crate::Transform).
#[derive(Debug, Clone)]
pub struct TransformOptions {
    pub(crate) max_sync_reqsize: usize,
}

impl Default for TransformOptions {
    fn default() -> Self {
        TransformOptions {
            max_sync_reqsize: MAX_SYNC_COMP_REQSIZE,
        }
    }
}

impl TransformOptions {
    /// Largest `reqsize` accepted from a synchronous fallback.
    pub fn max_sync_reqsize(self, max_sync_reqsize: usize) -> Self {
        TransformOptions {
            max_sync_reqsize,
            ..self
        }
    }
}

/// Options for a per-unit scratch [`StreamPool`](crate::stream::StreamPool).
#[derive(Debug, Clone)]
pub struct StreamOptions {
    pub(crate) units: usize,
    pub(crate) scratch_size: usize,
}

impl Default for StreamOptions {
    fn default() -> Self {
        StreamOptions {
            units: std::thread::available_parallelism()
                .map(NonZeroUsize::get)
                .unwrap_or(1),
            scratch_size: SCOMP_SCRATCH_SIZE,
        }
    }
}

impl StreamOptions {
    /// Number of per-unit slots, at least one.
    pub fn units(self, units: usize) -> Self {
        StreamOptions {
            units: units.max(1),
            ..self
        }
    }

    /// Scratch bytes per direction.
    pub fn scratch_size(self, scratch_size: usize) -> Self {
        StreamOptions {
            scratch_size,
            ..self
        }
    }
}

/// Options for the worker-thread [`OffloadBackend`](crate::offload::OffloadBackend).
#[derive(Debug, Clone)]
pub struct OffloadOptions {
    pub(crate) workers: usize,
    pub(crate) queue_depth: usize,
}

impl Default for OffloadOptions {
    fn default() -> Self {
        OffloadOptions {
            workers: 1,
            queue_depth: 64,
        }
    }
}

impl OffloadOptions {
    /// Number of worker threads, at least one.
    pub fn workers(self, workers: usize) -> Self {
        OffloadOptions {
            workers: workers.max(1),
            ..self
        }
    }

    /// Jobs in flight before new ones are backlogged or rejected, at least one.
    pub fn queue_depth(self, queue_depth: usize) -> Self {
        OffloadOptions {
            queue_depth: queue_depth.max(1),
            ..self
        }
    }
}
