use std::{
    cell::Cell,
    num::NonZeroUsize,
    sync::atomic::{AtomicUsize, Ordering},
};

use tokio::runtime::Handle;

use super::Executor;

static NEXT_UNIT: AtomicUsize = AtomicUsize::new(0);

thread_local! {
    static THREAD_UNIT: Cell<Option<usize>> = const { Cell::new(None) };
}

/// Executor backed by a tokio runtime.
///
/// Background work runs on the blocking pool. Each OS thread is pinned to an
/// execution unit the first time it asks for one.
pub struct TokioExecutor {
    handle: Handle,
    units: usize,
}

impl Default for TokioExecutor {
    fn default() -> Self {
        Self::new(Handle::current())
    }
}

impl TokioExecutor {
    /// Executor over `handle` with one unit per available core.
    pub fn new(handle: Handle) -> Self {
        let units = std::thread::available_parallelism()
            .map(NonZeroUsize::get)
            .unwrap_or(1);
        Self { handle, units }
    }

    /// Override the number of execution units threads are spread over.
    pub fn with_units(self, units: usize) -> Self {
        Self {
            units: units.max(1),
            ..self
        }
    }
}

impl Executor for TokioExecutor {
    fn spawn<F>(&self, work: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let _ = self.handle.spawn_blocking(work);
    }

    fn current_unit(&self) -> usize {
        let id = THREAD_UNIT.with(|unit| match unit.get() {
            Some(id) => id,
            None => {
                let id = NEXT_UNIT.fetch_add(1, Ordering::Relaxed);
                unit.set(Some(id));
                id
            }
        });
        id % self.units
    }

    fn units(&self) -> usize {
        self.units
    }
}
