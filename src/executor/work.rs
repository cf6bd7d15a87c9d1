//! Schedule-once background work item.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use parking_lot::Mutex;

use super::Executor;

/// A unit of background work that is queued at most once at a time.
///
/// Scheduling an already pending item is a no-op. The pending mark is cleared
/// right before the body runs, so a schedule that races with a running body
/// queues one more run.
pub(crate) struct Work {
    inner: Arc<WorkInner>,
}

struct WorkInner {
    body: Box<dyn Fn() + Send + Sync>,
    pending: AtomicBool,
    running: Mutex<()>,
}

impl Work {
    pub(crate) fn new<F>(body: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        Self {
            inner: Arc::new(WorkInner {
                body: Box::new(body),
                pending: AtomicBool::new(false),
                running: Mutex::new(()),
            }),
        }
    }

    /// Queue the body on `exec`. Returns `false` when it was already pending.
    pub(crate) fn schedule<E: Executor>(&self, exec: &E) -> bool {
        if self.inner.pending.swap(true, Ordering::AcqRel) {
            return false;
        }
        let inner = Arc::clone(&self.inner);
        exec.spawn(move || inner.run());
        true
    }

    /// Cancel a pending run and wait for a running body to return. Returns
    /// whether a run was pending.
    pub(crate) fn cancel_sync(&self) -> bool {
        let was_pending = self.inner.pending.swap(false, Ordering::AcqRel);
        drop(self.inner.running.lock());
        was_pending
    }

    #[cfg(test)]
    pub(crate) fn is_pending(&self) -> bool {
        self.inner.pending.load(Ordering::Acquire)
    }
}

impl WorkInner {
    fn run(&self) {
        let _running = self.running.lock();
        if !self.pending.swap(false, Ordering::AcqRel) {
            return;
        }
        (self.body)();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;
    use crate::executor::ManualExecutor;

    #[test]
    fn schedule_is_idempotent_while_pending() {
        let exec = ManualExecutor::new(1);
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&runs);
        let work = Work::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        assert!(work.schedule(&exec));
        assert!(!work.schedule(&exec));
        assert!(work.is_pending());
        exec.run_pending();
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert!(!work.is_pending());

        assert!(work.schedule(&exec));
        exec.run_pending();
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn cancelled_work_does_not_run() {
        let exec = ManualExecutor::new(1);
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&runs);
        let work = Work::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        work.schedule(&exec);
        assert!(work.cancel_sync());
        assert!(!work.cancel_sync());
        exec.run_pending();
        assert_eq!(runs.load(Ordering::SeqCst), 0);
    }
}
