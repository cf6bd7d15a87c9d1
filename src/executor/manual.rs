use std::{
    collections::VecDeque,
    sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
};

use parking_lot::Mutex;

use super::Executor;

type Task = Box<dyn FnOnce() + Send + 'static>;

/// Deterministic executor: spawned work waits until [`run_pending`] is called
/// and the current execution unit is whatever was last set.
///
/// [`run_pending`]: ManualExecutor::run_pending
pub struct ManualExecutor {
    queue: Mutex<VecDeque<Task>>,
    units: usize,
    current: AtomicUsize,
    preemptible: AtomicBool,
    yields: AtomicU64,
}

impl ManualExecutor {
    /// Executor with `units` execution units, currently on unit 0.
    pub fn new(units: usize) -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            units: units.max(1),
            current: AtomicUsize::new(0),
            preemptible: AtomicBool::new(true),
            yields: AtomicU64::new(0),
        }
    }

    /// Pretend the caller now runs on `unit`.
    pub fn set_current_unit(&self, unit: usize) {
        self.current.store(unit % self.units, Ordering::SeqCst);
    }

    /// Set what [`Executor::is_preemptible`] reports.
    pub fn set_preemptible(&self, preemptible: bool) {
        self.preemptible.store(preemptible, Ordering::SeqCst);
    }

    /// Number of spawned tasks not yet run.
    pub fn pending(&self) -> usize {
        self.queue.lock().len()
    }

    /// Run queued work, including work queued while draining. Returns how many
    /// tasks ran.
    pub fn run_pending(&self) -> usize {
        let mut ran = 0;
        loop {
            let task = self.queue.lock().pop_front();
            match task {
                Some(task) => {
                    task();
                    ran += 1;
                }
                None => return ran,
            }
        }
    }

    /// Number of cooperative yields requested so far.
    pub fn yields(&self) -> u64 {
        self.yields.load(Ordering::SeqCst)
    }
}

impl Executor for ManualExecutor {
    fn spawn<F>(&self, work: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.queue.lock().push_back(Box::new(work));
    }

    fn yield_now(&self) {
        self.yields.fetch_add(1, Ordering::SeqCst);
    }

    fn is_preemptible(&self) -> bool {
        self.preemptible.load(Ordering::SeqCst)
    }

    fn current_unit(&self) -> usize {
        self.current.load(Ordering::SeqCst)
    }

    fn units(&self) -> usize {
        self.units
    }
}
