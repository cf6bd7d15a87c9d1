//! Scheduling substrate used by the buffer walk and the scratch stream pool.
//!
//! An [`Executor`] runs background work, offers a cooperative yield point and
//! answers which execution unit the caller is running on.

/// Executor backed by a tokio runtime.
#[cfg(feature = "tokio")]
pub mod tokio;

mod manual;
mod work;

pub use manual::ManualExecutor;
pub(crate) use work::Work;

/// Runs background work and reports where the caller is running.
pub trait Executor: Send + Sync + 'static {
    /// Queue `work` to run later on a background worker.
    fn spawn<F>(&self, work: F)
    where
        F: FnOnce() + Send + 'static;

    /// Cooperative scheduling point. Never blocks waiting for an event.
    fn yield_now(&self) {
        std::thread::yield_now();
    }

    /// Whether long non-yielding sections can be preempted on this platform.
    fn is_preemptible(&self) -> bool {
        true
    }

    /// Execution unit the caller is currently running on, in `0..units()`.
    fn current_unit(&self) -> usize;

    /// Number of execution units.
    fn units(&self) -> usize;
}
