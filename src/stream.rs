//! Per-execution-unit scratch contexts for synchronous software backends.
//!
//! Each unit owns one slot. Slots start empty; [`StreamPool::alloc`] fills the
//! bootstrap slot eagerly and the rest are filled in the background the first
//! time a caller on that unit finds its slot empty. Until then the caller is
//! served the bootstrap slot, so it never waits on an allocation.

use std::{
    ops::{Deref, DerefMut},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Weak,
    },
};

use parking_lot::{MappedMutexGuard, Mutex, MutexGuard};

use crate::{
    error::{AcompError, AcompResult},
    executor::{Executor, Work},
    metrics::{StreamMetrics, StreamMetricsSnapshot},
    observability::{log_debug, log_info, log_trace},
    option::StreamOptions,
};

/// Allocates and releases the scratch context stored in each slot.
pub trait StreamAllocator: Send + Sync + 'static {
    /// Per-unit scratch state.
    type Context: Send + 'static;

    /// Allocate one context. Called with no slot lock held.
    fn alloc_ctx(&self) -> AcompResult<Self::Context>;

    /// Release a context taken out of its slot.
    fn free_ctx(&self, ctx: Self::Context) {
        drop(ctx);
    }
}

/// Pool of per-unit scratch contexts.
pub struct StreamPool<A: StreamAllocator, E: Executor> {
    shared: Arc<PoolShared<A, E>>,
    fill: Work,
}

struct PoolShared<A: StreamAllocator, E: Executor> {
    allocator: A,
    exec: Arc<E>,
    bootstrap: usize,
    allocated: AtomicBool,
    lifecycle: Mutex<()>,
    slots: Box<[Mutex<Option<A::Context>>]>,
    wanted: Box<[AtomicBool]>,
    metrics: StreamMetrics,
}

/// A locked slot. Derefs to the slot's context.
pub struct StreamGuard<'a, C> {
    unit: usize,
    guard: MappedMutexGuard<'a, C>,
}

impl<C> StreamGuard<'_, C> {
    /// Unit whose slot is held. Differs from the caller's unit when the
    /// bootstrap slot was lent out.
    pub fn unit(&self) -> usize {
        self.unit
    }
}

impl<C> Deref for StreamGuard<'_, C> {
    type Target = C;

    fn deref(&self) -> &C {
        &self.guard
    }
}

impl<C> DerefMut for StreamGuard<'_, C> {
    fn deref_mut(&mut self) -> &mut C {
        &mut self.guard
    }
}

impl<A: StreamAllocator, E: Executor> StreamPool<A, E> {
    /// Empty pool over `options.units` slots. Nothing is allocated until
    /// [`alloc`](Self::alloc).
    pub fn new(allocator: A, exec: Arc<E>, options: &StreamOptions) -> Self {
        let units = options.units.max(1);
        let shared = Arc::new(PoolShared {
            allocator,
            exec,
            bootstrap: 0,
            allocated: AtomicBool::new(false),
            lifecycle: Mutex::new(()),
            slots: (0..units).map(|_| Mutex::new(None)).collect(),
            wanted: (0..units).map(|_| AtomicBool::new(false)).collect(),
            metrics: StreamMetrics::default(),
        });
        let weak: Weak<PoolShared<A, E>> = Arc::downgrade(&shared);
        let fill = Work::new(move || {
            if let Some(shared) = weak.upgrade() {
                shared.run_fill();
            }
        });
        Self { shared, fill }
    }

    /// Fill the bootstrap slot. Returns immediately when already allocated.
    pub fn alloc(&self) -> AcompResult<()> {
        let _lifecycle = self.shared.lifecycle.lock();
        if self.shared.allocated.load(Ordering::Acquire) {
            return Ok(());
        }
        let ctx = self.shared.allocator.alloc_ctx()?;
        *self.shared.slots[self.shared.bootstrap].lock() = Some(ctx);
        self.shared.metrics.record_fill();
        self.shared.allocated.store(true, Ordering::Release);
        log_info!(
            component = "stream",
            event = "streams_allocated",
            units = self.shared.slots.len(),
            bootstrap = self.shared.bootstrap,
        );
        Ok(())
    }

    /// Cancel a pending background fill, wait for a running one, then release
    /// every context. Safe on a pool that was never allocated.
    pub fn free(&self) {
        let _lifecycle = self.shared.lifecycle.lock();
        self.shared.allocated.store(false, Ordering::Release);
        self.fill.cancel_sync();

        let mut freed = 0usize;
        for (slot, wanted) in self.shared.slots.iter().zip(self.shared.wanted.iter()) {
            wanted.store(false, Ordering::Release);
            if let Some(ctx) = slot.lock().take() {
                self.shared.allocator.free_ctx(ctx);
                freed += 1;
            }
        }
        if freed > 0 {
            log_debug!(component = "stream", event = "streams_freed", freed = freed);
        }
    }

    /// Whether `alloc` has run and `free` has not.
    pub fn is_allocated(&self) -> bool {
        self.shared.allocated.load(Ordering::Acquire)
    }

    /// Number of per-unit slots.
    pub fn units(&self) -> usize {
        self.shared.slots.len()
    }

    /// Executor the pool schedules fills on.
    pub fn executor(&self) -> &Arc<E> {
        &self.shared.exec
    }

    /// Lock the slot of the unit the caller runs on.
    pub fn lock_current(&self) -> AcompResult<StreamGuard<'_, A::Context>> {
        self.lock_on(self.shared.exec.current_unit())
    }

    /// Lock `unit`'s slot, or the bootstrap slot while `unit`'s is still
    /// empty. An empty slot is marked wanted and a background fill scheduled.
    pub fn lock_on(&self, unit: usize) -> AcompResult<StreamGuard<'_, A::Context>> {
        if !self.is_allocated() {
            return Err(AcompError::InvalidArgument("stream pool is not allocated"));
        }
        let unit = unit % self.units();
        match MutexGuard::try_map(self.shared.slots[unit].lock(), |slot| slot.as_mut()) {
            Ok(guard) => return Ok(StreamGuard { unit, guard }),
            Err(empty) => drop(empty),
        }

        self.shared.wanted[unit].store(true, Ordering::Release);
        self.fill.schedule(&*self.shared.exec);
        self.shared.metrics.record_borrowed();
        log_trace!(
            component = "stream",
            event = "bootstrap_slot_lent",
            unit = unit,
        );

        let bootstrap = self.shared.bootstrap;
        let guard = MutexGuard::try_map(self.shared.slots[bootstrap].lock(), |slot| slot.as_mut())
            .map_err(|_| AcompError::InvalidArgument("stream pool is not allocated"))?;
        Ok(StreamGuard {
            unit: bootstrap,
            guard,
        })
    }

    /// Slot a caller on `unit` is served from right now.
    pub fn home_slot(&self, unit: usize) -> usize {
        let unit = unit % self.units();
        if self.shared.slots[unit].lock().is_some() {
            unit
        } else {
            self.shared.bootstrap
        }
    }

    /// Whether `unit` is waiting for a background fill.
    pub fn is_wanted(&self, unit: usize) -> bool {
        self.shared.wanted[unit % self.units()].load(Ordering::Acquire)
    }

    /// Run the background fill on the calling thread.
    pub fn run_fill(&self) {
        self.shared.run_fill();
    }

    /// Counter snapshot.
    pub fn metrics(&self) -> StreamMetricsSnapshot {
        self.shared.metrics.snapshot()
    }
}

impl<A: StreamAllocator, E: Executor> PoolShared<A, E> {
    fn run_fill(&self) {
        for (unit, (slot, wanted)) in self.slots.iter().zip(self.wanted.iter()).enumerate() {
            if !wanted.load(Ordering::Acquire) {
                continue;
            }
            if !self.allocated.load(Ordering::Acquire) {
                return;
            }
            if slot.lock().is_some() {
                wanted.store(false, Ordering::Release);
                continue;
            }

            // Allocate outside the slot lock; a failed unit stays wanted until
            // the next trigger.
            let ctx = match self.allocator.alloc_ctx() {
                Ok(ctx) => ctx,
                Err(err) => {
                    self.metrics.record_fill_failure();
                    log_debug!(
                        component = "stream",
                        event = "stream_fill_failed",
                        unit = unit,
                        error = %err,
                    );
                    break;
                }
            };

            let mut guard = slot.lock();
            if guard.is_none() {
                *guard = Some(ctx);
                drop(guard);
                self.metrics.record_fill();
            } else {
                drop(guard);
                self.allocator.free_ctx(ctx);
            }
            wanted.store(false, Ordering::Release);
            log_trace!(component = "stream", event = "stream_filled", unit = unit);
        }
    }
}

impl<A: StreamAllocator, E: Executor> Drop for StreamPool<A, E> {
    fn drop(&mut self) {
        self.free();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;
    use crate::executor::ManualExecutor;

    struct Counting {
        next: AtomicUsize,
        fail: AtomicBool,
        freed: Arc<AtomicUsize>,
    }

    impl Counting {
        fn new() -> Self {
            Self {
                next: AtomicUsize::new(0),
                fail: AtomicBool::new(false),
                freed: Arc::new(AtomicUsize::new(0)),
            }
        }
    }

    impl StreamAllocator for Counting {
        type Context = usize;

        fn alloc_ctx(&self) -> AcompResult<usize> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(AcompError::OutOfMemory("test context"));
            }
            Ok(self.next.fetch_add(1, Ordering::SeqCst))
        }

        fn free_ctx(&self, _ctx: usize) {
            self.freed.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn pool(units: usize) -> (StreamPool<Counting, ManualExecutor>, Arc<ManualExecutor>) {
        let exec = Arc::new(ManualExecutor::new(units));
        let pool = StreamPool::new(
            Counting::new(),
            Arc::clone(&exec),
            &StreamOptions::default().units(units),
        );
        (pool, exec)
    }

    #[test]
    fn lock_before_alloc_is_rejected() {
        let (pool, _exec) = pool(2);
        assert!(pool.lock_current().is_err());
        pool.free();
    }

    #[test]
    fn alloc_is_idempotent() {
        let (pool, _exec) = pool(2);
        pool.alloc().unwrap();
        pool.alloc().unwrap();
        assert_eq!(pool.metrics().fills, 1);
        assert_eq!(pool.home_slot(0), 0);
        assert_eq!(pool.home_slot(1), 0);
    }

    #[test]
    fn failed_alloc_leaves_pool_unallocated() {
        let (pool, _exec) = pool(2);
        pool.shared.allocator.fail.store(true, Ordering::SeqCst);
        assert_eq!(pool.alloc(), Err(AcompError::OutOfMemory("test context")));
        assert!(!pool.is_allocated());
    }

    #[test]
    fn background_failure_keeps_unit_wanted() {
        let (pool, exec) = pool(3);
        pool.alloc().unwrap();
        exec.set_current_unit(1);
        assert_eq!(pool.lock_current().unwrap().unit(), 0);

        pool.shared.allocator.fail.store(true, Ordering::SeqCst);
        exec.run_pending();
        assert!(pool.is_wanted(1));
        assert_eq!(pool.metrics().fill_failures, 1);

        pool.shared.allocator.fail.store(false, Ordering::SeqCst);
        assert_eq!(pool.lock_current().unwrap().unit(), 0);
        exec.run_pending();
        assert!(!pool.is_wanted(1));
        assert_eq!(pool.lock_current().unwrap().unit(), 1);
    }

    #[test]
    fn free_releases_every_context_and_cancels_fill() {
        let (pool, exec) = pool(2);
        let freed = Arc::clone(&pool.shared.allocator.freed);
        pool.alloc().unwrap();
        exec.set_current_unit(1);
        drop(pool.lock_current().unwrap());
        assert_eq!(exec.pending(), 1);

        pool.free();
        exec.run_pending();
        assert_eq!(freed.load(Ordering::SeqCst), 1);
        assert_eq!(pool.metrics().fills, 1);
        assert!(!pool.is_allocated());

        pool.free();
        drop(pool);
        assert_eq!(freed.load(Ordering::SeqCst), 1);
    }
}
