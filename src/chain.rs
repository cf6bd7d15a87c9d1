//! Drives a lead request and the requests chained to it through a backend one
//! job at a time, so the whole chain completes like a single request.
//!
//! The caller's completion is moved into a [`ChainState`] for the duration of
//! the chain. Each job is handed to the backend as a freshly projected
//! scatter-list request whose completion points back at the chain state; the
//! job's own descriptors are never rewritten. Once the last job reaches a
//! terminal status the follow-on jobs are re-linked on the lead request, the
//! caller's completion is restored and invoked exactly once.

use std::{collections::VecDeque, mem, sync::Arc};

use parking_lot::Mutex;

use crate::{
    error::AcompError,
    observability::{log_debug, log_trace},
    request::{Completion, ReqFlags, Request, Status},
    transform::{Op, TransformShared},
};

/// What a submission left behind.
pub(crate) struct Submitted {
    pub(crate) status: Status,
    /// `Busy` with nothing in flight: `req` holds its chain and completion
    /// again and has to be submitted anew.
    pub(crate) handed_back: bool,
}

/// Submit `req` and its chained requests to `transform`.
pub(crate) fn submit(transform: &Arc<TransformShared>, op: Op, req: &Request) -> Submitted {
    transform.metrics.record_request();

    if transform.alg.supports_chaining() || (!req.is_chained() && req.is_sg()) {
        transform.metrics.record_fast_path();
        let status = op.call(&*transform.alg, req);
        log_trace!(
            component = "chain",
            event = "fast_path",
            op = op.name(),
            status = ?status,
        );
        match &status {
            Status::Success => req.complete(Status::Success),
            Status::Failed(_) => {
                transform.metrics.record_failure();
                req.complete(status.clone());
            }
            Status::Busy => transform.metrics.record_busy(),
            Status::InProgress => {}
        }
        let handed_back =
            status == Status::Busy && !req.flags().contains(ReqFlags::MAY_BACKLOG);
        return Submitted {
            status,
            handed_back,
        };
    }

    transform.metrics.record_chain();
    let state = Arc::new(ChainState {
        transform: Arc::clone(transform),
        op,
        lead: req.clone(),
        progress: Mutex::new(ChainProgress::default()),
    });
    let status = state.start();
    let handed_back = state.progress.lock().handed_back;
    Submitted {
        status,
        handed_back,
    }
}

/// Where `finish` is running: on the submitting caller's thread, or inside a
/// backend's completion.
#[derive(Clone, Copy, PartialEq, Eq)]
enum Resume {
    Caller,
    Completion,
}

struct ChainState {
    transform: Arc<TransformShared>,
    op: Op,
    lead: Request,
    progress: Mutex<ChainProgress>,
}

#[derive(Default)]
struct ChainProgress {
    saved: Option<Completion>,
    pending: VecDeque<Request>,
    completed: Vec<Request>,
    current: Option<InFlight>,
    handed_back: bool,
}

struct InFlight {
    job: Request,
    // Projection handed to the backend; `None` for a fallback run, whose
    // produced length is copied back before it returns.
    issued: Option<Request>,
}

impl ChainState {
    fn start(self: &Arc<Self>) -> Status {
        {
            let mut progress = self.progress.lock();
            progress.saved = self.lead.take_completion();
            progress.pending = self.lead.take_chain();
            log_trace!(
                component = "chain",
                event = "chain_started",
                op = self.op.name(),
                jobs = progress.pending.len() + 1,
            );
        }

        let status = self.execute_one(&self.lead);
        match status {
            Status::Busy if !self.lead.flags().contains(ReqFlags::MAY_BACKLOG) => {
                self.rewind(self.lead.clone());
                self.transform.metrics.record_busy();
                return Status::Busy;
            }
            Status::Busy | Status::InProgress => {
                self.transform.metrics.record_busy();
                return Status::Busy;
            }
            Status::Success | Status::Failed(_) => {}
        }

        let status = self.finish(status, ReqFlags::ALL, Resume::Caller);
        match &status {
            Status::Success | Status::Failed(_) => self.notify(status.clone()),
            Status::Busy => self.transform.metrics.record_busy(),
            Status::InProgress => {}
        }
        status
    }

    /// Issue one job. Jobs with buffers a device cannot reach go to the
    /// synchronous fallback with their descriptors as they are; every other
    /// job goes to the backend as a scatter-list projection.
    fn execute_one(self: &Arc<Self>, job: &Request) -> Status {
        let nondma = job.is_nondma();
        self.transform.metrics.record_job(nondma);

        if nondma {
            self.progress.lock().current = Some(InFlight {
                job: job.clone(),
                issued: None,
            });
            let fallback = job.fallback_copy();
            let status = self.op.call(&*self.transform.fallback, &fallback);
            job.set_dlen(fallback.dlen());
            log_trace!(
                component = "chain",
                event = "nondma_fallback",
                op = self.op.name(),
                status = ?status,
            );
            return status;
        }

        let state = Arc::clone(self);
        let issued = job.project_sg(Arc::new(move |status| state.on_job_complete(status)));
        self.progress.lock().current = Some(InFlight {
            job: job.clone(),
            issued: Some(issued.clone()),
        });
        self.op.call(&*self.transform.alg, &issued)
    }

    /// Settle the current job with `status`, then run queued jobs until one is
    /// left running or the queue is empty. `mask` limits the behaviour flags
    /// of the jobs started here.
    ///
    /// A job answered with `Busy` without `MAY_BACKLOG` was not queued. On the
    /// caller's thread the unstarted jobs are handed back for resubmission;
    /// from a completion there is nobody to retry, so the job fails with
    /// `QueueFull` and the chain moves on.
    fn finish(self: &Arc<Self>, status: Status, mask: ReqFlags, resume: Resume) -> Status {
        self.settle(status.clone());

        let mut status = status;
        loop {
            let (job, more) = {
                let mut progress = self.progress.lock();
                match progress.pending.pop_front() {
                    Some(job) => {
                        let more = !progress.pending.is_empty();
                        (job, more)
                    }
                    None => break,
                }
            };

            job.mask_flags(mask);
            status = self.execute_one(&job);
            if status == Status::Busy && !job.flags().contains(ReqFlags::MAY_BACKLOG) {
                match resume {
                    Resume::Caller => {
                        self.rewind(job);
                        return Status::Busy;
                    }
                    Resume::Completion => {
                        status = Status::Failed(AcompError::QueueFull);
                        self.settle(status.clone());
                        continue;
                    }
                }
            }
            match status {
                Status::InProgress if more => return Status::Busy,
                Status::InProgress | Status::Busy => return status,
                Status::Success | Status::Failed(_) => self.settle(status.clone()),
            }
        }
        status
    }

    fn on_job_complete(self: &Arc<Self>, status: Status) {
        if !status.is_terminal() {
            log_trace!(
                component = "chain",
                event = "progress_absorbed",
                status = ?status,
            );
            return;
        }

        let status = self.finish(status, ReqFlags::MAY_BACKLOG, Resume::Completion);
        if status.is_terminal() {
            self.notify(status);
        }
    }

    /// Record the current job's outcome and release its projection.
    fn settle(&self, status: Status) {
        let Some(InFlight { job, issued }) = self.progress.lock().current.take() else {
            return;
        };
        if let Some(issued) = issued {
            job.set_dlen(issued.dlen());
        }
        if let Status::Failed(err) = &status {
            self.transform.metrics.record_failure();
            log_debug!(
                component = "chain",
                event = "job_failed",
                op = self.op.name(),
                error = %err,
            );
        }
        job.set_status(status);
        if !job.same(&self.lead) {
            self.progress.lock().completed.push(job);
        }
    }

    /// Hand the chain back after `job` made no progress: `job` and the jobs
    /// not yet started are re-linked on the lead and the caller's completion
    /// is restored, so the lead can be submitted again.
    fn rewind(&self, job: Request) {
        let (saved, pending) = {
            let mut progress = self.progress.lock();
            progress.current = None;
            progress.completed.clear();
            progress.handed_back = true;
            (progress.saved.take(), mem::take(&mut progress.pending))
        };
        log_debug!(
            component = "chain",
            event = "chain_rewound",
            op = self.op.name(),
            unstarted = pending.len() + 1,
        );
        let mut unstarted: Vec<Request> = Vec::with_capacity(pending.len() + 1);
        if !job.same(&self.lead) {
            unstarted.push(job);
        }
        unstarted.extend(pending);
        self.lead.relink(unstarted);
        self.lead.set_completion(saved);
    }

    fn notify(&self, status: Status) {
        let (saved, completed) = {
            let mut progress = self.progress.lock();
            (progress.saved.take(), mem::take(&mut progress.completed))
        };
        log_trace!(
            component = "chain",
            event = "chain_done",
            op = self.op.name(),
            jobs = completed.len() + 1,
            status = ?status,
        );
        self.lead.relink(completed);
        self.lead.set_completion(saved.clone());
        if let Some(completion) = saved {
            completion(status);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::{
        buffer::{Memory, ScatterList},
        transform::{AcompAlgorithm, Transform},
    };

    /// Fails every job whose first source byte is 0xff, succeeds otherwise
    /// with `dlen = slen`.
    struct Picky {
        calls: AtomicUsize,
    }

    impl Picky {
        fn run(&self, req: &Request) -> Status {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let first = req.src().to_vec(1).unwrap_or_default();
            if first.first() == Some(&0xff) {
                return Status::Failed(AcompError::Corrupt("bad header".into()));
            }
            req.set_dlen(req.slen());
            Status::Success
        }
    }

    impl AcompAlgorithm for Picky {
        fn name(&self) -> &str {
            "picky"
        }

        fn compress(&self, req: &Request) -> Status {
            self.run(req)
        }

        fn decompress(&self, req: &Request) -> Status {
            self.run(req)
        }
    }

    fn job(first: u8) -> Request {
        let req = Request::new();
        req.set_src_flat(Memory::from(vec![first; 8]), 8);
        req.set_dst_flat(Memory::zeroed(16), 16);
        req
    }

    #[test]
    fn failure_does_not_stop_later_jobs() {
        let alg = Arc::new(Picky {
            calls: AtomicUsize::new(0),
        });
        let transform = Transform::new(alg.clone()).unwrap();

        let seen = Arc::new(Mutex::new(Vec::new()));
        let lead = job(1);
        let bad = job(0xff);
        let last = job(2);
        lead.chain(&bad);
        lead.chain(&last);
        let sink = Arc::clone(&seen);
        lead.set_callback(ReqFlags::empty(), move |status| sink.lock().push(status));

        assert_eq!(transform.compress(&lead), Status::Success);
        assert_eq!(alg.calls.load(Ordering::SeqCst), 3);
        assert_eq!(*seen.lock(), vec![Status::Success]);
        assert_eq!(
            bad.status(),
            Some(Status::Failed(AcompError::Corrupt("bad header".into())))
        );
        assert_eq!(last.status(), Some(Status::Success));
        assert_eq!(last.dlen(), 8);

        let chained = lead.chained();
        assert_eq!(chained.len(), 2);
        assert!(chained[0].same(&bad) && chained[1].same(&last));
        assert_eq!(transform.metrics().failures, 1);
    }

    #[test]
    fn final_status_is_last_job() {
        let transform = Transform::new(Arc::new(Picky {
            calls: AtomicUsize::new(0),
        }))
        .unwrap();
        let lead = job(1);
        let bad = job(0xff);
        lead.chain(&bad);

        let seen = Arc::new(Mutex::new(None));
        let sink = Arc::clone(&seen);
        lead.set_callback(ReqFlags::empty(), move |status| *sink.lock() = Some(status));
        let status = transform.compress(&lead);
        assert!(matches!(status, Status::Failed(AcompError::Corrupt(_))));
        assert_eq!(seen.lock().clone(), Some(status));
        assert_eq!(lead.status(), Some(Status::Success));
    }

    #[test]
    fn single_scatter_job_takes_fast_path() {
        let transform = Transform::new(Arc::new(Picky {
            calls: AtomicUsize::new(0),
        }))
        .unwrap();
        let req = Request::new();
        req.set_src_sg(ScatterList::one(Memory::from(vec![3u8; 4]), 0, 4), 4);
        req.set_dst_sg(ScatterList::one(Memory::zeroed(4), 0, 4), 4);
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fired);
        req.set_callback(ReqFlags::empty(), move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        assert_eq!(transform.compress(&req), Status::Success);
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        let metrics = transform.metrics();
        assert_eq!(metrics.fast_path, 1);
        assert_eq!(metrics.chains_created, 0);
    }

    #[test]
    fn reset_mask_only_touches_behaviour_flags() {
        let transform = Transform::new(Arc::new(Picky {
            calls: AtomicUsize::new(0),
        }))
        .unwrap();
        let lead = job(1);
        let next = Request::new();
        next.set_src_nondma(Memory::from(vec![4u8; 8]), 8);
        next.set_dst_flat(Memory::zeroed(8), 8);
        next.set_flags(ReqFlags::MAY_SLEEP);
        lead.chain(&next);

        assert_eq!(transform.compress(&lead), Status::Success);
        assert!(next.flags().contains(ReqFlags::MAY_SLEEP | ReqFlags::SRC_NONDMA));
        assert_eq!(transform.metrics().nondma_fallbacks, 1);
        assert_eq!(next.dlen(), 8);
    }
}
