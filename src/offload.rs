//! Worker-thread offload: presents a synchronous backend as an asynchronous
//! one.
//!
//! Jobs are handed to dedicated worker threads over a bounded channel. At most
//! `queue_depth` jobs are in flight; past that, jobs that allow backlogging
//! are parked and answered with `Busy`. The rest are also answered with `Busy`
//! but not kept, so the caller has to submit them again. A parked job gets an
//! `InProgress` notification when a worker picks it up, then its terminal
//! completion.

use std::{
    collections::VecDeque,
    sync::Arc,
    thread::{self, JoinHandle},
};

use parking_lot::Mutex;

use crate::{
    error::{AcompError, AcompResult},
    metrics::{OffloadMetrics, OffloadMetricsSnapshot},
    observability::{log_debug, log_trace, log_warn},
    option::OffloadOptions,
    request::{ReqFlags, Request, Status},
    transform::{AcompAlgorithm, Op, Transform, TransformBuilder},
};

struct Job {
    op: Op,
    req: Request,
}

struct QueueState {
    in_flight: usize,
    backlog: VecDeque<Job>,
}

struct OffloadShared {
    alg: Arc<dyn AcompAlgorithm>,
    queue_depth: usize,
    state: Mutex<QueueState>,
    metrics: OffloadMetrics,
}

/// Asynchronous backend running a synchronous one on worker threads.
pub struct OffloadBackend {
    shared: Arc<OffloadShared>,
    tx: Option<flume::Sender<Job>>,
    workers: Vec<JoinHandle<()>>,
}

impl OffloadBackend {
    /// Start `options.workers` threads serving `alg`.
    pub fn new(alg: Arc<dyn AcompAlgorithm>, options: OffloadOptions) -> AcompResult<Self> {
        if alg.is_async() {
            return Err(AcompError::InvalidArgument(
                "offloaded algorithm must be synchronous",
            ));
        }
        let shared = Arc::new(OffloadShared {
            alg,
            queue_depth: options.queue_depth,
            state: Mutex::new(QueueState {
                in_flight: 0,
                backlog: VecDeque::new(),
            }),
            metrics: OffloadMetrics::default(),
        });
        let (tx, rx) = flume::bounded(options.queue_depth);

        let mut workers = Vec::with_capacity(options.workers);
        for index in 0..options.workers {
            let shared = Arc::clone(&shared);
            let rx = rx.clone();
            let handle = thread::Builder::new()
                .name(format!("acomp-offload-{index}"))
                .spawn(move || shared.work(rx))
                .map_err(|_| AcompError::OutOfMemory("offload worker thread"))?;
            workers.push(handle);
        }
        log_debug!(
            component = "offload",
            event = "offload_started",
            alg = shared.alg.name(),
            workers = options.workers,
            queue_depth = options.queue_depth,
        );

        Ok(Self {
            shared,
            tx: Some(tx),
            workers,
        })
    }

    /// Transform over an offloaded `alg`, with `alg` itself as the fallback.
    pub fn transform(
        alg: Arc<dyn AcompAlgorithm>,
        options: OffloadOptions,
    ) -> AcompResult<Transform> {
        let backend = Self::new(Arc::clone(&alg), options)?;
        TransformBuilder::new(Arc::new(backend)).fallback(alg).build()
    }

    /// Counter snapshot.
    pub fn metrics(&self) -> OffloadMetricsSnapshot {
        self.shared.metrics.snapshot()
    }

    fn submit(&self, op: Op, req: &Request) -> Status {
        let Some(tx) = &self.tx else {
            return Status::Failed(AcompError::Backend("offload backend stopped".into()));
        };
        let job = Job {
            op,
            req: req.clone(),
        };

        let mut state = self.shared.state.lock();
        if state.in_flight < self.shared.queue_depth {
            state.in_flight += 1;
            let in_flight = state.in_flight;
            drop(state);

            self.shared.metrics.record_queued(in_flight);
            if tx.send(job).is_err() {
                self.shared.state.lock().in_flight -= 1;
                return Status::Failed(AcompError::Backend("offload workers stopped".into()));
            }
            return Status::InProgress;
        }

        if req.flags().contains(ReqFlags::MAY_BACKLOG) {
            state.backlog.push_back(job);
            let backlog = state.backlog.len();
            drop(state);
            self.shared.metrics.record_backlogged();
            log_trace!(
                component = "offload",
                event = "job_backlogged",
                backlog = backlog,
            );
            return Status::Busy;
        }

        drop(state);
        self.shared.metrics.record_rejected();
        log_trace!(component = "offload", event = "job_rejected");
        Status::Busy
    }
}

impl OffloadShared {
    fn work(&self, rx: flume::Receiver<Job>) {
        while let Ok(job) = rx.recv() {
            let mut next = Some(job);
            while let Some(job) = next.take() {
                let status = job.op.call(&*self.alg, &job.req);
                next = self.release();
                job.req.complete(status);
                if let Some(parked) = &next {
                    parked.req.complete(Status::InProgress);
                }
            }
        }
    }

    /// Give up a finished job's slot. A parked job inherits it.
    fn release(&self) -> Option<Job> {
        let mut state = self.state.lock();
        let next = state.backlog.pop_front();
        if next.is_none() {
            state.in_flight -= 1;
        }
        next
    }
}

impl AcompAlgorithm for OffloadBackend {
    fn name(&self) -> &str {
        self.shared.alg.name()
    }

    fn compress(&self, req: &Request) -> Status {
        self.submit(Op::Compress, req)
    }

    fn decompress(&self, req: &Request) -> Status {
        self.submit(Op::Decompress, req)
    }

    fn is_async(&self) -> bool {
        true
    }

    fn reqsize(&self) -> usize {
        self.shared.alg.reqsize()
    }

    fn init(&self) -> AcompResult<()> {
        self.shared.alg.init()
    }

    fn exit(&self) {
        self.shared.alg.exit();
    }
}

impl Drop for OffloadBackend {
    fn drop(&mut self) {
        drop(self.tx.take());
        let current = thread::current().id();
        for worker in self.workers.drain(..) {
            // The last handle can be released from a completion running on a
            // worker; that worker exits on its own once the channel is empty.
            if worker.thread().id() == current {
                continue;
            }
            if worker.join().is_err() {
                log_warn!(component = "offload", event = "worker_panicked");
            }
        }
    }
}
