//! Transform instances and the backend interface they dispatch to.

mod scomp;

use std::{fmt, sync::Arc};

use futures::channel::oneshot;
use parking_lot::Mutex;
pub use scomp::{ScompAdapter, ScompAlgorithm, ScompStream, ScompStreams};

use crate::{
    chain,
    error::{AcompError, AcompResult},
    metrics::{TransformMetrics, TransformMetricsSnapshot},
    observability::{log_debug, log_warn},
    option::TransformOptions,
    request::{Completion, Request, Status},
};

/// A compression backend.
///
/// `compress` and `decompress` either finish synchronously, returning
/// `Success` or `Failed` without touching the request's completion, or accept
/// the job and return `InProgress` (running) or `Busy` (queued behind a full
/// backend). In the latter two cases the backend later calls
/// [`Request::complete`] with the terminal status, possibly preceded by an
/// `InProgress` notification when a queued job starts running.
///
/// Only a request carrying [`MAY_BACKLOG`](crate::ReqFlags::MAY_BACKLOG) may
/// be queued. Without it, `Busy` means the job was not accepted: the backend
/// keeps no reference and never completes it, and the caller submits it again
/// later.
///
/// Backends always receive scatter-list buffers unless they report
/// [`supports_chaining`](Self::supports_chaining), or the job is being served
/// by the synchronous fallback.
pub trait AcompAlgorithm: Send + Sync + 'static {
    /// Algorithm name.
    fn name(&self) -> &str;

    /// Compress `req`'s source into its destination.
    fn compress(&self, req: &Request) -> Status;

    /// Decompress `req`'s source into its destination.
    fn decompress(&self, req: &Request) -> Status;

    /// Whether jobs may complete after the call returns.
    fn is_async(&self) -> bool {
        false
    }

    /// Whether the backend walks chained requests itself.
    fn supports_chaining(&self) -> bool {
        false
    }

    /// Per-request context the backend needs, in bytes.
    fn reqsize(&self) -> usize {
        0
    }

    /// Called once when a transform is built on this algorithm.
    fn init(&self) -> AcompResult<()> {
        Ok(())
    }

    /// Called once when the last handle to the transform goes away.
    fn exit(&self) {}
}

/// Which direction a job runs in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    /// Pack the source into the destination.
    Compress,
    /// Unpack the source into the destination.
    Decompress,
}

impl Op {
    pub(crate) fn call(self, alg: &dyn AcompAlgorithm, req: &Request) -> Status {
        match self {
            Op::Compress => alg.compress(req),
            Op::Decompress => alg.decompress(req),
        }
    }

    /// Lowercase name for logs.
    pub fn name(self) -> &'static str {
        match self {
            Op::Compress => "compress",
            Op::Decompress => "decompress",
        }
    }
}

type FallbackFactory = Box<dyn FnOnce() -> AcompResult<Arc<dyn AcompAlgorithm>> + Send>;

enum Fallback {
    Missing,
    Ready(Arc<dyn AcompAlgorithm>),
    Factory(FallbackFactory),
}

/// Builds a [`Transform`].
///
/// An asynchronous algorithm needs a synchronous fallback, used for jobs whose
/// buffers a device cannot reach. A synchronous algorithm is its own fallback.
pub struct TransformBuilder {
    alg: Arc<dyn AcompAlgorithm>,
    fallback: Fallback,
    options: TransformOptions,
}

impl TransformBuilder {
    /// Builder over `alg` with no fallback.
    pub fn new(alg: Arc<dyn AcompAlgorithm>) -> Self {
        Self {
            alg,
            fallback: Fallback::Missing,
            options: TransformOptions::default(),
        }
    }

    /// Use `fallback` for jobs the backend cannot take.
    pub fn fallback(self, fallback: Arc<dyn AcompAlgorithm>) -> Self {
        Self {
            fallback: Fallback::Ready(fallback),
            ..self
        }
    }

    /// Allocate the fallback lazily, only if the algorithm turns out to need
    /// one.
    pub fn fallback_with<F>(self, factory: F) -> Self
    where
        F: FnOnce() -> AcompResult<Arc<dyn AcompAlgorithm>> + Send + 'static,
    {
        Self {
            fallback: Fallback::Factory(Box::new(factory)),
            ..self
        }
    }

    /// Override the default options.
    pub fn options(self, options: TransformOptions) -> Self {
        Self { options, ..self }
    }

    /// Resolve the fallback, check it and run the algorithm's `init`.
    pub fn build(self) -> AcompResult<Transform> {
        let alg = self.alg;
        let fallback = if alg.is_async() {
            let fallback = match self.fallback {
                Fallback::Missing => {
                    return Err(AcompError::OutOfMemory("no synchronous fallback available"))
                }
                Fallback::Ready(fallback) => fallback,
                Fallback::Factory(factory) => factory()?,
            };
            if fallback.is_async() {
                return Err(AcompError::InvalidArgument("fallback must be synchronous"));
            }
            if fallback.reqsize() > self.options.max_sync_reqsize {
                log_warn!(
                    component = "transform",
                    event = "fallback_reqsize_rejected",
                    alg = alg.name(),
                    fallback = fallback.name(),
                    reqsize = fallback.reqsize(),
                    max = self.options.max_sync_reqsize,
                );
                return Err(AcompError::InvalidArgument(
                    "fallback request context too large",
                ));
            }
            fallback
        } else {
            Arc::clone(&alg)
        };

        alg.init()?;

        log_debug!(
            component = "transform",
            event = "transform_created",
            alg = alg.name(),
            fallback = fallback.name(),
            is_async = alg.is_async(),
            chaining = alg.supports_chaining(),
        );
        Ok(Transform {
            shared: Arc::new(TransformShared {
                alg,
                fallback,
                metrics: TransformMetrics::default(),
            }),
        })
    }
}

pub(crate) struct TransformShared {
    pub(crate) alg: Arc<dyn AcompAlgorithm>,
    pub(crate) fallback: Arc<dyn AcompAlgorithm>,
    pub(crate) metrics: TransformMetrics,
}

impl Drop for TransformShared {
    fn drop(&mut self) {
        self.alg.exit();
    }
}

/// A compression transform bound to one backend.
///
/// Cloning is cheap; clones share the backend and the counters.
#[derive(Clone)]
pub struct Transform {
    shared: Arc<TransformShared>,
}

impl Transform {
    /// Start building a transform over `alg`.
    pub fn builder(alg: Arc<dyn AcompAlgorithm>) -> TransformBuilder {
        TransformBuilder::new(alg)
    }

    /// Transform over `alg` with no fallback and default options.
    pub fn new(alg: Arc<dyn AcompAlgorithm>) -> AcompResult<Self> {
        TransformBuilder::new(alg).build()
    }

    /// Backend name.
    pub fn name(&self) -> &str {
        self.shared.alg.name()
    }

    /// Whether jobs may complete after `compress` returns.
    pub fn is_async(&self) -> bool {
        self.shared.alg.is_async()
    }

    /// Per-request context the backend needs.
    pub fn reqsize(&self) -> usize {
        self.shared.alg.reqsize()
    }

    /// Compress `req` and everything chained to it.
    ///
    /// A terminal return means the completion has already run with that
    /// status. `InProgress` and `Busy` mean it will run later; a chain reports
    /// only its final status, a single job handed straight to an asynchronous
    /// backend may also see that backend's `InProgress` notification first.
    ///
    /// The exception is `Busy` for a job without `MAY_BACKLOG` that the
    /// backend could not queue. Nothing is left in flight: the unstarted jobs
    /// are chained to `req` again, its completion is left in place and the
    /// caller submits `req` again. Setting `MAY_BACKLOG` on every job of a
    /// chain, or on none, keeps the two meanings of `Busy` apart.
    pub fn compress(&self, req: &Request) -> Status {
        chain::submit(&self.shared, Op::Compress, req).status
    }

    /// Decompress `req` and everything chained to it. See [`compress`](Self::compress).
    pub fn decompress(&self, req: &Request) -> Status {
        chain::submit(&self.shared, Op::Decompress, req).status
    }

    /// Compress and wait for the terminal status. Replaces any completion set
    /// on `req`. Returns the lead job's produced length, or
    /// [`AcompError::QueueFull`] when the backend had no room for a job that
    /// does not allow backlogging.
    pub async fn compress_async(&self, req: &Request) -> AcompResult<u32> {
        self.run_async(Op::Compress, req).await
    }

    /// Decompress and wait for the terminal status. See
    /// [`compress_async`](Self::compress_async).
    pub async fn decompress_async(&self, req: &Request) -> AcompResult<u32> {
        self.run_async(Op::Decompress, req).await
    }

    /// Counter snapshot.
    pub fn metrics(&self) -> TransformMetricsSnapshot {
        self.shared.metrics.snapshot()
    }

    async fn run_async(&self, op: Op, req: &Request) -> AcompResult<u32> {
        let (tx, rx) = oneshot::channel();
        let tx = Mutex::new(Some(tx));
        let completion: Completion = Arc::new(move |status: Status| {
            if !status.is_terminal() {
                return;
            }
            if let Some(tx) = tx.lock().take() {
                let _ = tx.send(status);
            }
        });
        req.set_completion(Some(completion));

        if chain::submit(&self.shared, op, req).handed_back {
            req.set_completion(None);
            return Err(AcompError::QueueFull);
        }
        let status = rx
            .await
            .map_err(|_| AcompError::Backend("request dropped before completion".into()))?;
        status.into_result()?;
        Ok(req.dlen())
    }
}

impl fmt::Debug for Transform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transform")
            .field("alg", &self.shared.alg.name())
            .field("fallback", &self.shared.fallback.name())
            .finish()
    }
}
