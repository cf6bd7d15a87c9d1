#![deny(missing_docs)]
//! Asynchronous compression request engine.
//!
//! Callers describe jobs as [`Request`]s over flat memory, folios or scatter
//! lists, chain follow-on jobs to a lead request and submit the lead to a
//! [`Transform`]. The transform drives the chain through its backend one job at
//! a time, whether the backend finishes synchronously or completes later from
//! another thread, and reports the chain's final status through the lead
//! request's completion exactly once.
//!
//! Software backends implement [`ScompAlgorithm`] and get per-execution-unit
//! scratch streams from a [`StreamPool`]; [`OffloadBackend`] runs any
//! synchronous backend on worker threads.

/// Buffer descriptors and the span-by-span buffer walk.
pub mod buffer;
mod chain;
/// Error type shared across the crate.
pub mod error;
/// Scheduling substrate: executors and background work.
pub mod executor;
/// Counters and their snapshots.
pub mod metrics;
mod observability;
/// Worker-thread offload backend.
pub mod offload;
/// Construction options.
pub mod option;
/// Job descriptor.
pub mod request;
/// Per-execution-unit scratch stream pool.
pub mod stream;
/// Transforms and the backend interface.
pub mod transform;
#[cfg(feature = "zstd")]
/// Zstandard software backend.
pub mod zstd;

pub use crate::{
    buffer::{AcompWalk, Buffer, Folio, Memory, ScatterList, SgEntry, PAGE_SIZE},
    error::{AcompError, AcompResult},
    executor::{Executor, ManualExecutor},
    offload::OffloadBackend,
    option::{OffloadOptions, StreamOptions, TransformOptions},
    request::{Completion, ReqFlags, Request, Status},
    stream::{StreamAllocator, StreamGuard, StreamPool},
    transform::{AcompAlgorithm, Op, ScompAdapter, ScompAlgorithm, Transform, TransformBuilder},
};

#[cfg(feature = "tokio")]
pub use crate::executor::tokio::TokioExecutor;

#[cfg(feature = "zstd")]
pub use crate::zstd::ZstdScomp;
