//! Error type shared by every layer of the request engine.

use thiserror::Error;

/// Result type used across the crate.
pub type AcompResult<T> = Result<T, AcompError>;

/// Errors surfaced by transforms, backends and the scratch stream pool.
///
/// The type is `Clone` so the same error can be recorded on a job and handed to
/// the caller's completion.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AcompError {
    /// A request or configuration value was rejected before any work started.
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),
    /// A scratch context, scratch buffer or fallback transform could not be allocated.
    #[error("out of memory: {0}")]
    OutOfMemory(&'static str),
    /// The destination cannot hold the produced output.
    #[error("destination too small: need {needed} bytes, have {available}")]
    NoSpace {
        /// Bytes the backend needed to write.
        needed: usize,
        /// Bytes the destination could accept.
        available: usize,
    },
    /// Compressed input was malformed.
    #[error("corrupt input: {0}")]
    Corrupt(String),
    /// The backend queue was full for a job that may not be backlogged. Async
    /// submissions report this when the chain was handed back, and jobs
    /// started from a completion fail with it.
    #[error("backend queue is full")]
    QueueFull,
    /// Any other terminal backend error, propagated verbatim.
    #[error("backend error: {0}")]
    Backend(String),
}

impl AcompError {
    /// Whether resubmitting the same request may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, AcompError::QueueFull | AcompError::OutOfMemory(_))
    }
}
