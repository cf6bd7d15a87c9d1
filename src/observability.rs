//! Logging infrastructure for the request engine.
//!
//! All events go through `tracing` with target "acompress" and carry an
//! `event` field for filtering.
//!
//! ## Library Integration
//!
//! The crate never installs a global subscriber. Applications configure
//! tracing via `tracing_subscriber` or similar.
//!
//! ## Conventions
//!
//! - `event`: snake_case event name (required)
//! - `component`: subsystem (e.g., "chain", "stream", "offload")
//! - Use `%` for Display, `?` for Debug formatting
//! - Per-job events are trace level; they fire on every submission

/// Target for all log events emitted by this crate.
pub(crate) const ACOMP_TARGET: &str = "acompress";

/// Macro for info-level log events.
///
/// # Example
/// ```ignore
/// log_info!(
///     component = "stream",
///     event = "streams_allocated",
///     units = units,
/// );
/// ```
macro_rules! log_info {
    ($($field:tt)*) => {
        ::tracing::info!(target: $crate::observability::ACOMP_TARGET, $($field)*)
    };
}

/// Macro for debug-level log events.
macro_rules! log_debug {
    ($($field:tt)*) => {
        ::tracing::debug!(target: $crate::observability::ACOMP_TARGET, $($field)*)
    };
}

/// Macro for trace-level log events.
macro_rules! log_trace {
    ($($field:tt)*) => {
        ::tracing::trace!(target: $crate::observability::ACOMP_TARGET, $($field)*)
    };
}

/// Macro for warn-level log events.
macro_rules! log_warn {
    ($($field:tt)*) => {
        ::tracing::warn!(target: $crate::observability::ACOMP_TARGET, $($field)*)
    };
}

pub(crate) use log_debug;
pub(crate) use log_info;
pub(crate) use log_trace;
pub(crate) use log_warn;
