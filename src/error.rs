//! Reactive graph error types.

use std::sync::Arc;
use thiserror::Error;

/// Failure modes a reactive computation can surface.
///
/// Mirrors the platform error pattern used elsewhere in this workspace
/// (`blinc_platform::error::PlatformError`): one `#[error]` variant per
/// failure kind, cheap to clone so a cached error can be handed back to every
/// reader of a failed memo without re-running anything.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ReactiveError {
    /// A memo's compute function, directly or transitively, tried to read
    /// itself while already computing.
    #[error("cycle detected while recomputing node {0}")]
    CycleDetected(String),

    /// A signal or memo was read from inside a notification pass (pushing
    /// invalidation to consumers). Reading during notify would observe a
    /// torn, partially-invalidated graph.
    #[error("attempted to read a reactive value while it was notifying its consumers")]
    ReadDuringNotify,

    /// A memo's compute function panicked.
    #[error("compute function failed: {0}")]
    UserComputeFailure(Arc<str>),

    /// A watch's callback panicked. Never returned to a caller — the
    /// scheduler logs it and keeps draining.
    #[error("effect callback failed: {0}")]
    UserCallbackFailure(Arc<str>),
}

/// Crate-local result alias.
pub type Result<T> = std::result::Result<T, ReactiveError>;

/// Unwrap `result`, panicking with the `ReactiveError` itself as the panic
/// payload (rather than a formatted message via `.expect()`) so that a
/// `catch_unwind` further up the call stack — in a memo or watch that reads
/// through this accessor — can recover the exact error via
/// `downcast::<ReactiveError>()` instead of re-parsing a string.
pub(crate) fn unwrap_or_panic<T>(result: Result<T>) -> T {
    match result {
        Ok(value) => value,
        Err(err) => std::panic::panic_any(err),
    }
}
