//! Error handling for the garbage collector core.
//!
//! Covers the taxonomy a caller can observe: failures surfaced synchronously
//! from the smart-pointer-facing API, and failures captured from the worker
//! thread for reporting at shutdown.

use std::sync::PoisonError;

/// Result type used throughout this crate.
pub type Result<T, E = Error> = core::result::Result<T, E>;

/// Errors that can occur while allocating, registering, or collecting
/// GC-managed memory.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The host allocator returned null for a managed block or queue node.
    #[error("allocation failed for {size} bytes")]
    AllocationFailure {
        /// Requested allocation size in bytes.
        size: usize,
    },
    /// A message referenced a slot that does not exist, or tried to remove
    /// an edge that isn't there. Debug builds assert instead of returning
    /// this; release builds log and skip the message.
    #[error("invariant violation: {0}")]
    InvariantViolation(String),
    /// A user destructor (free callback) panicked while running.
    #[error("free callback panicked: {0}")]
    FreeCallbackPanicked(String),
    /// An unhandled error escaped message application on the worker thread.
    /// Captured and reported at shutdown.
    #[error("worker thread failed: {0}")]
    WorkerFatal(String),
    /// An API call was made after `shutdown()` completed.
    #[error("operation attempted after collector shutdown")]
    UseAfterShutdown,
    /// A lock was poisoned by a panicking holder.
    #[error("failed to acquire lock: {0}")]
    LockError(String),
    /// The worker thread could not be joined or signaled.
    #[error("thread synchronization error: {0}")]
    SyncError(String),
}

impl<T> From<PoisonError<T>> for Error {
    fn from(error: PoisonError<T>) -> Self {
        Error::LockError(format!("poisoned lock: {error}"))
    }
}
