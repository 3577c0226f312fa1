//! Error types for the sequential executor.
//!
//! Engine-level failures ([`Error`]) are always surfaced synchronously to the
//! caller that triggered them: submitting after shutdown, a pool that refuses
//! admission, invalid construction parameters, or an unsupported lifecycle
//! action. Failures of the tasks themselves never show up here; they travel
//! exclusively through the task's own [`ResultHandle`] as a [`TaskError`].
//!
//! [`ResultHandle`]: crate::ResultHandle
//! [`TaskError`]: crate::TaskError

use core::fmt;

/// A result type defaulting to the crate's [`Error`].
pub type Result<T, E = Error> = core::result::Result<T, E>;

/// All engine errors that `conseq` can produce.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// The executor no longer admits new work.
    ///
    /// Returned by every submission made after [`Terminable::shutdown`] or
    /// [`Terminable::terminate_now`].
    ///
    /// [`Terminable::shutdown`]: crate::Terminable::shutdown
    /// [`Terminable::terminate_now`]: crate::Terminable::terminate_now
    #[error("executor is shut down")]
    Shutdown,

    /// The worker pool refused the job.
    #[error("worker pool rejected the job: {reason}")]
    Rejected {
        /// Why the pool refused admission.
        reason: RejectReason,
    },

    /// Construction parameters were invalid or conflicting.
    #[error("invalid configuration: {reason}")]
    InvalidConfig {
        /// Human readable description of the offending option(s).
        reason: String,
    },

    /// The requested lifecycle action is not supported by this handle.
    #[error("unsupported operation `{operation}`: {reason}")]
    Unsupported {
        /// Name of the refused operation.
        operation: &'static str,
        /// Why it is refused.
        reason: &'static str,
    },
}

impl Error {
    pub(crate) fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            reason: reason.into(),
        }
    }
}

impl From<RejectReason> for Error {
    fn from(reason: RejectReason) -> Self {
        Self::Rejected { reason }
    }
}

/// Why a [`WorkerPool`] refused to accept a job.
///
/// [`WorkerPool`]: crate::WorkerPool
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RejectReason {
    /// The pool has been shut down and accepts no more work.
    Closed,
    /// The pool's queue is full.
    Saturated {
        /// Configured queue capacity.
        capacity: usize,
    },
    /// The pool could not obtain an execution context (e.g. thread spawn
    /// failure).
    Unavailable,
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed => f.write_str("pool is closed"),
            Self::Saturated { capacity } => write!(f, "queue is full (capacity {capacity})"),
            Self::Unavailable => f.write_str("no execution context available"),
        }
    }
}
