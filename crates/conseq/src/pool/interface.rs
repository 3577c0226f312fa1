use crate::{Job, RejectReason};
use core::fmt;

/// A key-agnostic pool of execution contexts.
///
/// The executor hands every chain link to a `WorkerPool` and relies on
/// nothing beyond submit/close semantics: jobs may run on any thread, in any
/// order relative to each other. Ordering per sequence key is enforced
/// entirely by the executor, which only submits a link once its predecessor
/// has settled.
///
/// Implementations must never run a job on the submitting thread from inside
/// [`execute`](Self::execute); the executor may be holding a ledger shard lock
/// at that point. Dropping a job there is fine.
///
/// ## Provided Pools
///
/// - [`ThreadPerTaskPool`]: unbounded, one thread per job
/// - [`FixedPool`]: a fixed number of threads sharing one queue
/// - [`TokioPool`]: the blocking pool of a caller-owned tokio runtime
///   (`async-tokio`)
/// - [`SmolPool`]: smol's blocking pool (`async-smol`)
///
/// [`ThreadPerTaskPool`]: crate::ThreadPerTaskPool
/// [`FixedPool`]: crate::FixedPool
/// [`TokioPool`]: crate::TokioPool
/// [`SmolPool`]: crate::SmolPool
pub trait WorkerPool: Send + Sync {
    /// Accepts a job for asynchronous execution.
    ///
    /// # Errors
    ///
    /// Returns the job back inside [`Rejected`] if the pool is closed or
    /// saturated. The caller decides whether to drop (abandon) it.
    fn execute(&self, job: Job) -> Result<(), Rejected>;

    /// Stops accepting new jobs. Jobs already accepted still run. Idempotent.
    fn shutdown(&self);

    /// Stops accepting new jobs and returns those that were accepted but
    /// never started. Jobs already running are left to finish on their own.
    fn shutdown_now(&self) -> Vec<Job>;

    /// Returns `true` once [`shutdown`](Self::shutdown) or
    /// [`shutdown_now`](Self::shutdown_now) has been called.
    fn is_shutdown(&self) -> bool;

    /// Returns `true` once the pool is shut down and no job is queued or
    /// running.
    fn is_terminated(&self) -> bool;

    /// Best-effort count of jobs currently executing.
    fn active_count(&self) -> usize;
}

/// A job the pool refused, handed back to the submitter.
pub struct Rejected {
    job: Job,
    reason: RejectReason,
}

impl Rejected {
    /// Pairs a refused job with the reason it was refused.
    pub const fn new(job: Job, reason: RejectReason) -> Self {
        Self { job, reason }
    }

    /// Why the pool refused the job.
    pub const fn reason(&self) -> RejectReason {
        self.reason
    }

    /// Recovers the refused job.
    pub fn into_job(self) -> Job {
        self.job
    }

    pub(crate) fn into_parts(self) -> (Job, RejectReason) {
        (self.job, self.reason)
    }
}

impl fmt::Debug for Rejected {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Rejected")
            .field("reason", &self.reason)
            .finish_non_exhaustive()
    }
}

impl fmt::Display for Rejected {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "job rejected: {}", self.reason)
    }
}

impl core::error::Error for Rejected {}
