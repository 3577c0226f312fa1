use crate::{Error, Job, RejectReason, Rejected, WorkerPool, pool::Occupancy};
use std::sync::Arc;
use tokio::runtime::Handle;

/// A [`WorkerPool`] that runs jobs on the blocking thread pool of a
/// caller-owned [`tokio`](https://docs.rs/tokio) runtime.
///
/// The runtime's lifecycle stays with the caller: shutting this pool down
/// only stops it from accepting jobs. Its concurrency bound is the runtime's
/// `max_blocking_threads`.
///
/// ## Caveats
/// Jobs handed to tokio cannot be taken back, so
/// [`shutdown_now`](WorkerPool::shutdown_now) always returns an empty list.
pub struct TokioPool {
    handle: Handle,
    occupancy: Arc<Occupancy>,
}

impl TokioPool {
    /// Creates a pool over the given runtime handle.
    pub fn new(handle: Handle) -> Self {
        Self {
            handle,
            occupancy: Arc::new(Occupancy::default()),
        }
    }

    /// Creates a pool over the runtime the caller is currently running in.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] when called outside a tokio runtime.
    pub fn current() -> Result<Self, Error> {
        let handle = Handle::try_current()
            .map_err(|e| Error::invalid_config(format!("no tokio runtime: {e}")))?;
        Ok(Self::new(handle))
    }
}

impl WorkerPool for TokioPool {
    fn execute(&self, job: Job) -> Result<(), Rejected> {
        let Some(guard) = self.occupancy.enter() else {
            return Err(Rejected::new(job, RejectReason::Closed));
        };
        // If the runtime is shutting down tokio drops the closure unrun; the
        // guard and job go with it and the job counts as abandoned.
        drop(self.handle.spawn_blocking(move || {
            let _guard = guard;
            job.run();
        }));
        Ok(())
    }

    fn shutdown(&self) {
        self.occupancy.close();
    }

    fn shutdown_now(&self) -> Vec<Job> {
        self.occupancy.close();
        Vec::new()
    }

    fn is_shutdown(&self) -> bool {
        self.occupancy.is_closed()
    }

    fn is_terminated(&self) -> bool {
        self.occupancy.is_drained()
    }

    fn active_count(&self) -> usize {
        self.occupancy.live()
    }
}
