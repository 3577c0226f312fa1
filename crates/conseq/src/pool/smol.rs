use crate::{Job, RejectReason, Rejected, WorkerPool, pool::Occupancy};
use std::sync::Arc;

/// A [`WorkerPool`] that runs jobs on [`smol`](https://docs.rs/smol)'s
/// global blocking thread pool.
///
/// smol sizes its blocking pool itself (see `BLOCKING_MAX_THREADS`), so this
/// pool has no concurrency knob of its own.
///
/// ## Caveats
/// Jobs handed to smol cannot be taken back, so
/// [`shutdown_now`](WorkerPool::shutdown_now) always returns an empty list.
#[derive(Default)]
pub struct SmolPool {
    occupancy: Arc<Occupancy>,
}

impl SmolPool {
    /// Creates a pool over smol's blocking executor.
    pub fn new() -> Self {
        Self::default()
    }
}

impl WorkerPool for SmolPool {
    fn execute(&self, job: Job) -> Result<(), Rejected> {
        let Some(guard) = self.occupancy.enter() else {
            return Err(Rejected::new(job, RejectReason::Closed));
        };
        smol::unblock(move || {
            let _guard = guard;
            job.run();
        })
        .detach();
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

#[cfg(test)]
mod tests {
    use super::*;
    use std::{sync::mpsc, time::Duration};

    #[test]
    fn runs_jobs_and_closes() {
        let pool = SmolPool::new();
        let (tx, rx) = mpsc::channel();
        pool.execute(Job::new(move || tx.send(5).unwrap())).unwrap();
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), 5);

        pool.shutdown();
        assert!(pool.is_shutdown());
        assert!(pool.execute(Job::new(|| {})).is_err());
    }
}
