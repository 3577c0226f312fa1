use crate::{Job, RejectReason, Rejected, WorkerPool, pool::Occupancy};
use parking_lot::Mutex;
use portable_atomic::{AtomicUsize, Ordering};
use std::{sync::Arc, thread};

/// An unbounded [`WorkerPool`] that runs every job on a fresh thread.
///
/// ## Features
///
/// - ✅ Maximum parallelism across keys, no queueing
/// - ❌ No cap on thread count; a burst of distinct keys spawns a burst of
///   threads
///
/// ## Recommended When
/// - Tasks mostly block on I/O and keys are plentiful
/// - You would rather not size a pool up front
pub struct ThreadPerTaskPool {
    name: String,
    occupancy: Arc<Occupancy>,
    spawned: AtomicUsize,
}

impl ThreadPerTaskPool {
    /// Creates a pool whose threads are named `{name}-{n}`.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            occupancy: Arc::new(Occupancy::default()),
            spawned: AtomicUsize::new(0),
        }
    }
}

impl WorkerPool for ThreadPerTaskPool {
    fn execute(&self, job: Job) -> Result<(), Rejected> {
        let Some(guard) = self.occupancy.enter() else {
            return Err(Rejected::new(job, RejectReason::Closed));
        };

        let n = self.spawned.fetch_add(1, Ordering::Relaxed);
        // `Builder::spawn` swallows the closure on failure; park the job where
        // it can be recovered.
        let parked = Arc::new(Mutex::new(Some(job)));
        let spawned = {
            let parked = Arc::clone(&parked);
            thread::Builder::new()
                .name(format!("{}-{n}", self.name))
                .spawn(move || {
                    let _guard = guard;
                    let job = parked.lock().take();
                    if let Some(job) = job {
                        job.run();
                    }
                })
        };

        match spawned {
            Ok(_) => Ok(()),
            Err(_e) => {
                #[cfg(feature = "tracing")]
                tracing::warn!("Failed to spawn thread for job: {_e}");
                let job = parked.lock().take();
                match job {
                    Some(job) => Err(Rejected::new(job, RejectReason::Unavailable)),
                    // Unreachable in practice: the thread never started.
                    None => Ok(()),
                }
            }
        }
    }

    fn shutdown(&self) {
        self.occupancy.close();
    }

    fn shutdown_now(&self) -> Vec<Job> {
        // Every accepted job started on its own thread immediately.
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
