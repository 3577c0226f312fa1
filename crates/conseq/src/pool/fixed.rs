//! A fixed-size pool of worker threads sharing one FIFO queue.
//!
//! Each worker loops over a shared [`crossbeam_channel::Receiver`] and runs
//! jobs until every sender is gone and the queue is drained. Closing the pool
//! simply drops the pool's sender, so a graceful shutdown falls out of the
//! channel semantics: workers finish everything already queued, then exit.

use crate::{Error, Job, RejectReason, Rejected, WorkerPool, job};
use core::num::NonZeroUsize;
use crossbeam_channel::{Receiver, Sender, TrySendError};
use crossbeam_utils::CachePadded;
use parking_lot::RwLock;
use portable_atomic::{AtomicBool, AtomicUsize, Ordering};
use std::{
    panic::{self, AssertUnwindSafe},
    sync::Arc,
    thread,
};

/// A bounded-concurrency [`WorkerPool`] backed by `N` dedicated threads.
///
/// ## Features
///
/// - ✅ Caps the number of jobs running in parallel across all keys
/// - ✅ Optional queue capacity; a full queue rejects jobs synchronously
/// - ✅ [`shutdown_now`](WorkerPool::shutdown_now) returns every queued job
///
/// ## Recommended When
/// - Tasks are CPU bound or hit a resource that tolerates a fixed parallelism
/// - You want back-pressure at submission time (set a queue capacity)
pub struct FixedPool {
    sender: RwLock<Option<Sender<Job>>>,
    receiver: Receiver<Job>,
    shared: Arc<Shared>,
    threads: usize,
    capacity: Option<usize>,
}

#[derive(Default)]
struct Shared {
    live_workers: CachePadded<AtomicUsize>,
    active: CachePadded<AtomicUsize>,
    aborted: AtomicBool,
}

impl FixedPool {
    /// Spawns `threads` workers over an unbounded queue.
    ///
    /// Threads are named `{name}-{index}`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Rejected`] with [`RejectReason::Unavailable`] if the
    /// OS refuses to spawn a worker thread.
    pub fn new(threads: NonZeroUsize, name: impl Into<String>) -> Result<Self, Error> {
        Self::spawn(threads, None, name.into())
    }

    /// Spawns `threads` workers over a queue holding at most `capacity`
    /// waiting jobs.
    ///
    /// # Errors
    ///
    /// Same as [`FixedPool::new`].
    pub fn bounded(
        threads: NonZeroUsize,
        capacity: NonZeroUsize,
        name: impl Into<String>,
    ) -> Result<Self, Error> {
        Self::spawn(threads, Some(capacity.get()), name.into())
    }

    fn spawn(threads: NonZeroUsize, capacity: Option<usize>, name: String) -> Result<Self, Error> {
        let (sender, receiver) = match capacity {
            Some(capacity) => crossbeam_channel::bounded(capacity),
            None => crossbeam_channel::unbounded(),
        };
        let shared = Arc::new(Shared::default());

        for worker_id in 0..threads.get() {
            let rx = receiver.clone();
            let worker_shared = Arc::clone(&shared);
            worker_shared.live_workers.fetch_add(1, Ordering::SeqCst);
            let spawned = thread::Builder::new()
                .name(format!("{name}-{worker_id}"))
                .spawn(move || worker_loop(worker_id, rx, worker_shared));
            if let Err(_e) = spawned {
                #[cfg(feature = "tracing")]
                tracing::error!("Failed to spawn worker {worker_id} for pool {name}: {_e}");
                shared.live_workers.fetch_sub(1, Ordering::SeqCst);
                // Dropping the only sender lets already spawned workers exit.
                drop(sender);
                return Err(RejectReason::Unavailable.into());
            }
        }

        #[cfg(feature = "tracing")]
        tracing::debug!("Started pool {name} with {threads} workers (capacity {capacity:?})");

        Ok(Self {
            sender: RwLock::new(Some(sender)),
            receiver,
            shared,
            threads: threads.get(),
            capacity,
        })
    }

    /// Number of worker threads.
    pub const fn threads(&self) -> usize {
        self.threads
    }

    /// Configured queue capacity, `None` when unbounded.
    pub const fn capacity(&self) -> Option<usize> {
        self.capacity
    }

    /// Number of jobs waiting in the queue.
    pub fn queued(&self) -> usize {
        self.receiver.len()
    }
}

impl WorkerPool for FixedPool {
    fn execute(&self, job: Job) -> Result<(), Rejected> {
        // The refused job is moved out of the match so it is only ever dropped
        // by the caller, never under the sender lock.
        let refused = match self.sender.read().as_ref() {
            None => Some((job, RejectReason::Closed)),
            Some(tx) => match tx.try_send(job) {
                Ok(()) => None,
                Err(TrySendError::Full(job)) => Some((
                    job,
                    RejectReason::Saturated {
                        capacity: self.capacity.unwrap_or_default(),
                    },
                )),
                Err(TrySendError::Disconnected(job)) => Some((job, RejectReason::Closed)),
            },
        };
        match refused {
            None => Ok(()),
            Some((job, reason)) => Err(Rejected::new(job, reason)),
        }
    }

    fn shutdown(&self) {
        if self.sender.write().take().is_some() {
            #[cfg(feature = "tracing")]
            tracing::debug!("Pool shutting down with {} queued jobs", self.queued());
        }
    }

    fn shutdown_now(&self) -> Vec<Job> {
        self.shared.aborted.store(true, Ordering::SeqCst);
        self.shutdown();
        let unstarted: Vec<Job> = self.receiver.try_iter().collect();

        #[cfg(feature = "tracing")]
        tracing::debug!("Pool aborted with {} unstarted jobs", unstarted.len());

        unstarted
    }

    fn is_shutdown(&self) -> bool {
        self.sender.read().is_none()
    }

    fn is_terminated(&self) -> bool {
        self.is_shutdown() && self.shared.live_workers.load(Ordering::SeqCst) == 0
    }

    fn active_count(&self) -> usize {
        self.shared.active.load(Ordering::SeqCst)
    }
}

impl Drop for FixedPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

struct WorkerExit(Arc<Shared>);

impl Drop for WorkerExit {
    fn drop(&mut self) {
        self.0.live_workers.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Runs jobs until the queue is closed and drained.
///
/// After an abort, jobs a worker still manages to receive are released
/// instead of run; they count as abandoned.
fn worker_loop(_worker_id: usize, rx: Receiver<Job>, shared: Arc<Shared>) {
    #[cfg(feature = "tracing")]
    tracing::trace!("Worker {_worker_id} started");
    let _exit = WorkerExit(Arc::clone(&shared));

    for work in rx.iter() {
        if shared.aborted.load(Ordering::SeqCst) {
            job::release(work);
            continue;
        }
        shared.active.fetch_add(1, Ordering::SeqCst);
        if panic::catch_unwind(AssertUnwindSafe(|| work.run())).is_err() {
            #[cfg(feature = "tracing")]
            tracing::warn!("Worker {_worker_id} caught a panicking job");
        }
        shared.active.fetch_sub(1, Ordering::SeqCst);
    }

    #[cfg(feature = "tracing")]
    tracing::trace!("Worker {_worker_id} stopped");
}
