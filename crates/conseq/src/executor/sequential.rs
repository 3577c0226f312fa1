use crate::{
    Error, ExecutorBuilder, FixedPool, Job, LifecycleState, RejectReason, Result, ResultHandle,
    Terminable, WorkerPool,
    handle::{self, Completer},
    job,
    ledger::{Ledger, Link},
};
use core::{convert::Infallible, fmt, hash::Hash, time::Duration};
use crossbeam_utils::CachePadded;
use portable_atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;
#[cfg(feature = "tracing")]
use tracing::instrument;

/// Runs tasks so that tasks sharing a sequence key execute strictly one at a
/// time in submission order, while tasks under different keys run in
/// parallel on a shared [`WorkerPool`].
///
/// Every submission becomes a link in its key's chain. The first link of a
/// chain goes straight to the pool; each later link is parked behind its
/// predecessor and only handed to the pool once the predecessor has settled
/// (completed, failed, panicked, or been abandoned). A key's ledger entry is
/// reclaimed on a separate single-thread admin pool as soon as its last link
/// settles, so memory stays proportional to the number of keys with work in
/// flight.
///
/// ## Features
///
/// - ✅ Per-key FIFO ordering with happens-before between consecutive tasks
/// - ✅ Cross-key parallelism bounded only by the worker pool
/// - ✅ Failing or panicking tasks never stall their successors
/// - ✅ Result handles are isolated from the chain: cancelling one never lets
///   a successor overtake its predecessor
/// - ❌ No priorities and no cross-key ordering
///
/// ## Recommended When
/// - Events for the same entity (order, account, cart) must apply in order
/// - Unrelated entities should not wait for each other
///
/// ## Example
/// ```
/// use conseq::SequentialExecutor;
///
/// let executor = SequentialExecutor::<&str>::with_concurrency(4).unwrap();
/// let first = executor.submit("cart-42", || Ok::<_, ()>(1)).unwrap();
/// let second = executor.submit("cart-42", || Ok::<_, ()>(2)).unwrap();
/// assert_eq!(first.wait(), Ok(1));
/// assert_eq!(second.wait(), Ok(2));
/// executor.close();
/// ```
pub struct SequentialExecutor<K>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
{
    inner: Arc<Inner<K>>,
}

struct Inner<K> {
    ledger: Arc<Ledger<K>>,
    workers: Arc<dyn WorkerPool>,
    admin: FixedPool,
    /// Links admitted but not yet settled.
    in_flight: CachePadded<AtomicUsize>,
    state: AtomicU8,
    pools_closed: AtomicBool,
}

impl<K> SequentialExecutor<K>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
{
    /// Starts configuring an executor.
    pub fn builder() -> ExecutorBuilder<K> {
        ExecutorBuilder::new()
    }

    /// Creates an executor that runs every task on a fresh thread.
    ///
    /// # Errors
    ///
    /// Fails only if the admin thread cannot be spawned.
    pub fn new() -> Result<Self> {
        Self::builder().build()
    }

    /// Creates an executor on a [`FixedPool`] of `concurrency` threads.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] when `concurrency` is zero.
    pub fn with_concurrency(concurrency: usize) -> Result<Self> {
        Self::builder().worker_concurrency(concurrency).build()
    }

    /// Creates an executor on a caller-supplied pool.
    ///
    /// # Errors
    ///
    /// Fails only if the admin thread cannot be spawned.
    pub fn with_pool(pool: Arc<dyn WorkerPool>) -> Result<Self> {
        Self::builder().worker_pool(pool).build()
    }

    pub(crate) fn from_parts(workers: Arc<dyn WorkerPool>, admin: FixedPool) -> Self {
        Self {
            inner: Arc::new(Inner {
                ledger: Arc::new(Ledger::new()),
                workers,
                admin,
                in_flight: CachePadded::new(AtomicUsize::new(0)),
                state: AtomicU8::new(LifecycleState::Running.as_u8()),
                pools_closed: AtomicBool::new(false),
            }),
        }
    }

    /// Submits `task` to run after every task previously submitted under
    /// `key` has settled.
    ///
    /// The returned handle completes with the task's value, its error, its
    /// panic message, or [`TaskError::Abandoned`] if the task is dropped
    /// unrun by [`terminate_now`](Terminable::terminate_now).
    ///
    /// # Errors
    ///
    /// - [`Error::Shutdown`] once the executor has been shut down
    /// - [`Error::Rejected`] if the worker pool refuses a task that would
    ///   start right away (e.g. its queue is full). The ledger is unchanged
    ///   and no task runs.
    ///
    /// [`TaskError::Abandoned`]: crate::TaskError::Abandoned
    #[cfg_attr(feature = "tracing", instrument(level = "trace", skip_all))]
    pub fn submit<F, T, E>(&self, key: K, task: F) -> Result<ResultHandle<T, E>>
    where
        F: FnOnce() -> core::result::Result<T, E> + Send + 'static,
        T: Send + 'static,
        E: Send + 'static,
    {
        self.inner.admit()?;

        let (handle, completer) = handle::pair();
        let link = Arc::new(Link::new());
        let step = Step {
            completer,
            task,
            guard: LinkGuard {
                inner: Arc::clone(&self.inner),
                key: Some(key.clone()),
                link: Arc::clone(&link),
            },
        };
        let job = Job::new(move || step.run());

        match self
            .inner
            .ledger
            .append(key, link, job, &*self.inner.workers)
        {
            Ok(()) => Ok(handle),
            Err(rejected) => {
                let (job, reason) = rejected.into_parts();
                #[cfg(feature = "tracing")]
                tracing::debug!("Submission rejected: {reason}");
                // Settles the unlinked link and frees the admission slot.
                job::release(job);
                Err(reason.into())
            }
        }
    }

    /// Submits a fire-and-forget action under `key`.
    ///
    /// # Errors
    ///
    /// Same as [`submit`](Self::submit).
    pub fn execute<F>(&self, key: K, action: F) -> Result<ResultHandle<(), Infallible>>
    where
        F: FnOnce() + Send + 'static,
    {
        self.submit(key, move || {
            action();
            Ok(())
        })
    }

    /// Number of keys whose chain may still be extended.
    ///
    /// Drops back to zero once every submitted task has settled and the admin
    /// pool has reclaimed the entries.
    pub fn active_keys(&self) -> usize {
        self.inner.ledger.len()
    }

    /// Returns `true` if `key` currently has a chain.
    pub fn is_active(&self, key: &K) -> bool {
        self.inner.ledger.contains_key(key)
    }

    /// Current lifecycle state.
    pub fn state(&self) -> LifecycleState {
        if self.is_terminated() {
            LifecycleState::Terminated
        } else {
            LifecycleState::from_u8(self.inner.state.load(Ordering::SeqCst))
        }
    }

    /// Shuts down and blocks until every admitted task has settled.
    pub fn close(self) {
        self.shutdown();
        while !self.await_termination(Duration::from_secs(1)) {
            #[cfg(feature = "tracing")]
            tracing::debug!(
                "Waiting for {} in-flight tasks to settle",
                self.inner.in_flight.load(Ordering::SeqCst)
            );
        }
    }
}

impl<K> Terminable for SequentialExecutor<K>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
{
    fn shutdown(&self) {
        if self.inner.begin_shutdown() {
            #[cfg(feature = "tracing")]
            tracing::debug!("Executor shutting down");
        }
        if self.inner.in_flight.load(Ordering::SeqCst) == 0 {
            self.inner.close_pools();
        }
    }

    fn terminate_now(&self) -> Vec<Job> {
        self.inner.begin_shutdown();
        self.inner.pools_closed.store(true, Ordering::SeqCst);

        let unstarted = self.inner.workers.shutdown_now();
        for reclaim in self.inner.admin.shutdown_now() {
            job::release(reclaim);
        }
        self.inner.ledger.clear();

        #[cfg(feature = "tracing")]
        tracing::debug!("Executor terminated with {} unstarted jobs", unstarted.len());

        unstarted
    }

    fn is_terminated(&self) -> bool {
        self.inner.workers.is_terminated() && self.inner.admin.is_terminated()
    }

    fn is_idle(&self) -> bool {
        self.inner.in_flight.load(Ordering::SeqCst) == 0
    }
}

impl<K> Drop for SequentialExecutor<K>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
{
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl<K> fmt::Debug for SequentialExecutor<K>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SequentialExecutor")
            .field("state", &self.state())
            .field("active_keys", &self.active_keys())
            .field(
                "in_flight",
                &self.inner.in_flight.load(Ordering::SeqCst),
            )
            .finish_non_exhaustive()
    }
}

impl<K> Inner<K>
where
    K: Eq + Hash + Send + Sync + 'static,
{
    /// Takes an admission slot. The slot is counted before the state is
    /// checked, pairing with [`shutdown`](Terminable::shutdown) which sets
    /// the state before reading the count.
    fn admit(&self) -> Result<()> {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        if self.state.load(Ordering::SeqCst) != LifecycleState::Running.as_u8() {
            self.release_slot();
            return Err(Error::Shutdown);
        }
        Ok(())
    }

    fn release_slot(&self) {
        let previous = self.in_flight.fetch_sub(1, Ordering::SeqCst);
        if previous == 1 && self.state.load(Ordering::SeqCst) != LifecycleState::Running.as_u8()
        {
            self.close_pools();
        }
    }

    fn begin_shutdown(&self) -> bool {
        self.state
            .compare_exchange(
                LifecycleState::Running.as_u8(),
                LifecycleState::ShuttingDown.as_u8(),
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_ok()
    }

    /// Closes both pools once no admitted link is left to dispatch.
    fn close_pools(&self) {
        if !self.pools_closed.swap(true, Ordering::SeqCst) {
            #[cfg(feature = "tracing")]
            tracing::debug!("All admitted tasks settled; closing pools");
            self.workers.shutdown();
            self.admin.shutdown();
        }
    }

    /// Runs when a link settles: releases its successor, schedules the
    /// ledger entry for reclaim, then frees the link's admission slot.
    fn settle(&self, key: K, link: Arc<Link>) {
        if let Some(next) = link.settle() {
            self.dispatch(next);
        }

        let reclaim = {
            let ledger = Arc::clone(&self.ledger);
            Job::new(move || {
                if ledger.reclaim(&key, &link) {
                    #[cfg(feature = "tracing")]
                    tracing::trace!("Reclaimed idle chain");
                }
            })
        };
        // Refused only after terminate_now, which clears the ledger itself.
        // The refused job is dropped, not run: this may be called under a
        // ledger shard lock when a pool drops a job it was just handed.
        let _ = self.admin.execute(reclaim);

        self.release_slot();
    }

    /// Hands a chained successor to the pool. The successor was admitted
    /// long ago, so a full or unavailable pool must not lose it: it runs on
    /// the settling thread instead. Only a closed pool abandons it.
    fn dispatch(&self, next: Job) {
        let Err(rejected) = self.workers.execute(next) else {
            return;
        };
        match rejected.into_parts() {
            (job, RejectReason::Closed) => {
                #[cfg(feature = "tracing")]
                tracing::warn!("Worker pool closed; chained task abandoned");
                job::release(job);
            }
            (job, _reason) => {
                #[cfg(feature = "tracing")]
                tracing::debug!("Running chained task on settling thread: {_reason}");
                job::run_inline(job);
            }
        }
    }
}

/// Settles its link when dropped, whether or not the task ran.
struct LinkGuard<K>
where
    K: Eq + Hash + Send + Sync + 'static,
{
    inner: Arc<Inner<K>>,
    key: Option<K>,
    link: Arc<Link>,
}

impl<K> Drop for LinkGuard<K>
where
    K: Eq + Hash + Send + Sync + 'static,
{
    fn drop(&mut self) {
        if let Some(key) = self.key.take() {
            self.inner.settle(key, Arc::clone(&self.link));
        }
    }
}

/// Everything one submission needs to run. Fields drop in order, so an
/// abandoned step completes its handle before its link settles.
struct Step<K, F, T, E>
where
    K: Eq + Hash + Send + Sync + 'static,
{
    completer: Completer<T, E>,
    task: F,
    guard: LinkGuard<K>,
}

impl<K, F, T, E> Step<K, F, T, E>
where
    K: Eq + Hash + Send + Sync + 'static,
    F: FnOnce() -> core::result::Result<T, E>,
{
    fn run(self) {
        let Self {
            completer,
            task,
            guard,
        } = self;
        completer.run(task);
        drop(guard);
    }
}
