use crate::{Error, FixedPool, Result, SequentialExecutor, ThreadPerTaskPool, WorkerPool};
use core::{fmt, hash::Hash, marker::PhantomData, num::NonZeroUsize};
use std::sync::Arc;

/// Thread name prefix used when none is configured.
pub const DEFAULT_THREAD_NAME: &str = "conseq";

/// Configures and builds a [`SequentialExecutor`].
///
/// Exactly one worker pool mode is chosen:
///
/// | Options set                                     | Worker pool                 |
/// |-------------------------------------------------|-----------------------------|
/// | none                                            | [`ThreadPerTaskPool`]       |
/// | `worker_concurrency(n)`                         | [`FixedPool`], `n` threads  |
/// | `worker_concurrency(n)` + `queue_capacity(c)`   | bounded [`FixedPool`]       |
/// | `worker_pool(pool)`                             | the given pool              |
///
/// Setting both a concurrency and an external pool is a configuration error.
///
/// The key type `K` is usually inferred from the first `submit` call.
pub struct ExecutorBuilder<K> {
    concurrency: Option<usize>,
    queue_capacity: Option<usize>,
    pool: Option<Arc<dyn WorkerPool>>,
    thread_name: String,
    _key: PhantomData<fn() -> K>,
}

impl<K> ExecutorBuilder<K> {
    pub fn new() -> Self {
        Self {
            concurrency: None,
            queue_capacity: None,
            pool: None,
            thread_name: String::from(DEFAULT_THREAD_NAME),
            _key: PhantomData,
        }
    }

    /// Runs tasks on a [`FixedPool`] of `concurrency` threads. Must be at
    /// least one.
    #[must_use]
    pub fn worker_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = Some(concurrency);
        self
    }

    /// Caps the fixed pool's queue. Submissions that would start right away
    /// but find the queue full fail with
    /// [`RejectReason::Saturated`](crate::RejectReason::Saturated). Requires
    /// [`worker_concurrency`](Self::worker_concurrency).
    #[must_use]
    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = Some(capacity);
        self
    }

    /// Runs tasks on a caller-supplied pool. The executor closes the pool
    /// when it terminates.
    #[must_use]
    pub fn worker_pool(mut self, pool: Arc<dyn WorkerPool>) -> Self {
        self.pool = Some(pool);
        self
    }

    /// Prefix for the threads the executor spawns: workers are named
    /// `{prefix}-worker-{n}` and the admin thread `{prefix}-admin-0`.
    #[must_use]
    pub fn thread_name(mut self, prefix: impl Into<String>) -> Self {
        self.thread_name = prefix.into();
        self
    }

    /// Validates the options and starts the executor's threads.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidConfig`] for a zero concurrency or queue capacity,
    ///   an empty thread name, or conflicting pool options
    /// - [`Error::Rejected`] if a thread cannot be spawned
    pub fn build(self) -> Result<SequentialExecutor<K>>
    where
        K: Eq + Hash + Clone + Send + Sync + 'static,
    {
        self.validate()?;
        let Self {
            concurrency,
            queue_capacity,
            pool,
            thread_name,
            _key,
        } = self;

        let worker_name = format!("{thread_name}-worker");
        let workers: Arc<dyn WorkerPool> = match (pool, concurrency) {
            (Some(pool), _) => pool,
            (None, None) => Arc::new(ThreadPerTaskPool::new(worker_name)),
            (None, Some(n)) => {
                let threads = positive(n, "worker concurrency")?;
                match queue_capacity {
                    Some(c) => Arc::new(FixedPool::bounded(
                        threads,
                        positive(c, "queue capacity")?,
                        worker_name,
                    )?),
                    None => Arc::new(FixedPool::new(threads, worker_name)?),
                }
            }
        };
        let admin = FixedPool::new(NonZeroUsize::MIN, format!("{thread_name}-admin"))?;

        #[cfg(feature = "tracing")]
        tracing::debug!(
            "Built executor {thread_name} (concurrency {concurrency:?}, capacity {queue_capacity:?})"
        );

        Ok(SequentialExecutor::from_parts(workers, admin))
    }

    fn validate(&self) -> Result<()> {
        if self.thread_name.is_empty() {
            return Err(Error::invalid_config("thread name must not be empty"));
        }
        if self.pool.is_some() && self.concurrency.is_some() {
            return Err(Error::invalid_config(
                "worker concurrency and an external worker pool are mutually exclusive",
            ));
        }
        if self.queue_capacity.is_some() && self.concurrency.is_none() {
            return Err(Error::invalid_config(
                "queue capacity requires worker concurrency",
            ));
        }
        Ok(())
    }
}

impl<K> Default for ExecutorBuilder<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K> Clone for ExecutorBuilder<K> {
    fn clone(&self) -> Self {
        Self {
            concurrency: self.concurrency,
            queue_capacity: self.queue_capacity,
            pool: self.pool.clone(),
            thread_name: self.thread_name.clone(),
            _key: PhantomData,
        }
    }
}

impl<K> fmt::Debug for ExecutorBuilder<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutorBuilder")
            .field("concurrency", &self.concurrency)
            .field("queue_capacity", &self.queue_capacity)
            .field("external_pool", &self.pool.is_some())
            .field("thread_name", &self.thread_name)
            .finish()
    }
}

fn positive(n: usize, what: &str) -> Result<NonZeroUsize> {
    NonZeroUsize::new(n).ok_or_else(|| Error::invalid_config(format!("{what} must be positive")))
}
