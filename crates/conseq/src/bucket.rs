//! Statically bucketed sequential executors.
//!
//! A simpler alternative to [`SequentialExecutor`](crate::SequentialExecutor):
//! every key hashes to one of a fixed number of buckets, and each bucket is a
//! single-thread FIFO queue. Keys in the same bucket are serialized even when
//! unrelated, and memory is bounded by the bucket count rather than by the
//! number of active keys.

use crate::{
    DEFAULT_THREAD_NAME, Error, FixedPool, Job, RejectReason, Result, ResultHandle, Terminable,
    WorkerPool, handle,
};
use core::{
    convert::Infallible,
    fmt,
    hash::{BuildHasher, Hash},
    num::NonZeroUsize,
};
use dashmap::DashMap;
use portable_atomic::{AtomicBool, Ordering};
use std::{hash::RandomState, sync::Arc};

/// Maps a key's hash to a bucket index.
pub trait BucketHasher: Send + Sync {
    /// Number of buckets. Must be at least one.
    fn total_buckets(&self) -> usize;

    /// Bucket for a key hash, in `0..total_buckets()`.
    fn bucket_for(&self, hash: u64) -> usize;
}

/// Default [`BucketHasher`]: hash modulo the bucket count.
#[derive(Clone, Copy, Debug)]
pub struct ModuloHasher {
    buckets: NonZeroUsize,
}

impl ModuloHasher {
    pub const fn new(buckets: NonZeroUsize) -> Self {
        Self { buckets }
    }
}

impl BucketHasher for ModuloHasher {
    fn total_buckets(&self) -> usize {
        self.buckets.get()
    }

    fn bucket_for(&self, hash: u64) -> usize {
        (hash % self.buckets.get() as u64) as usize
    }
}

/// Options for [`BucketedExecutors`].
#[derive(Clone, Default)]
pub struct BucketConfig {
    max_concurrent_executors: Option<usize>,
    single_executor_queue_capacity: Option<usize>,
    bucket_hasher: Option<Arc<dyn BucketHasher>>,
    thread_name: Option<String>,
}

impl BucketConfig {
    /// Number of buckets, and so of threads. Defaults to the number of CPUs.
    /// Conflicts with [`bucket_hasher`](Self::bucket_hasher).
    #[must_use]
    pub fn max_concurrent_executors(mut self, max: usize) -> Self {
        self.max_concurrent_executors = Some(max);
        self
    }

    /// Queue capacity of each bucket. `0` means unbounded.
    #[must_use]
    pub fn single_executor_queue_capacity(mut self, capacity: usize) -> Self {
        self.single_executor_queue_capacity = Some(capacity);
        self
    }

    /// Custom key-to-bucket mapping. Its
    /// [`total_buckets`](BucketHasher::total_buckets) sets the bucket count.
    #[must_use]
    pub fn bucket_hasher(mut self, hasher: Arc<dyn BucketHasher>) -> Self {
        self.bucket_hasher = Some(hasher);
        self
    }

    /// Bucket threads are named `{prefix}-bucket-{index}-0`.
    #[must_use]
    pub fn thread_name(mut self, prefix: impl Into<String>) -> Self {
        self.thread_name = Some(prefix.into());
        self
    }
}

impl fmt::Debug for BucketConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BucketConfig")
            .field("max_concurrent_executors", &self.max_concurrent_executors)
            .field(
                "single_executor_queue_capacity",
                &self.single_executor_queue_capacity,
            )
            .field("custom_hasher", &self.bucket_hasher.is_some())
            .field("thread_name", &self.thread_name)
            .finish()
    }
}

/// A fixed set of single-thread executors, one per bucket, created lazily on
/// first use.
///
/// ## Features
///
/// - ✅ Bounded thread count and memory regardless of key cardinality
/// - ✅ Per-key FIFO ordering (a key always lands in the same bucket)
/// - ❌ Unrelated keys sharing a bucket wait for each other
///
/// ## Recommended When
/// - Key cardinality is huge and a bounded footprint matters more than
///   cross-key parallelism
pub struct BucketedExecutors {
    hasher: Arc<dyn BucketHasher>,
    hash_state: RandomState,
    buckets: DashMap<usize, BucketExecutor>,
    capacity: Option<NonZeroUsize>,
    thread_name: String,
    closed: AtomicBool,
}

impl BucketedExecutors {
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] when both a hasher and a bucket count
    /// are set, or when the bucket count is zero.
    pub fn new(config: BucketConfig) -> Result<Self> {
        let BucketConfig {
            max_concurrent_executors,
            single_executor_queue_capacity,
            bucket_hasher,
            thread_name,
        } = config;

        let hasher: Arc<dyn BucketHasher> = match (bucket_hasher, max_concurrent_executors) {
            (Some(_), Some(_)) => {
                return Err(Error::invalid_config(
                    "bucket hasher and max concurrent executors are mutually exclusive; \
                     the hasher determines the bucket count",
                ));
            }
            (Some(hasher), None) => hasher,
            (None, max) => {
                let buckets = max.unwrap_or_else(num_cpus::get);
                let buckets = NonZeroUsize::new(buckets).ok_or_else(|| {
                    Error::invalid_config("max concurrent executors must be positive")
                })?;
                Arc::new(ModuloHasher::new(buckets))
            }
        };
        if hasher.total_buckets() == 0 {
            return Err(Error::invalid_config("bucket hasher reports zero buckets"));
        }

        let capacity = single_executor_queue_capacity.and_then(NonZeroUsize::new);
        if capacity.is_none() {
            #[cfg(feature = "tracing")]
            tracing::warn!(
                "Bucket queue capacity {single_executor_queue_capacity:?} defaults to unbounded"
            );
        }

        Ok(Self {
            hasher,
            hash_state: RandomState::new(),
            buckets: DashMap::new(),
            capacity,
            thread_name: thread_name.unwrap_or_else(|| String::from(DEFAULT_THREAD_NAME)),
            closed: AtomicBool::new(false),
        })
    }

    /// Number of buckets.
    pub fn max_concurrent_executors(&self) -> usize {
        self.hasher.total_buckets()
    }

    /// Queue capacity of each bucket, `None` when unbounded.
    pub fn single_executor_queue_capacity(&self) -> Option<usize> {
        self.capacity.map(NonZeroUsize::get)
    }

    /// Returns the executor of the bucket `key` hashes to, starting it if
    /// needed. The same key always yields the same bucket.
    ///
    /// # Errors
    ///
    /// - [`Error::Shutdown`] after [`shutdown`](Terminable::shutdown)
    /// - [`Error::Rejected`] if the bucket thread cannot be spawned
    pub fn executor_for<Q>(&self, key: &Q) -> Result<BucketExecutor>
    where
        Q: Hash + ?Sized,
    {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::Shutdown);
        }
        let index = self.bucket_of(key);
        let executor = self
            .buckets
            .entry(index)
            .or_try_insert_with(|| self.start_bucket(index))?
            .clone();

        // Pairs with `shutdown`, which sets the flag before visiting buckets.
        if self.closed.load(Ordering::SeqCst) {
            executor.pool.shutdown();
            return Err(Error::Shutdown);
        }
        Ok(executor)
    }

    /// Number of buckets started so far.
    pub fn started_buckets(&self) -> usize {
        self.buckets.len()
    }

    fn bucket_of<Q>(&self, key: &Q) -> usize
    where
        Q: Hash + ?Sized,
    {
        let bucket = self.hasher.bucket_for(self.hash_state.hash_one(key));
        bucket % self.hasher.total_buckets()
    }

    fn start_bucket(&self, index: usize) -> Result<BucketExecutor> {
        let name = format!("{}-bucket-{index}", self.thread_name);
        let pool = match self.capacity {
            Some(capacity) => FixedPool::bounded(NonZeroUsize::MIN, capacity, name)?,
            None => FixedPool::new(NonZeroUsize::MIN, name)?,
        };
        #[cfg(feature = "tracing")]
        tracing::debug!("Started bucket {index}");
        Ok(BucketExecutor {
            index,
            pool: Arc::new(pool),
        })
    }
}

impl Terminable for BucketedExecutors {
    fn shutdown(&self) {
        self.closed.store(true, Ordering::SeqCst);
        for bucket in &self.buckets {
            bucket.pool.shutdown();
        }
    }

    fn terminate_now(&self) -> Vec<Job> {
        self.closed.store(true, Ordering::SeqCst);
        self.buckets
            .iter()
            .flat_map(|bucket| bucket.pool.shutdown_now())
            .collect()
    }

    fn is_terminated(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
            && self.buckets.iter().all(|bucket| bucket.pool.is_terminated())
    }

    fn is_idle(&self) -> bool {
        self.buckets
            .iter()
            .all(|bucket| bucket.pool.active_count() == 0 && bucket.pool.queued() == 0)
    }
}

impl Drop for BucketedExecutors {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl fmt::Debug for BucketedExecutors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BucketedExecutors")
            .field("buckets", &self.max_concurrent_executors())
            .field("started", &self.started_buckets())
            .field("capacity", &self.capacity)
            .finish_non_exhaustive()
    }
}

/// A shared handle to one bucket's single-thread FIFO executor.
///
/// The bucket is owned by its [`BucketedExecutors`]; a handle cannot shut it
/// down.
#[derive(Clone)]
pub struct BucketExecutor {
    index: usize,
    pool: Arc<FixedPool>,
}

impl BucketExecutor {
    /// Index of this bucket.
    pub const fn bucket(&self) -> usize {
        self.index
    }

    /// Queues `task` behind everything already submitted to this bucket.
    ///
    /// # Errors
    ///
    /// - [`Error::Shutdown`] once the owning executors are shut down
    /// - [`Error::Rejected`] when the bucket queue is full
    pub fn submit<F, T, E>(&self, task: F) -> Result<ResultHandle<T, E>>
    where
        F: FnOnce() -> core::result::Result<T, E> + Send + 'static,
        T: Send + 'static,
        E: Send + 'static,
    {
        let (handle, completer) = handle::pair();
        match self.pool.execute(Job::new(move || completer.run(task))) {
            Ok(()) => Ok(handle),
            Err(rejected) => match rejected.reason() {
                RejectReason::Closed => Err(Error::Shutdown),
                reason => Err(reason.into()),
            },
        }
    }

    /// Queues a fire-and-forget action.
    ///
    /// # Errors
    ///
    /// Same as [`submit`](Self::submit).
    pub fn execute<F>(&self, action: F) -> Result<ResultHandle<(), Infallible>>
    where
        F: FnOnce() + Send + 'static,
    {
        self.submit(move || {
            action();
            Ok(())
        })
    }

    /// Number of tasks waiting in this bucket's queue.
    pub fn queue_len(&self) -> usize {
        self.pool.queued()
    }

    /// Always fails: the bucket is shared with other keys.
    ///
    /// # Errors
    ///
    /// Always returns [`Error::Unsupported`].
    pub fn shutdown(&self) -> Result<()> {
        Err(unsupported("shutdown"))
    }

    /// Always fails: the bucket is shared with other keys.
    ///
    /// # Errors
    ///
    /// Always returns [`Error::Unsupported`].
    pub fn shutdown_now(&self) -> Result<Vec<Job>> {
        Err(unsupported("shutdown_now"))
    }
}

impl fmt::Debug for BucketExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BucketExecutor")
            .field("bucket", &self.index)
            .field("queued", &self.queue_len())
            .finish()
    }
}

const fn unsupported(operation: &'static str) -> Error {
    Error::Unsupported {
        operation,
        reason: "bucket executors are shared; shut down the owning BucketedExecutors",
    }
}
