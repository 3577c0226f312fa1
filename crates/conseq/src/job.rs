use core::fmt;
use std::{cell::RefCell, thread::LocalKey};

/// A type-erased unit of work handed to a [`WorkerPool`].
///
/// Jobs are opaque: a pool only ever runs them or gives them back. A job that
/// is dropped without being run is *abandoned*. Jobs created by the executor
/// react to that by completing their result handle with
/// [`TaskError::Abandoned`] and releasing whatever was chained behind them,
/// so dropping the jobs returned from [`Terminable::terminate_now`] is always
/// safe.
///
/// [`WorkerPool`]: crate::WorkerPool
/// [`TaskError::Abandoned`]: crate::TaskError::Abandoned
/// [`Terminable::terminate_now`]: crate::Terminable::terminate_now
#[must_use = "a job does nothing unless it is run; dropping it abandons the task"]
pub struct Job {
    task: Box<dyn FnOnce() + Send + 'static>,
}

impl Job {
    /// Wraps a closure into a job.
    pub fn new<F>(f: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self { task: Box::new(f) }
    }

    /// Runs the job on the current thread.
    pub fn run(self) {
        (self.task)();
    }
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job").finish_non_exhaustive()
    }
}

type Backlog = RefCell<Option<Vec<Job>>>;

thread_local! {
    static RELEASING: Backlog = const { RefCell::new(None) };
    static RUNNING_INLINE: Backlog = const { RefCell::new(None) };
}

/// Drops a job that will never run.
///
/// Dropping an executor job may release the job chained behind it, which may
/// release the next one, and so on. Doing that through plain recursive drops
/// overflows the stack on long chains, so nested releases on the same thread
/// are queued and drained by the outermost call instead.
pub(crate) fn release(job: Job) {
    drain(&RELEASING, job, drop);
}

/// Runs a job on the current thread instead of a pool.
///
/// Nested calls made while the job runs are queued and run by the outermost
/// call once the current job returns, so a chain that keeps finding its pool
/// saturated does not grow the stack.
pub(crate) fn run_inline(job: Job) {
    drain(&RUNNING_INLINE, job, Job::run);
}

fn drain(backlog: &'static LocalKey<Backlog>, job: Job, mut consume: impl FnMut(Job)) {
    let claimed = backlog.with(|slot| {
        let mut slot = slot.borrow_mut();
        match slot.as_mut() {
            Some(queued) => {
                queued.push(job);
                None
            }
            None => {
                *slot = Some(Vec::new());
                Some(job)
            }
        }
    });

    let Some(job) = claimed else {
        return;
    };

    let _claim = Claim(backlog);
    let mut next = Some(job);
    while let Some(job) = next {
        consume(job);
        next = backlog.with(|slot| slot.borrow_mut().as_mut().and_then(Vec::pop));
    }
}

/// Hands the backlog back when the outermost drain ends, including by
/// unwinding. Jobs still queued at that point are dropped.
struct Claim(&'static LocalKey<Backlog>);

impl Drop for Claim {
    fn drop(&mut self) {
        let leftover = self.0.try_with(|slot| slot.borrow_mut().take());
        if let Ok(Some(leftover)) = leftover {
            drop(leftover);
        }
    }
}
