//! Caller-facing completion handles.
//!
//! Every submission returns a [`ResultHandle`]. The worker side holds the
//! paired [`Completer`], which is the only party that can write the task's
//! outcome. Information flows strictly one way, from completer to handle: a
//! caller may cancel or stop waiting on its handle, but nothing it does can
//! reach back into the chain link that orders the task against its same-key
//! neighbours.

use core::{
    fmt,
    pin::Pin,
    task::{Context, Poll},
    time::Duration,
};
use futures::task::AtomicWaker;
use parking_lot::{Condvar, Mutex};
use std::{
    any::Any,
    panic::{self, AssertUnwindSafe},
    sync::Arc,
    time::Instant,
};

/// The settled outcome of a single task.
pub type Outcome<T, E> = core::result::Result<T, TaskError<E>>;

/// Why a task did not produce a value.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum TaskError<E> {
    /// The task ran and returned an error.
    #[error("task failed: {0}")]
    Failed(E),

    /// The task ran and panicked. Carries the panic message when it was a
    /// string.
    #[error("task panicked: {0}")]
    Panicked(String),

    /// The caller cancelled its handle before the outcome arrived. The task
    /// itself still ran (or will run) in order.
    #[error("result handle was cancelled")]
    Cancelled,

    /// The task was dropped before it ever ran, e.g. by a forced shutdown.
    #[error("task was abandoned before it ran")]
    Abandoned,
}

impl<E> TaskError<E> {
    /// Returns the task's own error, if that is why it has no value.
    pub const fn failure(&self) -> Option<&E> {
        match self {
            Self::Failed(e) => Some(e),
            _ => None,
        }
    }
}

enum State<T, E> {
    Pending,
    Ready(Outcome<T, E>),
    Cancelled,
    Taken,
}

impl<T, E> State<T, E> {
    const fn name(&self) -> &'static str {
        match self {
            Self::Pending => "Pending",
            Self::Ready(_) => "Ready",
            Self::Cancelled => "Cancelled",
            Self::Taken => "Taken",
        }
    }

    fn take(&mut self) -> Option<Outcome<T, E>> {
        match self {
            Self::Pending => None,
            Self::Cancelled => Some(Err(TaskError::Cancelled)),
            Self::Ready(_) => match core::mem::replace(self, Self::Taken) {
                Self::Ready(outcome) => Some(outcome),
                _ => unreachable!(),
            },
            Self::Taken => panic!("ResultHandle polled after its outcome was taken"),
        }
    }
}

struct Slot<T, E> {
    state: Mutex<State<T, E>>,
    settled: Condvar,
    waker: AtomicWaker,
}

impl<T, E> Slot<T, E> {
    fn fill(&self, outcome: Outcome<T, E>) {
        {
            let mut state = self.state.lock();
            if !matches!(*state, State::Pending) {
                // Cancelled by the caller; the outcome has nowhere to go.
                return;
            }
            *state = State::Ready(outcome);
        }
        self.settled.notify_all();
        self.waker.wake();
    }
}

/// Creates a connected handle/completer pair.
pub(crate) fn pair<T, E>() -> (ResultHandle<T, E>, Completer<T, E>) {
    let slot = Arc::new(Slot {
        state: Mutex::new(State::Pending),
        settled: Condvar::new(),
        waker: AtomicWaker::new(),
    });
    (
        ResultHandle {
            slot: Arc::clone(&slot),
        },
        Completer { slot: Some(slot) },
    )
}

/// The caller's view of one submitted task.
///
/// The handle completes exactly once with the task's [`Outcome`]. It can be
/// consumed by blocking ([`wait`](Self::wait)), by blocking with a deadline
/// ([`wait_timeout`](Self::wait_timeout)), or by `.await`ing it.
///
/// Cancelling a handle only affects what this handle reports. The task keeps
/// its place in its key's chain and the next task for the same key still
/// waits for it to really finish.
#[must_use = "dropping a ResultHandle discards the task's outcome"]
pub struct ResultHandle<T, E> {
    slot: Arc<Slot<T, E>>,
}

impl<T, E> ResultHandle<T, E> {
    /// Returns `true` once an outcome is available or the handle was
    /// cancelled.
    pub fn is_done(&self) -> bool {
        !matches!(*self.slot.state.lock(), State::Pending)
    }

    /// Returns `true` if [`cancel`](Self::cancel) won the race against the
    /// task's completion.
    pub fn is_cancelled(&self) -> bool {
        matches!(*self.slot.state.lock(), State::Cancelled)
    }

    /// Marks this handle cancelled if no outcome has arrived yet.
    ///
    /// Returns `true` if the handle transitioned to cancelled. Waiters are
    /// woken and observe [`TaskError::Cancelled`]. The underlying task is
    /// neither interrupted nor skipped.
    pub fn cancel(&self) -> bool {
        {
            let mut state = self.slot.state.lock();
            if !matches!(*state, State::Pending) {
                return false;
            }
            *state = State::Cancelled;
        }
        self.slot.settled.notify_all();
        self.slot.waker.wake();
        true
    }

    /// Blocks the current thread until the outcome is available.
    pub fn wait(self) -> Outcome<T, E> {
        let mut state = self.slot.state.lock();
        loop {
            if let Some(outcome) = state.take() {
                return outcome;
            }
            self.slot.settled.wait(&mut state);
        }
    }

    /// Blocks for at most `timeout` waiting for the outcome.
    ///
    /// On timeout the handle is given back so the caller may keep waiting
    /// later. Timing out has no effect on the task or its chain.
    ///
    /// # Errors
    ///
    /// Returns `Err(self)` if no outcome arrived before the deadline.
    pub fn wait_timeout(self, timeout: Duration) -> Result<Outcome<T, E>, Self> {
        // A deadline past the end of `Instant` means no deadline at all.
        let Some(deadline) = Instant::now().checked_add(timeout) else {
            return Ok(self.wait());
        };
        let outcome = {
            let mut state = self.slot.state.lock();
            loop {
                if let Some(outcome) = state.take() {
                    break Some(outcome);
                }
                if self
                    .slot
                    .settled
                    .wait_until(&mut state, deadline)
                    .timed_out()
                {
                    break state.take();
                }
            }
        };
        outcome.ok_or(self)
    }
}

impl<T, E> Future for ResultHandle<T, E> {
    type Output = Outcome<T, E>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        if let Some(outcome) = self.slot.state.lock().take() {
            return Poll::Ready(outcome);
        }
        self.slot.waker.register(cx.waker());
        // Re-check: the completer may have filled the slot before the waker
        // was registered.
        match self.slot.state.lock().take() {
            Some(outcome) => Poll::Ready(outcome),
            None => Poll::Pending,
        }
    }
}

impl<T, E> fmt::Debug for ResultHandle<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResultHandle")
            .field("state", &self.slot.state.lock().name())
            .finish()
    }
}

/// The write side of a [`ResultHandle`], owned by the job running the task.
///
/// Dropping a completer that never delivered an outcome completes the handle
/// with [`TaskError::Abandoned`].
pub(crate) struct Completer<T, E> {
    slot: Option<Arc<Slot<T, E>>>,
}

impl<T, E> Completer<T, E> {
    /// Runs `task`, capturing its value, error, or panic, and delivers the
    /// outcome to the handle.
    pub(crate) fn run<F>(self, task: F)
    where
        F: FnOnce() -> core::result::Result<T, E>,
    {
        let outcome = match panic::catch_unwind(AssertUnwindSafe(task)) {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(TaskError::Failed(e)),
            Err(payload) => Err(TaskError::Panicked(panic_message(payload.as_ref()))),
        };
        self.complete(outcome);
    }

    pub(crate) fn complete(mut self, outcome: Outcome<T, E>) {
        if let Some(slot) = self.slot.take() {
            slot.fill(outcome);
        }
    }
}

impl<T, E> Drop for Completer<T, E> {
    fn drop(&mut self) {
        if let Some(slot) = self.slot.take() {
            slot.fill(Err(TaskError::Abandoned));
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        String::from("non-string panic payload")
    }
}
