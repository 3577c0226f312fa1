use crate::Job;
use core::time::Duration;
use std::{thread, time::Instant};

/// How often [`Terminable::await_termination`] re-checks for termination.
const TERMINATION_POLL: Duration = Duration::from_millis(2);

/// The admission state of an executor.
///
/// Transitions only move forward: `Running -> ShuttingDown -> Terminated`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LifecycleState {
    /// Accepting submissions.
    Running,
    /// Refusing submissions; already admitted work still runs.
    ShuttingDown,
    /// Nothing is running and nothing will run again.
    Terminated,
}

impl LifecycleState {
    pub(crate) const fn as_u8(self) -> u8 {
        match self {
            Self::Running => 0,
            Self::ShuttingDown => 1,
            Self::Terminated => 2,
        }
    }

    pub(crate) const fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::Running,
            1 => Self::ShuttingDown,
            _ => Self::Terminated,
        }
    }
}

/// Lifecycle control shared by the executors in this crate.
pub trait Terminable {
    /// Stops admitting new work. Work already admitted, including chained
    /// successors that have not started yet, still runs in order.
    /// Idempotent.
    fn shutdown(&self);

    /// Stops admitting new work and abandons everything that has not started.
    ///
    /// Returns the jobs that were queued in the worker pool but never ran.
    /// Dropping them completes their result handles with
    /// [`TaskError::Abandoned`](crate::TaskError::Abandoned). Running tasks
    /// are not interrupted.
    fn terminate_now(&self) -> Vec<Job>;

    /// Returns `true` once shut down and nothing is left running.
    fn is_terminated(&self) -> bool;

    /// Best-effort snapshot: `true` when no admitted task is pending or
    /// running at the instant of the call. It may be stale by the time the
    /// caller reads it.
    fn is_idle(&self) -> bool;

    /// Blocks until [`is_terminated`](Self::is_terminated) or until `timeout`
    /// elapses. Returns whether termination was observed.
    ///
    /// This does not initiate a shutdown by itself.
    fn await_termination(&self, timeout: Duration) -> bool {
        // `None` when the deadline does not fit in an `Instant`: wait forever.
        let deadline = Instant::now().checked_add(timeout);
        loop {
            if self.is_terminated() {
                return true;
            }
            let pause = match deadline {
                None => TERMINATION_POLL,
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return false;
                    }
                    TERMINATION_POLL.min(deadline - now)
                }
            };
            thread::sleep(pause);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_round_trips_through_u8() {
        for state in [
            LifecycleState::Running,
            LifecycleState::ShuttingDown,
            LifecycleState::Terminated,
        ] {
            assert_eq!(LifecycleState::from_u8(state.as_u8()), state);
        }
    }

    struct Never;

    impl Terminable for Never {
        fn shutdown(&self) {}
        fn terminate_now(&self) -> Vec<Job> {
            Vec::new()
        }
        fn is_terminated(&self) -> bool {
            false
        }
        fn is_idle(&self) -> bool {
            true
        }
    }

    struct TerminatesAt(Instant);

    impl Terminable for TerminatesAt {
        fn shutdown(&self) {}
        fn terminate_now(&self) -> Vec<Job> {
            Vec::new()
        }
        fn is_terminated(&self) -> bool {
            Instant::now() >= self.0
        }
        fn is_idle(&self) -> bool {
            self.is_terminated()
        }
    }

    #[test]
    fn await_termination_accepts_unbounded_timeout() {
        let done = TerminatesAt(Instant::now() + Duration::from_millis(10));
        assert!(done.await_termination(Duration::MAX));
        assert!(done.is_idle());
    }

    #[test]
    fn await_termination_times_out() {
        let started = Instant::now();
        assert!(!Never.await_termination(Duration::from_millis(20)));
        assert!(started.elapsed() >= Duration::from_millis(20));
    }
}
