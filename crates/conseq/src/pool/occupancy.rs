use crossbeam_utils::CachePadded;
use portable_atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

/// Open/closed flag plus live-job counter shared by the pools that hand each
/// job to an external execution context.
#[derive(Default)]
pub(crate) struct Occupancy {
    closed: AtomicBool,
    live: CachePadded<AtomicUsize>,
}

impl Occupancy {
    /// Reserves a slot for one job, or returns `None` once closed.
    ///
    /// The slot is counted before the closed flag is checked so that
    /// [`is_drained`](Self::is_drained) can never observe a job that slipped
    /// in after close as "no live jobs".
    pub(crate) fn enter(self: &Arc<Self>) -> Option<LiveGuard> {
        self.live.fetch_add(1, Ordering::SeqCst);
        let guard = LiveGuard {
            occupancy: Arc::clone(self),
        };
        if self.closed.load(Ordering::SeqCst) {
            return None;
        }
        Some(guard)
    }

    pub(crate) fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub(crate) fn live(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    pub(crate) fn is_drained(&self) -> bool {
        self.is_closed() && self.live() == 0
    }
}

/// Keeps one job counted as live until dropped, whether the job ran or was
/// discarded by its execution context.
pub(crate) struct LiveGuard {
    occupancy: Arc<Occupancy>,
}

impl Drop for LiveGuard {
    fn drop(&mut self) {
        self.occupancy.live.fetch_sub(1, Ordering::SeqCst);
    }
}
