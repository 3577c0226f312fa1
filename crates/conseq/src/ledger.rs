//! The admission ledger: one chain tail per active sequence key.
//!
//! A key is present in the ledger exactly while it has a chain that may
//! still be extended. Appending to a key and reclaiming its entry are both
//! single atomic operations on the key's shard, which is what keeps a key
//! from ever owning two independent chains.

use crate::{Job, Rejected, WorkerPool};
use core::{fmt, hash::Hash};
use dashmap::{DashMap, mapref::entry::Entry};
use parking_lot::Mutex;
use std::sync::Arc;

/// One position in a key's chain.
///
/// A link starts pending and settles exactly once, when the job it
/// represents has finished or has been dropped without running. While
/// pending it can hold the job of its immediate successor, which is handed
/// back on settle so it can be dispatched.
pub(crate) struct Link {
    state: Mutex<LinkState>,
}

enum LinkState {
    Pending { successor: Option<Job> },
    Settled,
}

impl Link {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(LinkState::Pending { successor: None }),
        }
    }

    /// Parks `job` behind this link.
    ///
    /// Returns the job back when the link has already settled, in which case
    /// the caller must dispatch it itself.
    ///
    /// # Panics
    ///
    /// Panics if a successor is already parked. Only the ledger appends, and
    /// it replaces the tail in the same atomic step, so a link is extended at
    /// most once.
    pub(crate) fn then(&self, job: Job) -> Option<Job> {
        let mut state = self.state.lock();
        match &mut *state {
            LinkState::Settled => Some(job),
            LinkState::Pending { successor } => {
                assert!(successor.is_none(), "chain link extended twice");
                *successor = Some(job);
                None
            }
        }
    }

    /// Marks the link settled and takes its successor, if any.
    pub(crate) fn settle(&self) -> Option<Job> {
        let mut state = self.state.lock();
        match core::mem::replace(&mut *state, LinkState::Settled) {
            LinkState::Pending { successor } => successor,
            LinkState::Settled => None,
        }
    }

    pub(crate) fn is_settled(&self) -> bool {
        matches!(*self.state.lock(), LinkState::Settled)
    }
}

impl fmt::Debug for Link {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Link")
            .field("settled", &self.is_settled())
            .finish()
    }
}

/// Concurrent map from sequence key to the tail of that key's chain.
pub(crate) struct Ledger<K> {
    tails: DashMap<K, Arc<Link>>,
}

impl<K> Ledger<K>
where
    K: Eq + Hash,
{
    pub(crate) fn new() -> Self {
        Self {
            tails: DashMap::new(),
        }
    }

    /// Makes `link` the new tail for `key`, with `job` as the work it stands
    /// for.
    ///
    /// Under the key's shard lock:
    /// - no tail: `job` is dispatched now
    /// - pending tail: `job` is parked behind it
    /// - settled tail (not reclaimed yet): `job` is dispatched now
    ///
    /// # Errors
    ///
    /// If the pool refuses the job, the ledger is left untouched and the
    /// refused job is handed back. The caller must drop it only after this
    /// call returns, since dropping an executor job settles its link.
    pub(crate) fn append<P>(
        &self,
        key: K,
        link: Arc<Link>,
        job: Job,
        pool: &P,
    ) -> Result<(), Rejected>
    where
        P: WorkerPool + ?Sized,
    {
        let refused = match self.tails.entry(key) {
            Entry::Vacant(vacant) => match pool.execute(job) {
                Ok(()) => {
                    vacant.insert(link);
                    None
                }
                Err(rejected) => Some(rejected),
            },
            Entry::Occupied(mut occupied) => {
                let refused = match occupied.get().then(job) {
                    None => None,
                    Some(job) => pool.execute(job).err(),
                };
                if refused.is_none() {
                    let _previous = occupied.insert(link);
                }
                refused
            }
        };
        refused.map_or(Ok(()), Err)
    }

    /// Removes `key` only if its tail is still `settled`.
    ///
    /// A newer tail means a later submission extended the chain in the
    /// meantime, and the entry must stay.
    pub(crate) fn reclaim(&self, key: &K, settled: &Arc<Link>) -> bool {
        self.tails
            .remove_if(key, |_, tail| Arc::ptr_eq(tail, settled))
            .is_some()
    }

    pub(crate) fn len(&self) -> usize {
        self.tails.len()
    }

    pub(crate) fn contains_key(&self, key: &K) -> bool {
        self.tails.contains_key(key)
    }

    pub(crate) fn clear(&self) {
        self.tails.clear();
    }
}
