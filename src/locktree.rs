use crate::Result;
use std::cmp::Ordering;
use std::sync::atomic::{self, AtomicU32};
use std::sync::Arc;

/// Identifier of one table/index's row-lock domain.
pub type DictionaryId = u64;

/// Raw user key
pub type RawUserKey = Vec<u8>;

/// Orders raw user keys within one locktree.
pub type KeyComparator = Arc<dyn Fn(&RawUserKey, &RawUserKey) -> Ordering + Send + Sync>;

/// Hooks the storage engine installs on the locktree manager.
///
/// Captured state on the implementor replaces the raw callback `extra`
/// pointers of older lock manager designs.
pub trait LockTreeHandler: Send + Sync {
    /// Per-locktree payload owned by the engine, e.g. the range-lock
    /// structure itself. Stored in the [`LockTree`] and handed back through
    /// `destroy` and `escalate`.
    type Data: Send + Sync;

    /// Build the payload for a locktree that is about to go live.
    /// Invoked without the manager mutex held.
    fn create(&self, dict_id: DictionaryId, comparator: &KeyComparator) -> Self::Data;

    /// Tear down a locktree whose last reference was just released.
    /// Invoked exactly once per created locktree, after the locktree has
    /// been removed from the manager's map and the mutex released.
    fn destroy(&self, lt: &LockTree<Self::Data>);

    /// Shrink the locktree's lock footprint, e.g. by coarsening point locks
    /// into range locks. Returns the number of bytes freed; the manager
    /// subtracts them from its memory counter. An error is absorbed by the
    /// escalation pass, not propagated.
    fn escalate(&self, lt: &LockTree<Self::Data>) -> Result<u64>;
}

/// The set of row locks for one dictionary id, managed by reference count.
///
/// The lock records themselves live in the engine payload `D`; this handle
/// only carries the identity, the key ordering and the manager's bookkeeping.
pub struct LockTree<D> {
    dict_id: DictionaryId,
    comparator: KeyComparator,
    // transitions happen under the manager mutex
    refs: AtomicU32,
    data: D,
}

impl<D> LockTree<D> {
    pub(crate) fn new(dict_id: DictionaryId, comparator: KeyComparator, data: D) -> LockTree<D> {
        LockTree {
            dict_id,
            comparator,
            refs: AtomicU32::new(1),
            data,
        }
    }

    #[inline]
    pub fn dict_id(&self) -> DictionaryId {
        self.dict_id
    }

    /// The comparator installed by whichever caller created this locktree.
    #[inline]
    pub fn comparator(&self) -> &KeyComparator {
        &self.comparator
    }

    #[inline]
    pub fn compare_keys(&self, a: &RawUserKey, b: &RawUserKey) -> Ordering {
        (self.comparator)(a, b)
    }

    #[inline]
    pub fn data(&self) -> &D {
        &self.data
    }

    pub fn reference_count(&self) -> u32 {
        self.refs.load(atomic::Ordering::Acquire)
    }

    pub(crate) fn retain(&self) {
        self.refs.fetch_add(1, atomic::Ordering::AcqRel);
    }

    /// Returns the reference count after the decrement.
    pub(crate) fn release(&self) -> u32 {
        let prev = self.refs.fetch_sub(1, atomic::Ordering::AcqRel);
        debug_assert!(prev > 0, "locktree released more times than acquired");
        prev - 1
    }
}
