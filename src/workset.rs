use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard};

/// Thread-safe FIFO of work items with barrier semantics.
///
/// Producers `put` items and consumers `get` them; `get` never blocks.
/// The reference count tracks threads that still have work to do for this
/// set: it starts at 1 for the creating thread, a coordinator declares N
/// workers with `add_refs(N)`, each worker calls `release_ref` when done
/// and `join` blocks until the count hits zero.
pub struct Workset<T> {
    inner: Mutex<WorksetInner<T>>,
    refs_zero: Condvar,
}

struct WorksetInner<T> {
    worklist: VecDeque<T>,
    refs: u32,
}

impl<T> Workset<T> {
    pub fn new() -> Workset<T> {
        Workset {
            inner: Mutex::new(WorksetInner {
                worklist: VecDeque::new(),
                refs: 1,
            }),
            refs_zero: Condvar::new(),
        }
    }

    /// Append one item to the tail of the worklist.
    pub fn put(&self, item: T) {
        let mut guard = self.inner.lock().unwrap();
        guard.worklist.push_back(item);
    }

    /// Pop the head of the worklist, `None` if the worklist is empty.
    pub fn get(&self) -> Option<T> {
        let mut guard = self.inner.lock().unwrap();
        guard.worklist.pop_front()
    }

    /// Declare `n` more workers that will each call `release_ref`.
    pub fn add_refs(&self, n: u32) {
        let mut guard = self.inner.lock().unwrap();
        guard.refs += n;
    }

    /// Drop one reference, waking all joiners when the count reaches zero.
    pub fn release_ref(&self) {
        let mut guard = self.inner.lock().unwrap();
        debug_assert!(guard.refs > 0);
        guard.refs -= 1;
        if guard.refs == 0 {
            self.refs_zero.notify_all();
        }
    }

    /// Block until every reference has been released.
    ///
    /// The creating thread owns one implicit reference; it must call
    /// `release_ref` itself before `join` can return.
    pub fn join(&self) {
        let mut guard = self.inner.lock().unwrap();
        while guard.refs != 0 {
            guard = self.refs_zero.wait(guard).unwrap();
        }
    }

    /// Hold the workset lock across several operations, e.g. to enqueue a
    /// batch of items and declare their workers as one atomic step.
    pub fn lock(&self) -> WorksetGuard<T> {
        WorksetGuard {
            guard: self.inner.lock().unwrap(),
        }
    }

    pub fn is_empty(&self) -> bool {
        let guard = self.inner.lock().unwrap();
        guard.worklist.is_empty()
    }
}

impl<T> Default for Workset<T> {
    fn default() -> Workset<T> {
        Workset::new()
    }
}

impl<T> Drop for Workset<T> {
    fn drop(&mut self) {
        if let Ok(guard) = self.inner.lock() {
            debug_assert!(
                guard.worklist.is_empty(),
                "workset dropped with pending work"
            );
        }
    }
}

pub struct WorksetGuard<'a, T> {
    guard: MutexGuard<'a, WorksetInner<T>>,
}

impl<'a, T> WorksetGuard<'a, T> {
    pub fn put(&mut self, item: T) {
        self.guard.worklist.push_back(item);
    }

    pub fn add_refs(&mut self, n: u32) {
        self.guard.refs += n;
    }

    pub fn len(&self) -> usize {
        self.guard.worklist.len()
    }

    pub fn is_empty(&self) -> bool {
        self.guard.worklist.is_empty()
    }
}
