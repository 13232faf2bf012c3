mod map;

use crate::error::LockLiteError;
use crate::locktree::{DictionaryId, KeyComparator, LockTree, LockTreeHandler};
use crate::manager::map::LockTreeMap;
use crate::workset::Workset;
use crate::Result;
use crossbeam_channel::Receiver;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// Default ceiling on aggregate lock memory.
pub const DEFAULT_MAX_LOCK_MEMORY: u64 = 64 * 1024 * 1024;

struct ManagerState<D> {
    map: LockTreeMap<D>,
    /// Dictionary ids whose locktree is being created outside the mutex.
    creating: HashSet<DictionaryId>,
}

/// Registry of every live locktree in the storage engine.
///
/// Maps dictionary ids to reference-counted locktrees, tracks aggregate lock
/// memory against a configurable budget and runs lock escalation over a
/// thread pool when the budget is exceeded. One instance per engine.
pub struct LockTreeManager<H: LockTreeHandler> {
    handler: H,

    state: Mutex<ManagerState<H::Data>>,
    /// Signalled when an in-flight creation lands in the map.
    created: Condvar,

    max_lock_memory: AtomicU64,
    current_lock_memory: AtomicU64,

    escalation_count: AtomicU64,
    escalation_time_us: AtomicU64,
    escalation_latest_result: AtomicU64,

    pool: rayon::ThreadPool,
    sender: crossbeam_channel::Sender<bool>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl<H> LockTreeManager<H>
where
    H: LockTreeHandler + 'static,
    H::Data: 'static,
{
    /// Create a manager with a zeroed memory counter, the default budget and
    /// a background escalation task listening for budget overruns.
    pub fn new(handler: H) -> Result<Arc<LockTreeManager<H>>> {
        let pool = rayon::ThreadPoolBuilder::new()
            .thread_name(|i| format!("lt escalation {}", i))
            .build()?;
        let (sender, receiver) = crossbeam_channel::unbounded();
        let manager = Arc::new(LockTreeManager {
            handler,
            state: Mutex::new(ManagerState {
                map: LockTreeMap::new(),
                creating: HashSet::new(),
            }),
            created: Condvar::new(),
            max_lock_memory: AtomicU64::new(DEFAULT_MAX_LOCK_MEMORY),
            current_lock_memory: AtomicU64::new(0),
            escalation_count: AtomicU64::new(0),
            escalation_time_us: AtomicU64::new(0),
            escalation_latest_result: AtomicU64::new(0),
            pool,
            sender,
            handle: Mutex::new(None),
        });
        let handle = Self::start_escalation_task(manager.clone(), receiver);
        {
            let mut guard = manager.handle.lock().unwrap();
            *guard = Some(handle);
        }
        Ok(manager)
    }

    fn start_escalation_task(
        manager: Arc<LockTreeManager<H>>,
        receiver: Receiver<bool>,
    ) -> JoinHandle<()> {
        std::thread::Builder::new()
            .name("lock escalation".to_owned())
            .spawn(move || {
                info!("escalation task start");
                while let Ok(true) = receiver.recv() {
                    if manager.over_budget() {
                        manager.escalate_all_locktrees();
                    }
                }
                info!("escalation task exit!");
            })
            .unwrap()
    }

    /// Get the locktree for `dict_id`, creating it on first use.
    ///
    /// If a locktree for this id is already live its reference count grows
    /// and `comparator` is ignored: the first creator's comparator stays in
    /// force for the locktree's whole lifetime. The handler's `create` runs
    /// without the manager mutex held; concurrent callers for the same id
    /// wait for the one in-flight creation instead of creating twice.
    pub fn get_lt(
        &self,
        dict_id: DictionaryId,
        comparator: KeyComparator,
    ) -> Arc<LockTree<H::Data>> {
        let mut state = self.state.lock().unwrap();
        loop {
            if let Some(lt) = state.map.find(dict_id) {
                lt.retain();
                return lt;
            }
            if !state.creating.contains(&dict_id) {
                break;
            }
            state = self.created.wait(state).unwrap();
        }
        state.creating.insert(dict_id);
        drop(state);

        // engine callbacks may take their own locks; never hold ours here
        let data = self.handler.create(dict_id, &comparator);
        let lt = Arc::new(LockTree::new(dict_id, comparator, data));

        let mut state = self.state.lock().unwrap();
        state.creating.remove(&dict_id);
        state.map.put(lt.clone());
        self.created.notify_all();
        lt
    }

    /// Drop one reference to `lt`. The last release removes the locktree
    /// from the map and invokes the handler's `destroy` exactly once; a
    /// racing `get_lt` for the same id afterwards creates a fresh locktree.
    pub fn release_lt(&self, lt: &Arc<LockTree<H::Data>>) {
        let destroyed = {
            let mut state = self.state.lock().unwrap();
            if lt.release() == 0 {
                state.map.remove(lt);
                true
            } else {
                false
            }
        };
        if destroyed {
            self.handler.destroy(lt);
        }
    }

    /// Record `bytes` of newly allocated lock memory. Crossing the budget
    /// boundary pokes the background escalation task.
    pub fn note_mem_used(&self, bytes: u64) {
        let prev = self.current_lock_memory.fetch_add(bytes, Ordering::AcqRel);
        let max = self.max_lock_memory.load(Ordering::Acquire);
        if prev <= max && prev + bytes > max {
            if let Err(e) = self.sender.send(true) {
                warn!("{:#?}", e);
            }
        }
    }

    /// Record `bytes` of freed lock memory. Releasing more than was noted
    /// used is a contract violation.
    pub fn note_mem_released(&self, bytes: u64) {
        let prev = self.current_lock_memory.fetch_sub(bytes, Ordering::AcqRel);
        debug_assert!(prev >= bytes, "lock memory counter underflow");
    }

    pub fn current_lock_memory(&self) -> u64 {
        self.current_lock_memory.load(Ordering::Acquire)
    }

    pub fn get_max_lock_memory(&self) -> u64 {
        self.max_lock_memory.load(Ordering::Acquire)
    }

    /// Set the lock memory budget. Fails without side effects when `bytes`
    /// is below what is currently in use; the budget cannot be shrunk under
    /// already committed memory.
    pub fn set_max_lock_memory(&self, bytes: u64) -> Result<()> {
        let _state = self.state.lock().unwrap();
        let in_use = self.current_lock_memory.load(Ordering::Acquire);
        if bytes < in_use {
            return Err(LockLiteError::MaxLockMemoryOutOfRange {
                requested: bytes,
                in_use,
            });
        }
        self.max_lock_memory.store(bytes, Ordering::Release);
        Ok(())
    }

    /// Advisory check, inherently racy: another thread may cross the budget
    /// right after this returns false.
    pub fn over_budget(&self) -> bool {
        self.current_lock_memory() > self.get_max_lock_memory()
    }

    /// Ask the background task to run an escalation pass.
    pub fn request_escalation(&self) -> Result<()> {
        self.sender.send(true)?;
        Ok(())
    }

    /// Run one escalation pass over every live locktree and return the total
    /// number of bytes freed.
    ///
    /// Takes a snapshot of the map, retaining every snapshotted locktree,
    /// then fans one work item per locktree out to the pool through a
    /// [`Workset`] and joins the pass; each worker releases its locktree
    /// through `release_lt` once it is done with it, so a locktree whose
    /// last outside reference goes away mid-pass is destroyed only after
    /// its escalation has finished. The manager mutex is not held while
    /// escalation callbacks run, so callbacks may call back into
    /// `get_lt`/`release_lt`. A callback error leaves that locktree's
    /// footprint unchanged and the pass completes.
    pub fn escalate_all_locktrees(&self) -> u64 {
        let start = Instant::now();
        let snapshot = {
            let state = self.state.lock().unwrap();
            let snapshot = state.map.snapshot();
            // keep every tree LIVE for the whole pass; a racing release_lt
            // must not run destroy under an active escalate
            for lt in &snapshot {
                lt.retain();
            }
            snapshot
        };
        let num_trees = snapshot.len() as u32;

        let workset = Workset::new();
        let freed_total = AtomicU64::new(0);
        {
            let mut guard = workset.lock();
            for lt in snapshot {
                guard.put(lt);
            }
            guard.add_refs(num_trees);
        }
        self.pool.scope(|s| {
            for _ in 0..num_trees {
                let workset = &workset;
                let freed_total = &freed_total;
                s.spawn(move |_| {
                    while let Some(lt) = workset.get() {
                        match self.handler.escalate(&lt) {
                            Ok(bytes) => {
                                if bytes > 0 {
                                    self.note_mem_released(bytes);
                                    freed_total.fetch_add(bytes, Ordering::AcqRel);
                                }
                            }
                            Err(e) => {
                                warn!("escalation failed for dictionary {}: {}", lt.dict_id(), e)
                            }
                        }
                        self.release_lt(&lt);
                    }
                    workset.release_ref();
                });
            }
        });
        workset.release_ref();
        workset.join();

        let freed = freed_total.load(Ordering::Acquire);
        self.escalation_count.fetch_add(1, Ordering::AcqRel);
        self.escalation_time_us
            .fetch_add(start.elapsed().as_micros() as u64, Ordering::AcqRel);
        self.escalation_latest_result.store(freed, Ordering::Release);
        debug!(
            "escalation pass freed {} bytes across {} locktrees",
            freed, num_trees
        );
        freed
    }

    pub fn escalation_count(&self) -> u64 {
        self.escalation_count.load(Ordering::Acquire)
    }

    /// Cumulative wall time spent in escalation passes.
    pub fn escalation_time(&self) -> Duration {
        Duration::from_micros(self.escalation_time_us.load(Ordering::Acquire))
    }

    /// Bytes freed by the most recent escalation pass.
    pub fn escalation_latest_result(&self) -> u64 {
        self.escalation_latest_result.load(Ordering::Acquire)
    }

    pub fn locktree_count(&self) -> usize {
        let state = self.state.lock().unwrap();
        state.map.len()
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    /// Shut the manager down. Every locktree must have been released.
    pub fn close(&self) {
        {
            let state = self.state.lock().unwrap();
            assert!(
                state.map.is_empty(),
                "locktree manager closed with live locktrees"
            );
        }
        self.sender.send(false).unwrap();
        let mut guard = self.handle.lock().unwrap();
        if let Some(handle) = guard.take() {
            handle.join().unwrap();
        }
    }
}
