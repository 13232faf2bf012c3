use locklite::{DictionaryId, KeyComparator, LockTree, LockTreeHandler, LockTreeManager};
use rand::Rng;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::thread;

struct CountingHandler {
    creates: AtomicU32,
    destroys: AtomicU32,
}

impl CountingHandler {
    fn new() -> CountingHandler {
        CountingHandler {
            creates: AtomicU32::new(0),
            destroys: AtomicU32::new(0),
        }
    }
}

impl LockTreeHandler for CountingHandler {
    type Data = ();

    fn create(&self, _dict_id: DictionaryId, _comparator: &KeyComparator) {
        self.creates.fetch_add(1, Ordering::SeqCst);
    }

    fn destroy(&self, _lt: &LockTree<()>) {
        self.destroys.fetch_add(1, Ordering::SeqCst);
    }

    fn escalate(&self, _lt: &LockTree<()>) -> locklite::Result<u64> {
        Ok(0)
    }
}

fn byte_comparator() -> KeyComparator {
    Arc::new(|a: &Vec<u8>, b: &Vec<u8>| a.cmp(b))
}

#[test]
fn test_parallel_locktree_get_release() {
    let _ = env_logger::try_init();

    const NUM_THREADS: usize = 2;
    const NUM_ROUNDS: usize = 100_000;
    const DICT_ID: DictionaryId = 42;

    let manager = LockTreeManager::new(CountingHandler::new()).unwrap();

    let mut handles = Vec::new();
    for _ in 0..NUM_THREADS {
        let manager = manager.clone();
        handles.push(thread::spawn(move || {
            for _ in 0..NUM_ROUNDS {
                let lt = manager.get_lt(DICT_ID, byte_comparator());
                assert_eq!(lt.dict_id(), DICT_ID);
                manager.release_lt(&lt);
            }
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }

    // every release was paired, so id 42 is gone from the map
    assert_eq!(manager.locktree_count(), 0);
    let creates = manager.handler().creates.load(Ordering::SeqCst);
    let destroys = manager.handler().destroys.load(Ordering::SeqCst);
    assert_eq!(creates, destroys);
    assert!(creates >= 1);

    // and a fresh get builds a fresh locktree
    let lt = manager.get_lt(DICT_ID, byte_comparator());
    assert_eq!(
        manager.handler().creates.load(Ordering::SeqCst),
        creates + 1
    );
    manager.release_lt(&lt);

    manager.close();
}

#[test]
fn test_random_multi_dictionary_stress() {
    const NUM_THREADS: usize = 4;
    const NUM_ROUNDS: usize = 10_000;
    const NUM_DICTS: DictionaryId = 8;
    const LOCK_RECORD_SIZE: u64 = 16;

    let manager = LockTreeManager::new(CountingHandler::new()).unwrap();

    let mut handles = Vec::new();
    for _ in 0..NUM_THREADS {
        let manager = manager.clone();
        handles.push(thread::spawn(move || {
            let mut rng = rand::thread_rng();
            for _ in 0..NUM_ROUNDS {
                let dict_id = rng.gen_range(0..NUM_DICTS);
                let lt = manager.get_lt(dict_id, byte_comparator());
                manager.note_mem_used(LOCK_RECORD_SIZE);
                manager.note_mem_released(LOCK_RECORD_SIZE);
                manager.release_lt(&lt);
            }
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(manager.locktree_count(), 0);
    assert_eq!(manager.current_lock_memory(), 0);
    assert_eq!(
        manager.handler().creates.load(Ordering::SeqCst),
        manager.handler().destroys.load(Ordering::SeqCst)
    );
    manager.close();
}
