use crate::locktree::{DictionaryId, LockTree};
use std::collections::HashMap;
use std::sync::Arc;

/// Dictionary id -> locktree map. All access goes through the manager's
/// mutex; this type only implements the lookup primitives.
pub(crate) struct LockTreeMap<D> {
    trees: HashMap<DictionaryId, Arc<LockTree<D>>>,
}

impl<D> LockTreeMap<D> {
    pub(crate) fn new() -> LockTreeMap<D> {
        LockTreeMap {
            trees: HashMap::new(),
        }
    }

    pub(crate) fn put(&mut self, lt: Arc<LockTree<D>>) {
        let old = self.trees.insert(lt.dict_id(), lt);
        debug_assert!(old.is_none(), "locktree map already had this dictionary");
    }

    pub(crate) fn find(&self, dict_id: DictionaryId) -> Option<Arc<LockTree<D>>> {
        self.trees.get(&dict_id).cloned()
    }

    pub(crate) fn remove(&mut self, lt: &Arc<LockTree<D>>) {
        let removed = self.trees.remove(&lt.dict_id());
        debug_assert!(
            removed.map_or(false, |e| Arc::ptr_eq(&e, lt)),
            "locktree not present in the map"
        );
    }

    pub(crate) fn snapshot(&self) -> Vec<Arc<LockTree<D>>> {
        self.trees.values().cloned().collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.trees.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.trees.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use crate::locktree::{KeyComparator, LockTree};
    use crate::manager::map::LockTreeMap;
    use std::sync::Arc;

    fn new_tree(dict_id: u64) -> Arc<LockTree<()>> {
        let comparator: KeyComparator = Arc::new(|a, b| a.cmp(b));
        Arc::new(LockTree::new(dict_id, comparator, ()))
    }

    #[test]
    fn test_put_find_remove() {
        let mut map = LockTreeMap::new();
        let a = new_tree(1);
        let b = new_tree(2);
        let c = new_tree(3);
        map.put(a.clone());
        map.put(b.clone());
        map.put(c.clone());
        assert_eq!(map.len(), 3);

        assert!(Arc::ptr_eq(&map.find(1).unwrap(), &a));
        assert!(Arc::ptr_eq(&map.find(2).unwrap(), &b));
        assert!(Arc::ptr_eq(&map.find(3).unwrap(), &c));
        assert!(map.find(4).is_none());

        map.remove(&a);
        assert!(map.find(1).is_none());
        assert!(Arc::ptr_eq(&map.find(2).unwrap(), &b));
        assert!(Arc::ptr_eq(&map.find(3).unwrap(), &c));

        map.remove(&b);
        map.remove(&c);
        assert!(map.is_empty());
    }

    #[test]
    fn test_snapshot_clones_entries() {
        let mut map = LockTreeMap::new();
        for id in 0..5 {
            map.put(new_tree(id));
        }
        let mut snapshot = map.snapshot();
        snapshot.sort_by_key(|lt| lt.dict_id());
        let ids: Vec<u64> = snapshot.iter().map(|lt| lt.dict_id()).collect();
        assert_eq!(ids, vec![0, 1, 2, 3, 4]);
        // snapshot does not drain the map
        assert_eq!(map.len(), 5);
    }
}
