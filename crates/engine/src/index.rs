use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

use memtx_arena::{Extent, ExtentPool, TupleHandle};
use memtx_core::constants::INDEX_ENTRIES_PER_EXTENT;
use memtx_core::error::{Error, Result};
use memtx_core::traits::SnapshotIterator;

fn extents_needed(entry_count: usize) -> usize {
    (entry_count + INDEX_ENTRIES_PER_EXTENT - 1) / INDEX_ENTRIES_PER_EXTENT
}

/// Abstract contract the engine needs from an index: maintain presence of
/// tuples under a key, report size, and produce a point-in-time read view
/// for snapshotting. Key extraction, ordering and the data structure
/// itself are all out of this kernel's scope except for this one
/// reference implementation.
pub trait Index: Send + Sync {
    /// Replaces `old` with `new` under their respective keys. Returns the
    /// tuple actually displaced by `new`'s key, if any. Passing `new` as
    /// `None` removes `old`; passing `old` as `None` is a pure insert.
    fn replace(
        &mut self,
        old: Option<&TupleHandle>,
        new: Option<&TupleHandle>,
    ) -> Result<Option<TupleHandle>>;

    fn size(&self) -> usize;

    fn is_unique(&self) -> bool;

    fn get(&self, key: &[u8]) -> Option<TupleHandle>;

    fn create_snapshot_iterator(&self) -> Box<dyn SnapshotIterator>;

    /// All tuple handles currently indexed. Used to bulk-build a
    /// secondary index from an already-populated primary during
    /// `end_recovery`.
    fn iter_handles(&self) -> Vec<TupleHandle>;
}

type KeyFn = Box<dyn Fn(&[u8]) -> Vec<u8> + Send + Sync>;

/// A `BTreeMap`-backed index, ordered by a caller-supplied key
/// extraction function over the tuple's raw bytes. Draws its node
/// storage from the engine's [`ExtentPool`] the same way a real B+tree
/// index's pages would: one extent held per
/// [`INDEX_ENTRIES_PER_EXTENT`] entries, grown and shrunk as entries
/// are inserted and removed.
pub struct BTreeIndex {
    map: BTreeMap<Vec<u8>, TupleHandle>,
    unique: bool,
    key_fn: KeyFn,
    extent_pool: Arc<ExtentPool>,
    extents: Vec<Extent>,
}

impl BTreeIndex {
    pub fn new(
        unique: bool,
        key_fn: impl Fn(&[u8]) -> Vec<u8> + Send + Sync + 'static,
        extent_pool: Arc<ExtentPool>,
    ) -> Self {
        Self {
            map: BTreeMap::new(),
            unique,
            key_fn: Box::new(key_fn),
            extent_pool,
            extents: Vec::new(),
        }
    }

    /// A primary index over the whole tuple payload: every distinct
    /// payload is its own key.
    pub fn identity_primary(extent_pool: Arc<ExtentPool>) -> Self {
        Self::new(true, |data| data.to_vec(), extent_pool)
    }

    /// Grows or shrinks `self.extents` to match how many the current
    /// entry count needs, allocating from or freeing back to the pool.
    fn resize_extents(&mut self) -> Result<()> {
        let needed = extents_needed(self.map.len());
        while self.extents.len() < needed {
            self.extents.push(self.extent_pool.allocate()?);
        }
        while self.extents.len() > needed {
            if let Some(extent) = self.extents.pop() {
                self.extent_pool.free(extent);
            }
        }
        Ok(())
    }
}

impl Index for BTreeIndex {
    fn replace(
        &mut self,
        old: Option<&TupleHandle>,
        new: Option<&TupleHandle>,
    ) -> Result<Option<TupleHandle>> {
        let old_key = old.map(|h| (self.key_fn)(&h.bytes()));
        let mut removed = None;
        if let Some(key) = &old_key {
            removed = self.map.remove(key);
        }

        if let Some(new_handle) = new {
            let new_key = (self.key_fn)(&new_handle.bytes());
            let displaces_old = old_key.as_ref() == Some(&new_key);
            if self.unique && !displaces_old && self.map.contains_key(&new_key) {
                // restore what we removed so the index is left unchanged on error
                if let (Some(key), Some(handle)) = (old_key, removed) {
                    self.map.insert(key, handle);
                }
                return Err(Error::Duplicate);
            }
            self.map.insert(new_key, new_handle.clone());
        }

        if let Err(e) = self.resize_extents() {
            // leave the map mutation in place: extent bookkeeping is
            // best-effort accounting, not the source of truth for index
            // contents, so a failed grow is reported but not unwound.
            tracing::warn!(error = %e, "index extent accounting failed to keep up with entry count");
        }

        Ok(removed)
    }

    fn size(&self) -> usize {
        self.map.len()
    }

    fn is_unique(&self) -> bool {
        self.unique
    }

    fn get(&self, key: &[u8]) -> Option<TupleHandle> {
        self.map.get(key).cloned()
    }

    fn create_snapshot_iterator(&self) -> Box<dyn SnapshotIterator> {
        let handles: VecDeque<TupleHandle> = self.map.values().cloned().collect();
        Box::new(BTreeSnapshotIterator { handles })
    }

    fn iter_handles(&self) -> Vec<TupleHandle> {
        self.map.values().cloned().collect()
    }
}

/// A read view capturing every tuple handle present at construction
/// time. Because each handle keeps its tuple's reference count above
/// zero, subsequent removals from the live index do not release the
/// underlying bytes until this iterator itself drops them.
struct BTreeSnapshotIterator {
    handles: VecDeque<TupleHandle>,
}

impl SnapshotIterator for BTreeSnapshotIterator {
    fn next(&mut self) -> Result<Option<Vec<u8>>> {
        Ok(self.handles.pop_front().map(|h| h.bytes()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use memtx_arena::{SmallObjectAllocator, TupleStore};
    use memtx_core::constants::EXTENT_SIZE;
    use memtx_core::traits::TupleFormat;

    struct F;
    impl TupleFormat for F {
        fn build_field_map(&self, _data: &[u8]) -> Result<usize> {
            Ok(0)
        }
        fn is_temporary(&self) -> bool {
            false
        }
        fn id(&self) -> memtx_core::ids::FormatId {
            1
        }
    }

    #[test]
    fn unique_index_rejects_duplicate_key() {
        let store = TupleStore::new(Arc::new(SmallObjectAllocator::new(4096)));
        let pool = Arc::new(ExtentPool::new(EXTENT_SIZE * 8));
        let mut idx = BTreeIndex::new(true, |data| data[0..1].to_vec(), pool);
        let a = store.tuple_new(&F, b"a1", 1024).unwrap();
        let b = store.tuple_new(&F, b"a2", 1024).unwrap();
        idx.replace(None, Some(&a)).unwrap();
        let err = idx.replace(None, Some(&b)).unwrap_err();
        assert!(matches!(err, Error::Duplicate));
        assert_eq!(idx.size(), 1);
    }

    #[test]
    fn snapshot_iterator_keeps_removed_tuple_alive() {
        let alloc = Arc::new(SmallObjectAllocator::new(4096));
        let store = TupleStore::new(alloc.clone());
        let pool = Arc::new(ExtentPool::new(EXTENT_SIZE * 8));
        let mut idx = BTreeIndex::identity_primary(pool);
        let t1 = store.tuple_new(&F, b"1", 1024).unwrap();
        let t2 = store.tuple_new(&F, b"2", 1024).unwrap();
        idx.replace(None, Some(&t1)).unwrap();
        idx.replace(None, Some(&t2)).unwrap();

        alloc.bump_generation();
        alloc.set_delayed_free(true);

        let mut iter = idx.create_snapshot_iterator();
        idx.replace(Some(&t2), None).unwrap();
        drop(t2);
        // still resident: the iterator holds its own handle
        assert_eq!(store.live_count(), 2);

        let mut rows = vec![];
        while let Some(row) = iter.next().unwrap() {
            rows.push(row);
        }
        assert_eq!(rows, vec![b"1".to_vec(), b"2".to_vec()]);
    }
}
