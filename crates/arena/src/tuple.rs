use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tracing::trace;

use memtx_core::error::{Error, Result};
use memtx_core::ids::{FormatId, TupleId};
use memtx_core::traits::TupleFormat;

use crate::allocator::SmallObjectAllocator;

/// Fixed per-tuple bookkeeping overhead charged against the quota
/// alongside the field map and payload, mirroring `sizeof(memtx_tuple)`.
const TUPLE_HEADER_SIZE: usize = 24;

struct TupleEntry {
    data: Vec<u8>,
    refs: AtomicUsize,
    generation: u64,
    format_id: FormatId,
    is_temporary: bool,
    total_size: usize,
}

/// Owns every live tuple's bytes. Tuples are addressed by [`TupleId`] and
/// reference-counted manually (not via `Arc<[u8]>`) so that the count
/// reaching zero can be intercepted and routed through the allocator's
/// immediate-vs-delayed-free decision.
pub struct TupleStore {
    entries: DashMap<TupleId, TupleEntry>,
    next_id: AtomicU64,
    allocator: Arc<SmallObjectAllocator>,
}

impl TupleStore {
    pub fn new(allocator: Arc<SmallObjectAllocator>) -> Arc<Self> {
        Arc::new(Self {
            entries: DashMap::new(),
            next_id: AtomicU64::new(1),
            allocator,
        })
    }

    pub fn allocator(&self) -> &Arc<SmallObjectAllocator> {
        &self.allocator
    }

    /// Allocates a new tuple from `data`, validated and sized by `format`.
    /// Retries once after an allocator-level reclaim pass on out-of-memory,
    /// matching the retry-then-fail discipline the kernel uses throughout.
    pub fn tuple_new(
        self: &Arc<Self>,
        format: &dyn TupleFormat,
        data: &[u8],
        max_tuple_size: usize,
    ) -> Result<TupleHandle> {
        let field_map_size = format.build_field_map(data)?;
        let total = TUPLE_HEADER_SIZE + field_map_size + data.len();
        if total > max_tuple_size {
            return Err(Error::TupleTooLarge {
                size: total,
                max: max_tuple_size,
            });
        }

        if self.allocator.alloc(total).is_err() {
            self.allocator.try_reclaim();
            self.allocator.alloc(total)?;
        }

        let id = TupleId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let generation = self.allocator.current_generation();
        self.entries.insert(
            id,
            TupleEntry {
                data: data.to_vec(),
                refs: AtomicUsize::new(1),
                generation,
                format_id: format.id(),
                is_temporary: format.is_temporary(),
                total_size: total,
            },
        );
        trace!(tuple_id = id.0, generation, size = total, "tuple allocated");
        Ok(TupleHandle {
            store: self.clone(),
            id,
        })
    }

    pub fn bytes(&self, id: TupleId) -> Option<Vec<u8>> {
        self.entries.get(&id).map(|e| e.data.clone())
    }

    pub fn format_id(&self, id: TupleId) -> Option<FormatId> {
        self.entries.get(&id).map(|e| e.format_id)
    }

    pub fn generation(&self, id: TupleId) -> Option<u64> {
        self.entries.get(&id).map(|e| e.generation)
    }

    pub fn live_count(&self) -> usize {
        self.entries.len()
    }

    fn incref(&self, id: TupleId) {
        if let Some(entry) = self.entries.get(&id) {
            entry.refs.fetch_add(1, Ordering::AcqRel);
        }
    }

    /// Decrements the reference count; on reaching zero, removes the
    /// tuple's bytes and routes its quota release through the allocator's
    /// immediate-vs-delayed decision.
    fn decref(&self, id: TupleId) {
        let Some(entry) = self.entries.get(&id) else {
            return;
        };
        let prev = entry.refs.fetch_sub(1, Ordering::AcqRel);
        if prev != 1 {
            return;
        }
        drop(entry);
        if let Some((_, entry)) = self.entries.remove(&id) {
            if self
                .allocator
                .should_free_immediately(entry.generation, entry.is_temporary)
            {
                self.allocator.free(entry.total_size);
            } else {
                self.allocator
                    .free_delayed(entry.total_size, entry.generation);
            }
            trace!(tuple_id = id.0, "tuple deleted");
        }
    }
}

/// An owned, reference-counted reference to a tuple. Cloning increments
/// the tuple's manual refcount; dropping the last handle frees it through
/// [`TupleStore`]'s immediate-vs-delayed logic.
pub struct TupleHandle {
    store: Arc<TupleStore>,
    id: TupleId,
}

impl TupleHandle {
    pub fn id(&self) -> TupleId {
        self.id
    }

    pub fn bytes(&self) -> Vec<u8> {
        self.store.bytes(self.id).unwrap_or_default()
    }
}

impl Clone for TupleHandle {
    fn clone(&self) -> Self {
        self.store.incref(self.id);
        Self {
            store: self.store.clone(),
            id: self.id,
        }
    }
}

impl Drop for TupleHandle {
    fn drop(&mut self) {
        self.store.decref(self.id);
    }
}

impl std::fmt::Debug for TupleHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TupleHandle").field("id", &self.id.0).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct TestFormat {
        temporary: bool,
    }

    impl TupleFormat for TestFormat {
        fn build_field_map(&self, data: &[u8]) -> Result<usize> {
            if data.is_empty() {
                return Err(Error::FormatError("empty tuple".into()));
            }
            Ok(0)
        }

        fn is_temporary(&self) -> bool {
            self.temporary
        }

        fn id(&self) -> FormatId {
            1
        }
    }

    #[test]
    fn new_tuple_is_live_until_dropped() {
        let alloc = Arc::new(SmallObjectAllocator::new(4096));
        let store = TupleStore::new(alloc);
        let fmt = TestFormat { temporary: false };
        let handle = store.tuple_new(&fmt, b"abc", 1024).unwrap();
        assert_eq!(store.live_count(), 1);
        assert_eq!(handle.bytes(), b"abc");
        drop(handle);
        assert_eq!(store.live_count(), 0);
    }

    #[test]
    fn clone_keeps_tuple_alive_until_all_dropped() {
        let alloc = Arc::new(SmallObjectAllocator::new(4096));
        let store = TupleStore::new(alloc);
        let fmt = TestFormat { temporary: false };
        let a = store.tuple_new(&fmt, b"abc", 1024).unwrap();
        let b = a.clone();
        drop(a);
        assert_eq!(store.live_count(), 1);
        drop(b);
        assert_eq!(store.live_count(), 0);
    }

    #[test]
    fn too_large_tuple_rejected() {
        let alloc = Arc::new(SmallObjectAllocator::new(4096));
        let store = TupleStore::new(alloc);
        let fmt = TestFormat { temporary: false };
        let err = store.tuple_new(&fmt, b"abc", 4).unwrap_err();
        assert!(matches!(err, Error::TupleTooLarge { .. }));
    }

    #[test]
    fn delayed_free_defers_quota_release() {
        let alloc = Arc::new(SmallObjectAllocator::new(4096));
        alloc.bump_generation();
        alloc.set_delayed_free(true);
        let store = TupleStore::new(alloc.clone());
        let fmt = TestFormat { temporary: false };
        let handle = store.tuple_new(&fmt, b"abc", 1024).unwrap();
        let used_before_drop = alloc.quota().used();
        drop(handle);
        // bytes logically gone, but quota charge deferred until reclaim
        assert_eq!(alloc.quota().used(), used_before_drop);
        alloc.bump_generation();
        alloc.try_reclaim();
        assert_eq!(alloc.quota().used(), 0);
    }
}
