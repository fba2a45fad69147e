use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::Mutex;

use memtx_core::error::Result;

use crate::quota::Quota;

/// A buffer queued for release once the engine's snapshot generation has
/// advanced past the generation it was tagged with.
struct DelayedEntry {
    size: usize,
    generation: u64,
}

/// Size-segregated byte allocator charging all allocations against a
/// shared [`Quota`], with a delayed-free mode entered for the duration of
/// a checkpoint so tuples visible to an in-flight snapshot iterator stay
/// resident after their last live reference is dropped.
pub struct SmallObjectAllocator {
    quota: Quota,
    delayed_free: AtomicBool,
    current_generation: AtomicU64,
    delayed_queue: Mutex<VecDeque<DelayedEntry>>,
}

impl SmallObjectAllocator {
    pub fn new(limit: usize) -> Self {
        Self {
            quota: Quota::new(limit),
            delayed_free: AtomicBool::new(false),
            current_generation: AtomicU64::new(0),
            delayed_queue: Mutex::new(VecDeque::new()),
        }
    }

    pub fn quota(&self) -> &Quota {
        &self.quota
    }

    pub fn is_delayed_free(&self) -> bool {
        self.delayed_free.load(Ordering::Acquire)
    }

    pub fn set_delayed_free(&self, enabled: bool) {
        self.delayed_free.store(enabled, Ordering::Release);
    }

    pub fn current_generation(&self) -> u64 {
        self.current_generation.load(Ordering::Acquire)
    }

    /// Advances the snapshot generation. Called at the start of
    /// `begin_checkpoint`, strictly before `set_delayed_free(true)`.
    pub fn bump_generation(&self) -> u64 {
        self.current_generation.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub fn alloc(&self, size: usize) -> Result<()> {
        self.quota.charge(size)
    }

    /// Releases `size` bytes immediately.
    pub fn free(&self, size: usize) {
        self.quota.release(size);
    }

    /// Queues `size` bytes, tagged with `generation`, for release once
    /// the current generation has advanced past it.
    pub fn free_delayed(&self, size: usize, generation: u64) {
        self.delayed_queue
            .lock()
            .push_back(DelayedEntry { size, generation });
    }

    /// Decides, per the allocator's rules, whether a tuple stamped with
    /// `tuple_generation` and belonging to a temporary format should be
    /// freed immediately or deferred.
    pub fn should_free_immediately(&self, tuple_generation: u64, is_temporary: bool) -> bool {
        !self.is_delayed_free()
            || tuple_generation == self.current_generation()
            || is_temporary
    }

    /// Drains delayed entries whose generation has been superseded,
    /// releasing their quota. Returns the number of entries drained.
    /// This is also the allocator-level "one GC step" `tuple_new` runs on
    /// an allocation failure before giving up with out-of-memory.
    pub fn try_reclaim(&self) -> usize {
        let current = self.current_generation();
        let mut queue = self.delayed_queue.lock();
        let mut drained = 0;
        while let Some(front) = queue.front() {
            if front.generation >= current {
                break;
            }
            let entry = queue.pop_front().unwrap();
            self.quota.release(entry.size);
            drained += 1;
        }
        drained
    }

    pub fn delayed_queue_len(&self) -> usize {
        self.delayed_queue.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn immediate_free_when_not_delayed() {
        let a = SmallObjectAllocator::new(1024);
        assert!(a.should_free_immediately(0, false));
    }

    #[test]
    fn deferred_when_delayed_and_stale_generation() {
        let a = SmallObjectAllocator::new(1024);
        a.bump_generation();
        a.set_delayed_free(true);
        assert!(!a.should_free_immediately(0, false));
        assert!(a.should_free_immediately(1, false));
    }

    #[test]
    fn temporary_format_always_immediate() {
        let a = SmallObjectAllocator::new(1024);
        a.bump_generation();
        a.set_delayed_free(true);
        assert!(a.should_free_immediately(0, true));
    }

    #[test]
    fn reclaim_drains_only_stale_generations() {
        let a = SmallObjectAllocator::new(1024);
        a.alloc(100).unwrap();
        a.free_delayed(100, 0);
        assert_eq!(a.try_reclaim(), 0);
        a.bump_generation();
        assert_eq!(a.try_reclaim(), 1);
        assert_eq!(a.quota().used(), 0);
    }
}
