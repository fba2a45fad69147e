use parking_lot::Mutex;

use memtx_core::constants::EXTENT_SIZE;
use memtx_core::error::{Error, Result};

use crate::quota::Quota;

/// A fixed-size block backing index internals.
pub type Extent = Box<[u8; EXTENT_SIZE]>;

fn new_extent() -> Extent {
    Box::new([0u8; EXTENT_SIZE])
}

type GcHook = Box<dyn Fn() -> bool + Send + Sync>;

/// Fixed-size block allocator for index internals, with a reservation
/// protocol: `reserve(n)` guarantees the following `n` calls to
/// `allocate()` cannot fail, so an index structural operation that must
/// not fail partway through can reserve up front.
///
/// Backed by its own [`Quota`], separate from the tuple allocator's, just
/// as the original keeps a dedicated mempool for index extents.
pub struct ExtentPool {
    quota: Quota,
    reserved: Mutex<Vec<Extent>>,
    gc_hook: Mutex<Option<GcHook>>,
}

impl ExtentPool {
    pub fn new(limit: usize) -> Self {
        Self {
            quota: Quota::new(limit),
            reserved: Mutex::new(Vec::new()),
            gc_hook: Mutex::new(None),
        }
    }

    pub fn quota(&self) -> &Quota {
        &self.quota
    }

    pub fn reserved_count(&self) -> usize {
        self.reserved.lock().len()
    }

    /// Installs the callback `allocate`/`reserve` run to make one step of
    /// GC progress before retrying a charge that failed on the first
    /// attempt. Returns whether the step made any progress; `allocate`
    /// only retries once the hook reports `true`.
    pub fn set_gc_hook(&self, hook: impl Fn() -> bool + Send + Sync + 'static) {
        *self.gc_hook.lock() = Some(Box::new(hook));
    }

    fn charge_with_retry(&self) -> Result<()> {
        if self.quota.charge(EXTENT_SIZE).is_ok() {
            return Ok(());
        }
        let ran = self.gc_hook.lock().as_ref().map(|h| h()).unwrap_or(false);
        if !ran {
            return Err(Error::OutOfMemory);
        }
        self.quota.charge(EXTENT_SIZE)
    }

    /// Pops a previously reserved extent if one exists; otherwise
    /// allocates fresh against the pool's quota, running one GC step and
    /// retrying once before giving up with out-of-memory.
    pub fn allocate(&self) -> Result<Extent> {
        if let Some(extent) = self.reserved.lock().pop() {
            return Ok(extent);
        }
        self.charge_with_retry()?;
        Ok(new_extent())
    }

    /// Tops up the reservation list until it holds at least `n` extents.
    pub fn reserve(&self, n: usize) -> Result<()> {
        loop {
            let need = {
                let reserved = self.reserved.lock();
                if reserved.len() >= n {
                    return Ok(());
                }
                n - reserved.len()
            };
            for _ in 0..need {
                self.charge_with_retry()?;
                self.reserved.lock().push(new_extent());
            }
        }
    }

    /// Returns an extent directly to the pool's quota; never onto the
    /// reservation list.
    pub fn free(&self, _extent: Extent) {
        self.quota.release(EXTENT_SIZE);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reservation_guarantees_n_allocations() {
        let pool = ExtentPool::new(EXTENT_SIZE * 8);
        pool.reserve(8).unwrap();
        assert_eq!(pool.reserved_count(), 8);
        for _ in 0..8 {
            assert!(pool.allocate().is_ok());
        }
        assert_eq!(pool.reserved_count(), 0);
        // quota is exhausted now that the reserve has been drawn down
        assert!(pool.allocate().is_err());
    }

    #[test]
    fn free_never_refills_reservation() {
        let pool = ExtentPool::new(EXTENT_SIZE * 4);
        pool.reserve(2).unwrap();
        let e = pool.allocate().unwrap();
        pool.free(e);
        assert_eq!(pool.reserved_count(), 1);
    }

    #[test]
    fn gc_hook_is_given_one_retry_before_failing() {
        use std::sync::{Arc, Mutex};

        let pool = Arc::new(ExtentPool::new(EXTENT_SIZE));
        let first = pool.allocate().unwrap();
        // Quota is now exhausted; without a hook the next charge fails outright.
        assert!(pool.allocate().is_err());

        let freed = Arc::new(Mutex::new(Some(first)));
        let pool_for_hook = pool.clone();
        pool.set_gc_hook(move || match freed.lock().unwrap().take() {
            Some(extent) => {
                pool_for_hook.free(extent);
                true
            }
            None => false,
        });
        assert!(pool.allocate().is_ok());
    }
}
