use std::sync::atomic::{AtomicUsize, Ordering};

use memtx_core::error::{Error, Result};

/// Process-wide byte budget. All tuple and index-extent memory is charged
/// here so memory pressure reduces to a single number.
#[derive(Debug)]
pub struct Quota {
    limit: AtomicUsize,
    used: AtomicUsize,
}

impl Quota {
    pub fn new(limit: usize) -> Self {
        Self {
            limit: AtomicUsize::new(limit),
            used: AtomicUsize::new(0),
        }
    }

    /// Attempts to charge `size` bytes against the budget. Fails without
    /// mutating state if the budget would be exceeded.
    pub fn charge(&self, size: usize) -> Result<()> {
        loop {
            let used = self.used.load(Ordering::Acquire);
            let limit = self.limit.load(Ordering::Acquire);
            if used.saturating_add(size) > limit {
                return Err(Error::OutOfMemory);
            }
            if self
                .used
                .compare_exchange_weak(used, used + size, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return Ok(());
            }
        }
    }

    pub fn release(&self, size: usize) {
        self.used.fetch_sub(size, Ordering::AcqRel);
    }

    pub fn used(&self) -> usize {
        self.used.load(Ordering::Acquire)
    }

    pub fn limit(&self) -> usize {
        self.limit.load(Ordering::Acquire)
    }

    /// Runtime-settable: rejects shrinking below what's already in use,
    /// since that would make the budget unsatisfiable.
    pub fn set_limit(&self, limit: usize) -> Result<()> {
        if limit < self.used() {
            return Err(Error::Config(
                "cannot decrease memory size below current usage".into(),
            ));
        }
        self.limit.store(limit, Ordering::Release);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn charge_rejects_over_budget() {
        let q = Quota::new(100);
        assert!(q.charge(60).is_ok());
        assert!(q.charge(50).is_err());
        assert_eq!(q.used(), 60);
    }

    #[test]
    fn release_frees_budget() {
        let q = Quota::new(100);
        q.charge(100).unwrap();
        q.release(40);
        assert_eq!(q.used(), 60);
        assert!(q.charge(40).is_ok());
    }

    proptest! {
        /// `used` never exceeds `limit` under any sequence of charge/release
        /// calls, and a rejected charge never mutates `used`.
        #[test]
        fn used_never_exceeds_limit(ops in proptest::collection::vec(-200i64..200i64, 0..64)) {
            let q = Quota::new(100);
            for op in ops {
                if op >= 0 {
                    let before = q.used();
                    if q.charge(op as usize).is_err() {
                        prop_assert_eq!(q.used(), before);
                    }
                } else {
                    q.release((-op) as usize);
                }
                prop_assert!(q.used() <= q.limit());
            }
        }
    }
}
