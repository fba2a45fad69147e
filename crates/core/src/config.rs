use std::path::PathBuf;

use crate::constants::{MAX_TUPLE_SIZE_DEFAULT, OBJSIZE_MIN};
use crate::error::{Error, Result};

/// Engine configuration, built up with chained `with_*` setters and
/// validated once before the engine boots.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    snap_dirname: PathBuf,
    force_recovery: bool,
    tuple_arena_max_size: usize,
    objsize_min: usize,
    alloc_factor: f64,
    dontdump: bool,
    snap_io_rate_limit: Option<u64>,
    max_tuple_size: usize,
    memory: usize,
}

impl EngineConfig {
    pub fn new(snap_dirname: impl Into<PathBuf>, memory: usize) -> Self {
        Self {
            snap_dirname: snap_dirname.into(),
            force_recovery: false,
            tuple_arena_max_size: memory,
            objsize_min: OBJSIZE_MIN,
            alloc_factor: 1.05,
            dontdump: false,
            snap_io_rate_limit: None,
            max_tuple_size: MAX_TUPLE_SIZE_DEFAULT,
            memory,
        }
    }

    pub fn for_testing(dir: impl Into<PathBuf>) -> Self {
        Self::new(dir, 64 * 1024 * 1024)
    }

    pub fn with_force_recovery(mut self, force_recovery: bool) -> Self {
        self.force_recovery = force_recovery;
        self
    }

    pub fn with_objsize_min(mut self, objsize_min: usize) -> Self {
        self.objsize_min = objsize_min.max(OBJSIZE_MIN);
        self
    }

    pub fn with_alloc_factor(mut self, alloc_factor: f64) -> Self {
        self.alloc_factor = alloc_factor;
        self
    }

    pub fn with_dontdump(mut self, dontdump: bool) -> Self {
        self.dontdump = dontdump;
        self
    }

    pub fn with_snap_io_rate_limit(mut self, limit: Option<u64>) -> Self {
        self.snap_io_rate_limit = limit;
        self
    }

    pub fn with_max_tuple_size(mut self, max_tuple_size: usize) -> Self {
        self.max_tuple_size = max_tuple_size;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.memory == 0 {
            return Err(Error::Config("memory must be non-zero".into()));
        }
        if self.alloc_factor <= 1.0 {
            return Err(Error::Config("alloc_factor must be > 1.0".into()));
        }
        if self.max_tuple_size == 0 || self.max_tuple_size > self.memory {
            return Err(Error::Config(
                "max_tuple_size must be non-zero and fit within memory".into(),
            ));
        }
        Ok(())
    }

    pub fn snap_dirname(&self) -> &std::path::Path {
        &self.snap_dirname
    }

    pub fn force_recovery(&self) -> bool {
        self.force_recovery
    }

    pub fn tuple_arena_max_size(&self) -> usize {
        self.tuple_arena_max_size
    }

    pub fn objsize_min(&self) -> usize {
        self.objsize_min
    }

    pub fn alloc_factor(&self) -> f64 {
        self.alloc_factor
    }

    pub fn dontdump(&self) -> bool {
        self.dontdump
    }

    pub fn snap_io_rate_limit(&self) -> Option<u64> {
        self.snap_io_rate_limit
    }

    pub fn max_tuple_size(&self) -> usize {
        self.max_tuple_size
    }

    pub fn memory(&self) -> usize {
        self.memory
    }

    /// Runtime-settable: rejects any attempt to shrink the memory ceiling.
    pub fn set_memory(&mut self, memory: usize) -> Result<()> {
        if memory < self.memory {
            return Err(Error::Config(
                "cannot decrease memory size at runtime".into(),
            ));
        }
        self.memory = memory;
        Ok(())
    }

    pub fn set_max_tuple_size(&mut self, max_tuple_size: usize) {
        self.max_tuple_size = max_tuple_size;
    }

    pub fn set_snap_io_rate_limit(&mut self, limit: Option<u64>) {
        self.snap_io_rate_limit = limit;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_zero_memory() {
        let cfg = EngineConfig::new("/tmp/x", 0);
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn clamps_objsize_min() {
        let cfg = EngineConfig::for_testing("/tmp/x").with_objsize_min(1);
        assert_eq!(cfg.objsize_min(), OBJSIZE_MIN);
    }

    #[test]
    fn memory_cannot_shrink() {
        let mut cfg = EngineConfig::for_testing("/tmp/x");
        let before = cfg.memory();
        assert!(cfg.set_memory(before - 1).is_err());
        assert!(cfg.set_memory(before + 1024).is_ok());
    }
}
