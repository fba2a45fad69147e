//! Compile- and boot-time constants mirrored from the original engine.

/// Minimum allowed small-object size class. Anything smaller is rounded up.
pub const OBJSIZE_MIN: usize = 16;

/// Slab granularity the arena carves out of the quota.
pub const SLAB_SIZE: usize = 16 * 1024 * 1024;

/// How often (in bytes written) the snapshot writer syncs to disk.
pub const SNAP_SYNC_INTERVAL: u64 = 16 * 1024 * 1024;

/// Default ceiling on a single tuple's encoded size.
pub const MAX_TUPLE_SIZE_DEFAULT: usize = 1024 * 1024;

/// Fixed size of one index extent block.
pub const EXTENT_SIZE: usize = 16 * 1024;

/// How many index entries one extent is sized to back, before another
/// extent must be reserved from the pool.
pub const INDEX_ENTRIES_PER_EXTENT: usize = 512;

/// Recovery reader / initial-join yield cadence, in rows.
pub const RECOVERY_YIELD_INTERVAL: u64 = 100_000;
