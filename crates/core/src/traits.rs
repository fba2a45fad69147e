use crate::error::Result;
use crate::ids::FormatId;

/// How a space currently routes mutation across its indexes. Toggled by
/// the recovery state machine; see `memtx-recovery`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplaceMode {
    /// Only the primary index exists yet; any mutation is rejected.
    BuildingPrimary,
    /// Only the primary index is maintained (fast bulk load).
    PrimaryOnly,
    /// All indexes are maintained.
    AllKeys,
}

/// A field-map-bearing schema descriptor. Opaque beyond what the
/// allocator needs to size and validate a tuple.
pub trait TupleFormat: Send + Sync {
    /// Build the field map for `data`, returning its size in bytes.
    /// Fails on malformed input.
    fn build_field_map(&self, data: &[u8]) -> Result<usize>;

    /// Tuples of a temporary format are always freed immediately,
    /// bypassing the delayed-free queue.
    fn is_temporary(&self) -> bool;

    fn id(&self) -> FormatId;
}

/// A read view over an index, captured at a single instant. Yields every
/// tuple live at creation exactly once, in index order, regardless of
/// subsequent mutation of the live index.
pub trait SnapshotIterator: Send {
    /// Returns the next tuple's raw bytes, or `None` at exhaustion.
    fn next(&mut self) -> Result<Option<Vec<u8>>>;
}
