/// Opaque handle into a `TupleStore`. Carries no lifetime; ownership and
/// reference counting are tracked by the store itself via `TupleHandle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TupleId(pub u64);

pub type SpaceId = u32;
pub type IndexId = u32;
pub type GroupId = u32;
pub type FormatId = u32;
