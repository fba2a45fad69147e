//! Quota-backed arena, small-object allocator with a delayed-free mode for
//! copy-on-write snapshotting, the tuple store built on top of it, and the
//! index-extent pool with its reservation protocol.

pub mod allocator;
pub mod chunk;
pub mod extent;
pub mod quota;
pub mod tuple;

pub use allocator::SmallObjectAllocator;
pub use chunk::{tuple_chunk_delete, tuple_chunk_new, TupleChunk};
pub use extent::{Extent, ExtentPool};
pub use quota::Quota;
pub use tuple::{TupleHandle, TupleStore};
