//! Engine facade: creates spaces, applies and rolls back statements,
//! drives checkpoints end to end, and wires together the allocator, GC
//! worker, recovery state machine and snapshot subsystem.
//!
//! Also hosts the one concrete `Index`/`TupleFormat` pair the kernel
//! needs to be exercised against, since the real index data structures
//! and tuple binary format are out of this kernel's scope.

pub mod engine;
pub mod format;
pub mod index;
pub mod space;

pub use engine::{Engine, MemoryStat};
pub use format::OpaqueFormat;
pub use index::{BTreeIndex, Index};
pub use space::Space;
