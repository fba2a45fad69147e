//! `memtx`: an in-memory transactional storage engine kernel.
//!
//! Bundles the tuple allocator and its copy-on-write snapshot discipline,
//! the index-extent pool, the cooperative garbage collector, the
//! recovery state machine, and the crash-safe snapshot writer/reader
//! behind a single [`Engine`] facade.
//!
//! # Quick start
//!
//! ```no_run
//! use memtx::{Engine, EngineConfig, OpaqueFormat};
//!
//! let config = EngineConfig::new("/tmp/memtx-data", 256 * 1024 * 1024);
//! let engine = Engine::new(config).expect("engine boots");
//! engine.create_space(0, 0, false).expect("space created");
//! engine.bootstrap().expect("bootstrap");
//!
//! let format = OpaqueFormat::new(0);
//! engine.insert(0, b"hello", &format).expect("tuple inserted");
//! ```

pub use memtx_core::config::EngineConfig;
pub use memtx_core::error::{Error, Result};
pub use memtx_core::ids::{FormatId, GroupId, IndexId, SpaceId, TupleId};
pub use memtx_core::traits::{ReplaceMode, SnapshotIterator, TupleFormat};
pub use memtx_core::vclock::Vclock;

pub use memtx_arena::{
    tuple_chunk_delete, tuple_chunk_new, Extent, ExtentPool, SmallObjectAllocator, TupleChunk,
    TupleHandle, TupleStore,
};
pub use memtx_gc::{GcTask, GcWorker};
pub use memtx_recovery::{RecoveryState, RecoveryStateMachine};
pub use memtx_snapshot::{row::SnapshotRow, CheckpointEntry, SnapshotWriter};

pub use memtx_engine::{BTreeIndex, Engine, Index, MemoryStat, OpaqueFormat, Space};
