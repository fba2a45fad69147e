//! Crash-safe snapshot writer (begin/wait/commit/abort checkpoint
//! lifecycle) and the reader used for recovery and replica join.

pub mod reader;
pub mod row;
pub mod writer;

pub use reader::{join, recover_snapshot, SnapshotReader};
pub use row::SnapshotRow;
pub use writer::{CheckpointEntry, SnapshotWriter};
