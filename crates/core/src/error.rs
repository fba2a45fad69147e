use std::io;

/// Errors surfaced at the engine kernel boundary.
///
/// Two conditions the design treats as programming errors rather than
/// recoverable state (an infeasible rollback, an ambiguous on-disk
/// rename) are not represented here: they panic at the call site instead
/// of being returned, matching the contract callers are expected to
/// uphold.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("out of memory")]
    OutOfMemory,

    #[error("tuple size {size} exceeds max_tuple_size {max}")]
    TupleTooLarge { size: usize, max: usize },

    #[error("malformed tuple data: {0}")]
    FormatError(String),

    #[error("space {space_id} does not belong to this engine")]
    CrossEngine { space_id: u32 },

    #[error("unknown request type {0}")]
    UnknownRequestType(u8),

    #[error("io error: {0}")]
    Io(#[from] io::Error),

    #[error("corrupt snapshot: {0}")]
    CorruptSnapshot(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("duplicate key in unique index")]
    Duplicate,

    #[error("space {0} not found")]
    SpaceNotFound(u32),

    #[error("index {0} not found")]
    IndexNotFound(u32),

    #[error("operation invalid in current recovery state: {0}")]
    InvalidRecoveryState(String),

    #[error("a checkpoint is already in progress")]
    CheckpointInProgress,

    #[error("no checkpoint is in progress")]
    NoCheckpointInProgress,
}

pub type Result<T> = std::result::Result<T, Error>;
