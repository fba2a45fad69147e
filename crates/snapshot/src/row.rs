use serde::{Deserialize, Serialize};

use memtx_core::ids::{GroupId, SpaceId};

/// Request type tag carried by every snapshot row. Snapshots only ever
/// contain inserts; anything else read back is a corruption signal.
pub const IPROTO_INSERT: u8 = 2;

/// A single persisted tuple, as it appears in a snapshot file. Body is a
/// two-field map of space id and raw tuple bytes, matching the wire shape
/// the host's row format uses for inserts.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SnapshotRow {
    pub row_type: u8,
    pub group_id: GroupId,
    pub lsn: u64,
    pub tm: i64,
    pub replica_id: u32,
    pub sync: u32,
    pub space_id: SpaceId,
    pub tuple: Vec<u8>,
}

impl SnapshotRow {
    pub fn new(space_id: SpaceId, group_id: GroupId, lsn: u64, tm: i64, tuple: Vec<u8>) -> Self {
        Self {
            row_type: IPROTO_INSERT,
            group_id,
            lsn,
            tm,
            replica_id: 0,
            sync: 0,
            space_id,
            tuple,
        }
    }
}
