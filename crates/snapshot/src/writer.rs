use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use byteorder::{LittleEndian, WriteBytesExt};
use crc32fast::Hasher;
use parking_lot::Mutex;
use tracing::{error, info, warn};

use memtx_core::constants::SNAP_SYNC_INTERVAL;
use memtx_core::error::{Error, Result};
use memtx_core::ids::{GroupId, SpaceId};
use memtx_core::traits::SnapshotIterator;
use memtx_core::vclock::Vclock;

use crate::row::SnapshotRow;

/// Sentinel length prefix marking the end of the row stream.
const EOF_MARKER: u32 = u32::MAX;

/// One space's contribution to a checkpoint: its group id and a
/// snapshot iterator over its primary index, captured at `begin`.
pub struct CheckpointEntry {
    pub space_id: SpaceId,
    pub group_id: GroupId,
    pub iterator: Box<dyn SnapshotIterator>,
}

struct PendingCheckpoint {
    entries: Vec<CheckpointEntry>,
}

struct RunningCheckpoint {
    vclock: Vclock,
    touch: bool,
    temp_path: PathBuf,
    final_path: PathBuf,
}

/// Drives the begin/wait/commit/abort checkpoint lifecycle and owns the
/// dedicated writer thread that streams tuples to disk.
pub struct SnapshotWriter {
    dir: PathBuf,
    rate_limit_bytes_per_sec: Mutex<Option<u64>>,
    pending: Mutex<Option<PendingCheckpoint>>,
    running: Mutex<Option<RunningCheckpoint>>,
}

impl SnapshotWriter {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            rate_limit_bytes_per_sec: Mutex::new(None),
            pending: Mutex::new(None),
            running: Mutex::new(None),
        }
    }

    pub fn with_rate_limit(self, bytes_per_sec: Option<u64>) -> Self {
        *self.rate_limit_bytes_per_sec.lock() = bytes_per_sec;
        self
    }

    /// Runtime-settable I/O throttle for the writer thread.
    pub fn set_rate_limit(&self, bytes_per_sec: Option<u64>) {
        *self.rate_limit_bytes_per_sec.lock() = bytes_per_sec;
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn is_active(&self) -> bool {
        self.pending.lock().is_some() || self.running.lock().is_some()
    }

    fn final_path(&self, vclock: &Vclock) -> PathBuf {
        self.dir.join(format!("{:020}.snap", vclock.signature()))
    }

    fn temp_path(&self, vclock: &Vclock) -> PathBuf {
        self.dir.join(format!("{:020}.snap.inprogress", vclock.signature()))
    }

    /// Captures the set of per-space snapshot iterators that will be
    /// streamed to disk. Must be called with no checkpoint already
    /// active.
    pub fn begin(&self, entries: Vec<CheckpointEntry>) -> Result<()> {
        let mut pending = self.pending.lock();
        if pending.is_some() || self.running.lock().is_some() {
            return Err(Error::CheckpointInProgress);
        }
        *pending = Some(PendingCheckpoint { entries });
        Ok(())
    }

    /// Runs the write loop on the blocking-task pool and awaits it,
    /// rather than joining a thread synchronously: the caller runs on the
    /// cooperative scheduler shared with the GC worker, and a direct
    /// `JoinHandle::join` would park that scheduler's only OS thread for
    /// the whole checkpoint.
    pub async fn wait(&self, vclock: Vclock) -> Result<()> {
        let entries = {
            let mut pending = self.pending.lock();
            pending
                .take()
                .ok_or(Error::NoCheckpointInProgress)?
                .entries
        };

        let final_path = self.final_path(&vclock);
        let temp_path = self.temp_path(&vclock);
        let touch = final_path.exists();

        if touch {
            info!(path = %final_path.display(), "snapshot already exists, touching only");
            *self.running.lock() = Some(RunningCheckpoint {
                vclock,
                touch: true,
                temp_path,
                final_path,
            });
            return Ok(());
        }

        let rate_limit = *self.rate_limit_bytes_per_sec.lock();
        let task_temp_path = temp_path.clone();
        let join_result =
            tokio::task::spawn_blocking(move || write_snapshot_file(&task_temp_path, entries, rate_limit))
                .await;

        let io_result = match join_result {
            Ok(res) => res,
            Err(_) => {
                return Err(Error::Io(std::io::Error::other("snapshot writer task panicked")))
            }
        };

        if let Err(e) = &io_result {
            error!(error = %e, "snapshot writer failed");
        }

        *self.running.lock() = Some(RunningCheckpoint {
            vclock,
            touch: false,
            temp_path,
            final_path,
        });

        io_result.map_err(Error::Io)
    }

    /// Finalizes a successfully written checkpoint by atomically
    /// publishing the in-progress file. Rename failure is fatal: the
    /// file is already durable on disk, so a failed publish leaves the
    /// on-disk state ambiguous rather than recoverable.
    pub fn commit(&self) -> Result<PathBuf> {
        let running = self
            .running
            .lock()
            .take()
            .ok_or(Error::NoCheckpointInProgress)?;

        if !running.touch {
            if let Err(e) = fs::rename(&running.temp_path, &running.final_path) {
                panic!(
                    "failed to publish snapshot {}: {e}",
                    running.final_path.display()
                );
            }
            if let Some(dir_file) = File::open(&self.dir).ok() {
                let _ = dir_file.sync_all();
            }
        }

        info!(path = %running.final_path.display(), "checkpoint committed");
        Ok(running.final_path)
    }

    /// Abandons an in-flight or just-completed checkpoint, best-effort
    /// removing any in-progress file it produced.
    pub fn abort(&self) -> Result<()> {
        *self.pending.lock() = None;
        if let Some(running) = self.running.lock().take() {
            if !running.touch {
                if let Err(e) = fs::remove_file(&running.temp_path) {
                    if e.kind() != std::io::ErrorKind::NotFound {
                        warn!(error = %e, "failed to remove in-progress snapshot on abort");
                    }
                }
            }
        }
        Ok(())
    }

    pub fn cancel(&self) -> Result<()> {
        self.abort()
    }
}

fn write_snapshot_file(
    path: &Path,
    entries: Vec<CheckpointEntry>,
    rate_limit_bytes_per_sec: Option<u64>,
) -> std::io::Result<()> {
    let file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(path)?;
    let mut writer = BufWriter::new(file);
    let mut hasher = Hasher::new();
    let mut lsn: u64 = 0;
    let mut bytes_since_sync: u64 = 0;
    let tm = chrono::Utc::now().timestamp();
    let mut rows_written: u64 = 0;
    let mut bytes_since_rate_check: u64 = 0;
    let throttle_start = std::time::Instant::now();

    for mut entry in entries {
        loop {
            let next = entry
                .iterator
                .next()
                .map_err(|e| std::io::Error::other(e.to_string()))?;
            let Some(tuple_bytes) = next else { break };
            lsn += 1;
            let row = SnapshotRow::new(entry.space_id, entry.group_id, lsn, tm, tuple_bytes);
            let encoded = rmp_serde::to_vec(&row)
                .map_err(|e| std::io::Error::other(e.to_string()))?;
            writer.write_u32::<LittleEndian>(encoded.len() as u32)?;
            hasher.update(&(encoded.len() as u32).to_le_bytes());
            writer.write_all(&encoded)?;
            hasher.update(&encoded);

            let written = 4 + encoded.len() as u64;
            bytes_since_sync += written;
            bytes_since_rate_check += written;
            rows_written += 1;

            if bytes_since_sync >= SNAP_SYNC_INTERVAL {
                writer.flush()?;
                writer.get_ref().sync_data()?;
                bytes_since_sync = 0;
            }

            if rows_written % 100_000 == 0 {
                info!(rows = rows_written, "checkpoint write progress");
            }

            if let Some(limit) = rate_limit_bytes_per_sec {
                let elapsed = throttle_start.elapsed().as_secs_f64().max(0.001);
                let allowed = (limit as f64 * elapsed) as u64;
                if bytes_since_rate_check > allowed {
                    let overage = bytes_since_rate_check - allowed;
                    std::thread::sleep(std::time::Duration::from_secs_f64(
                        overage as f64 / limit as f64,
                    ));
                }
            }
        }
    }

    writer.write_u32::<LittleEndian>(EOF_MARKER)?;
    hasher.update(&EOF_MARKER.to_le_bytes());
    let crc = hasher.finalize();
    writer.write_u32::<LittleEndian>(crc)?;
    writer.flush()?;
    writer.get_ref().sync_all()?;
    Ok(())
}
