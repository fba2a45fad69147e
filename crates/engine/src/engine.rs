use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::info;

use memtx_arena::{ExtentPool, SmallObjectAllocator, TupleHandle, TupleStore};
use memtx_core::config::EngineConfig;
use memtx_core::error::{Error, Result};
use memtx_core::ids::{GroupId, SpaceId};
use memtx_core::traits::{ReplaceMode, TupleFormat};
use memtx_core::vclock::Vclock;
use memtx_gc::{GcTask, GcWorker};
use memtx_recovery::{RecoveryStateMachine, RecoveryState};
use memtx_snapshot::{row::SnapshotRow, CheckpointEntry, SnapshotWriter};

use crate::format::OpaqueFormat;
use crate::index::BTreeIndex;
use crate::space::Space;

/// Breakdown of live memory usage, mirroring the host's `memory_stat`
/// vtable call: bytes held by tuples versus bytes held by index
/// internals.
#[derive(Debug, Clone, Copy)]
pub struct MemoryStat {
    pub data: usize,
    pub index: usize,
}

/// GC task draining the tuple allocator's delayed-free queue. Scheduled
/// once a checkpoint ends so the cooperative worker reclaims bytes
/// tagged with the generation that just finished, instead of requiring
/// the caller to poll `try_reclaim` directly.
struct ReclaimTask {
    allocator: Arc<SmallObjectAllocator>,
}

impl GcTask for ReclaimTask {
    fn run(&mut self) -> bool {
        self.allocator.try_reclaim();
        self.allocator.delayed_queue_len() == 0
    }

    fn free(self: Box<Self>) {}

    fn name(&self) -> &str {
        "tuple-delayed-free-reclaim"
    }
}

/// Ties the allocator, GC worker, recovery state machine and snapshot
/// subsystem together behind the host-facing storage engine interface.
pub struct Engine {
    config: EngineConfig,
    allocator: Arc<SmallObjectAllocator>,
    tuple_store: Arc<TupleStore>,
    extent_pool: Arc<ExtentPool>,
    gc: Arc<GcWorker>,
    recovery: RecoveryStateMachine,
    writer: SnapshotWriter,
    spaces: dashmap::DashMap<SpaceId, Space>,
    max_tuple_size: AtomicUsize,
}

impl Engine {
    pub fn new(config: EngineConfig) -> Result<Self> {
        config.validate()?;
        std::fs::create_dir_all(config.snap_dirname())?;
        let allocator = Arc::new(SmallObjectAllocator::new(config.tuple_arena_max_size()));
        let tuple_store = TupleStore::new(allocator.clone());
        let extent_pool = Arc::new(ExtentPool::new(config.tuple_arena_max_size().max(1) / 4));
        let gc = GcWorker::new();
        let recovery = RecoveryStateMachine::new(config.force_recovery());
        let writer = SnapshotWriter::new(config.snap_dirname())
            .with_rate_limit(config.snap_io_rate_limit());
        let max_tuple_size = AtomicUsize::new(config.max_tuple_size());

        let gc_for_hook = gc.clone();
        extent_pool.set_gc_hook(move || gc_for_hook.run_step());

        Ok(Self {
            config,
            allocator,
            tuple_store,
            extent_pool,
            gc,
            recovery,
            writer,
            spaces: dashmap::DashMap::new(),
            max_tuple_size,
        })
    }

    /// Spawns the cooperative GC worker onto the surrounding tokio
    /// runtime. Must be called from within a runtime context.
    pub fn spawn_gc(&self) -> JoinHandle<()> {
        self.gc.clone().spawn()
    }

    pub fn gc(&self) -> &Arc<GcWorker> {
        &self.gc
    }

    pub fn extent_pool(&self) -> &Arc<ExtentPool> {
        &self.extent_pool
    }

    pub fn tuple_store(&self) -> &Arc<TupleStore> {
        &self.tuple_store
    }

    pub fn allocator(&self) -> &Arc<SmallObjectAllocator> {
        &self.allocator
    }

    pub fn recovery_state(&self) -> RecoveryState {
        self.recovery.state()
    }

    pub fn max_tuple_size(&self) -> usize {
        self.max_tuple_size.load(Ordering::Acquire)
    }

    pub fn set_max_tuple_size(&self, value: usize) {
        self.max_tuple_size.store(value, Ordering::Release);
    }

    /// Memory may only grow at runtime; shrinking would make an
    /// already-allocated budget unsatisfiable.
    pub fn set_memory(&self, value: usize) -> Result<()> {
        self.allocator.quota().set_limit(value)
    }

    pub fn set_snap_io_rate_limit(&self, value: Option<u64>) {
        self.writer.set_rate_limit(value);
    }

    // -- space & index management --------------------------------------

    pub fn create_space(&self, id: SpaceId, group_id: GroupId, temporary: bool) -> Result<()> {
        let primary = BTreeIndex::identity_primary(self.extent_pool.clone());
        let space = Space::new(id, group_id, temporary, Box::new(primary));
        self.spaces.insert(id, space);
        if !temporary {
            self.recovery.register_space(id);
        }
        Ok(())
    }

    pub fn add_secondary_index(
        &self,
        space_id: SpaceId,
        unique: bool,
        key_fn: impl Fn(&[u8]) -> Vec<u8> + Send + Sync + 'static,
    ) -> Result<()> {
        let mut space = self
            .spaces
            .get_mut(&space_id)
            .ok_or(Error::SpaceNotFound(space_id))?;
        let index = BTreeIndex::new(unique, key_fn, self.extent_pool.clone());
        space.add_secondary_index(Box::new(index));
        Ok(())
    }

    pub fn space_size(&self, space_id: SpaceId, index: usize) -> Result<usize> {
        let space = self
            .spaces
            .get(&space_id)
            .ok_or(Error::SpaceNotFound(space_id))?;
        space
            .indexes()
            .get(index)
            .map(|i| i.size())
            .ok_or(Error::IndexNotFound(index as u32))
    }

    // -- statement application --------------------------------------------

    /// Allocates a tuple and inserts it into `space_id`'s indexes, never
    /// suspending: the memtx engine forbids cooperative yield inside a
    /// statement to preserve index consistency.
    pub fn insert(&self, space_id: SpaceId, data: &[u8], format: &dyn TupleFormat) -> Result<TupleHandle> {
        let handle = self
            .tuple_store
            .tuple_new(format, data, self.max_tuple_size())?;
        self.apply_insert(space_id, &handle)?;
        Ok(handle)
    }

    fn apply_insert(&self, space_id: SpaceId, handle: &TupleHandle) -> Result<()> {
        let mode = self.recovery.replace_mode(space_id);
        if mode == ReplaceMode::BuildingPrimary {
            return Err(Error::InvalidRecoveryState(format!(
                "space {space_id} primary index is still building"
            )));
        }
        {
            let mut space = self
                .spaces
                .get_mut(&space_id)
                .ok_or(Error::SpaceNotFound(space_id))?;
            space.primary_mut().replace(None, Some(handle))?;
        }
        if mode == ReplaceMode::AllKeys {
            let mut space = self
                .spaces
                .get_mut(&space_id)
                .ok_or(Error::SpaceNotFound(space_id))?;
            let n = space.indexes().len();
            for i in 1..n {
                if let Err(e) = space.indexes_mut()[i].replace(None, Some(handle)) {
                    space.primary_mut().replace(Some(handle), None).ok();
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    /// Removes the tuple keyed by `key` (under the primary index's key
    /// extraction) from every index the space maintains in its current
    /// recovery mode.
    pub fn delete(&self, space_id: SpaceId, key: &[u8]) -> Result<Option<TupleHandle>> {
        let mode = self.recovery.replace_mode(space_id);
        let mut space = self
            .spaces
            .get_mut(&space_id)
            .ok_or(Error::SpaceNotFound(space_id))?;
        let Some(handle) = space.primary().get(key) else {
            return Ok(None);
        };
        space.primary_mut().replace(Some(&handle), None)?;
        if mode == ReplaceMode::AllKeys {
            let n = space.indexes().len();
            for i in 1..n {
                space.indexes_mut()[i].replace(Some(&handle), None)?;
            }
        }
        Ok(Some(handle))
    }

    /// Undoes a statement by swapping old/new across every index the
    /// statement touched. Must not be called while the space's primary
    /// index is still being built; doing so is a programming error and
    /// panics rather than returning an error.
    pub fn rollback_statement(
        &self,
        space_id: SpaceId,
        old: Option<&TupleHandle>,
        new: Option<&TupleHandle>,
    ) -> Result<()> {
        let mode = self.recovery.assert_rollback_allowed(space_id);
        let mut space = self
            .spaces
            .get_mut(&space_id)
            .ok_or(Error::SpaceNotFound(space_id))?;
        space.primary_mut().replace(new, old)?;
        if mode == ReplaceMode::AllKeys {
            let n = space.indexes().len();
            for i in 1..n {
                space.indexes_mut()[i].replace(new, old)?;
            }
        }
        Ok(())
    }

    // -- recovery ---------------------------------------------------------

    pub fn begin_initial_recovery(&self) -> Result<RecoveryState> {
        self.recovery.begin_initial_recovery()
    }

    pub fn begin_final_recovery(&self) -> Result<RecoveryState> {
        self.recovery.begin_final_recovery()
    }

    /// Bulk-builds every space's secondary indexes from its primary.
    /// Propagates a unique-index violation as a fatal error, matching
    /// the disaster-recovery discipline force_recovery is meant to
    /// bypass.
    pub fn end_recovery(&self) -> Result<()> {
        for space_id in self.recovery.space_ids() {
            if self.recovery.replace_mode(space_id) == ReplaceMode::AllKeys {
                continue;
            }
            self.build_secondaries(space_id)?;
            self.recovery.set_replace_mode(space_id, ReplaceMode::AllKeys);
        }
        self.recovery.end_recovery();
        self.sweep_inprogress_snapshots()?;
        Ok(())
    }

    fn build_secondaries(&self, space_id: SpaceId) -> Result<()> {
        let mut space = self
            .spaces
            .get_mut(&space_id)
            .ok_or(Error::SpaceNotFound(space_id))?;
        let handles = space.primary().iter_handles();
        let n = space.indexes().len();
        for i in 1..n {
            let idx = &mut space.indexes_mut()[i];
            for h in &handles {
                idx.replace(None, Some(h))?;
            }
        }
        Ok(())
    }

    pub fn bootstrap(&self) -> Result<()> {
        self.recovery.bootstrap()?;
        Ok(())
    }

    /// Replays every row of a previously written snapshot. Under
    /// `force_recovery`, a row that fails to apply is logged and
    /// skipped rather than aborting the scan.
    pub fn recover_from_snapshot(&self, path: impl AsRef<Path>) -> Result<u64> {
        let force_recovery = self.config.force_recovery();
        memtx_snapshot::recover_snapshot(
            path,
            force_recovery,
            |row: &SnapshotRow| self.apply_recovery_row(row),
            |_count| {},
        )
    }

    fn apply_recovery_row(&self, row: &SnapshotRow) -> Result<()> {
        if !self.spaces.contains_key(&row.space_id) {
            return Err(Error::CrossEngine {
                space_id: row.space_id,
            });
        }
        let format = OpaqueFormat::new(0);
        let handle = self
            .tuple_store
            .tuple_new(&format, &row.tuple, self.max_tuple_size())?;
        self.apply_insert(row.space_id, &handle)
    }

    fn sweep_inprogress_snapshots(&self) -> Result<()> {
        for entry in std::fs::read_dir(self.writer.dir())? {
            let entry = entry?;
            if entry.path().extension().and_then(|e| e.to_str()) == Some("inprogress") {
                let _ = std::fs::remove_file(entry.path());
            }
        }
        Ok(())
    }

    // -- checkpointing ------------------------------------------------------

    pub fn begin_checkpoint(&self) -> Result<()> {
        if self.writer.is_active() {
            return Err(Error::CheckpointInProgress);
        }
        self.allocator.bump_generation();
        self.allocator.set_delayed_free(true);

        let mut entries = Vec::new();
        for entry in self.spaces.iter() {
            let space = entry.value();
            if space.is_temporary() {
                continue;
            }
            entries.push(CheckpointEntry {
                space_id: space.id(),
                group_id: space.group_id(),
                iterator: space.primary().create_snapshot_iterator(),
            });
        }

        if let Err(e) = self.writer.begin(entries) {
            self.allocator.set_delayed_free(false);
            return Err(e);
        }
        self.gc.set_checkpoint_active(true);
        info!("checkpoint begun");
        Ok(())
    }

    pub async fn wait_checkpoint(&self, vclock: Vclock) -> Result<()> {
        self.writer.wait(vclock).await
    }

    pub fn commit_checkpoint(&self) -> Result<PathBuf> {
        let path = self.writer.commit()?;
        self.allocator.set_delayed_free(false);
        self.gc.set_checkpoint_active(false);
        self.gc.drain_to_free();
        self.gc.schedule(Box::new(ReclaimTask {
            allocator: self.allocator.clone(),
        }));
        Ok(path)
    }

    pub fn abort_checkpoint(&self) -> Result<()> {
        self.writer.abort()?;
        self.allocator.set_delayed_free(false);
        self.gc.set_checkpoint_active(false);
        self.gc.drain_to_free();
        self.gc.schedule(Box::new(ReclaimTask {
            allocator: self.allocator.clone(),
        }));
        Ok(())
    }

    pub fn collect_garbage(&self, keep_from: &Vclock) -> Result<()> {
        let keep_sig = keep_from.signature();
        for entry in std::fs::read_dir(self.writer.dir())? {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("snap") {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                if let Ok(sig) = stem.parse::<u64>() {
                    if sig < keep_sig {
                        let _ = std::fs::remove_file(&path);
                    }
                }
            }
        }
        Ok(())
    }

    pub fn backup(&self, vclock: &Vclock) -> Result<PathBuf> {
        let path = self.writer.dir().join(format!("{:020}.snap", vclock.signature()));
        if !path.exists() {
            return Err(Error::CorruptSnapshot(format!(
                "no snapshot file for vclock {vclock}"
            )));
        }
        Ok(path)
    }

    pub fn join(&self, vclock: &Vclock, sink: impl FnMut(SnapshotRow) -> Result<()>) -> Result<u64> {
        let path = self.backup(vclock)?;
        memtx_snapshot::join(path, sink)
    }

    pub fn memory_stat(&self) -> MemoryStat {
        MemoryStat {
            data: self.allocator.quota().used(),
            index: self.extent_pool.quota().used(),
        }
    }

    pub fn shutdown(&self) -> Result<()> {
        self.gc.cancel();
        if self.writer.is_active() {
            self.writer.abort()?;
        }
        Ok(())
    }
}
