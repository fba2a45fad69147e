use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::info;

use memtx_core::error::{Error, Result};
use memtx_core::ids::SpaceId;
use memtx_core::traits::ReplaceMode;

use crate::state::RecoveryState;

/// Drives the engine through `Initialized -> InitialRecovery ->
/// FinalRecovery -> Ok`, and tracks each space's current `ReplaceMode`.
///
/// This crate only owns the state transitions and per-space mode
/// bookkeeping; the actual index-building side effects (iterating
/// spaces, calling `end_build`/`build` on indexes) belong to the caller,
/// since concrete `Space`/`Index` types are out of this crate's scope.
pub struct RecoveryStateMachine {
    state: Mutex<RecoveryState>,
    force_recovery: bool,
    space_modes: DashMap<SpaceId, ReplaceMode>,
}

impl RecoveryStateMachine {
    pub fn new(force_recovery: bool) -> Self {
        Self {
            state: Mutex::new(RecoveryState::Initialized),
            force_recovery,
            space_modes: DashMap::new(),
        }
    }

    pub fn state(&self) -> RecoveryState {
        *self.state.lock()
    }

    pub fn force_recovery(&self) -> bool {
        self.force_recovery
    }

    /// Registers a space newly created during recovery or normal
    /// operation. Outside recovery, spaces come up directly in
    /// `AllKeys` mode.
    pub fn register_space(&self, space_id: SpaceId) {
        let mode = match self.state() {
            RecoveryState::Initialized | RecoveryState::InitialRecovery => {
                ReplaceMode::PrimaryOnly
            }
            RecoveryState::FinalRecovery => ReplaceMode::PrimaryOnly,
            RecoveryState::Ok => ReplaceMode::AllKeys,
        };
        self.space_modes.insert(space_id, mode);
    }

    pub fn replace_mode(&self, space_id: SpaceId) -> ReplaceMode {
        self.space_modes
            .get(&space_id)
            .map(|m| *m)
            .unwrap_or(ReplaceMode::AllKeys)
    }

    pub fn set_replace_mode(&self, space_id: SpaceId, mode: ReplaceMode) {
        self.space_modes.insert(space_id, mode);
    }

    pub fn space_ids(&self) -> Vec<SpaceId> {
        self.space_modes.iter().map(|e| *e.key()).collect()
    }

    /// From `Initialized`. Under `force_recovery`, jumps straight to
    /// `Ok` so duplicate rows surface immediately via unique secondaries
    /// rather than being silently accepted by a primary-only load.
    pub fn begin_initial_recovery(&self) -> Result<RecoveryState> {
        let mut state = self.state.lock();
        if *state != RecoveryState::Initialized {
            return Err(Error::InvalidRecoveryState(format!(
                "begin_initial_recovery called from {:?}",
                *state
            )));
        }
        *state = if self.force_recovery {
            RecoveryState::Ok
        } else {
            RecoveryState::InitialRecovery
        };
        if *state == RecoveryState::Ok {
            for mut entry in self.space_modes.iter_mut() {
                *entry.value_mut() = ReplaceMode::AllKeys;
            }
        }
        info!(state = ?*state, "entered initial recovery");
        Ok(*state)
    }

    /// Ends primary-key-only loading. Under `force_recovery` all
    /// secondaries are built immediately and the engine reaches `Ok`;
    /// otherwise the engine proceeds to `FinalRecovery` to replay the
    /// write-ahead log with only primaries maintained.
    pub fn begin_final_recovery(&self) -> Result<RecoveryState> {
        let mut state = self.state.lock();
        if *state != RecoveryState::InitialRecovery {
            return Err(Error::InvalidRecoveryState(format!(
                "begin_final_recovery called from {:?}",
                *state
            )));
        }
        *state = if self.force_recovery {
            RecoveryState::Ok
        } else {
            RecoveryState::FinalRecovery
        };
        if *state == RecoveryState::Ok {
            for mut entry in self.space_modes.iter_mut() {
                *entry.value_mut() = ReplaceMode::AllKeys;
            }
        }
        info!(state = ?*state, "entered final recovery");
        Ok(*state)
    }

    /// Bulk-builds all secondaries on every space and transitions to
    /// `Ok`, unless `force_recovery` already got there.
    pub fn end_recovery(&self) -> RecoveryState {
        let mut state = self.state.lock();
        if *state != RecoveryState::Ok {
            for mut entry in self.space_modes.iter_mut() {
                *entry.value_mut() = ReplaceMode::AllKeys;
            }
            *state = RecoveryState::Ok;
        }
        info!("recovery complete");
        *state
    }

    /// From `Initialized`, skips straight to `Ok` to replay the embedded
    /// bootstrap snapshot.
    pub fn bootstrap(&self) -> Result<RecoveryState> {
        let mut state = self.state.lock();
        if *state != RecoveryState::Initialized {
            return Err(Error::InvalidRecoveryState(format!(
                "bootstrap called from {:?}",
                *state
            )));
        }
        *state = RecoveryState::Ok;
        for mut entry in self.space_modes.iter_mut() {
            *entry.value_mut() = ReplaceMode::AllKeys;
        }
        Ok(*state)
    }

    /// Rollback of a statement must be infallible in every state except
    /// `BuildingPrimary`, where observing a transaction mid-snapshot-apply
    /// is a programming error. Panics in that case, matching the
    /// contract the caller must uphold.
    pub fn assert_rollback_allowed(&self, space_id: SpaceId) -> ReplaceMode {
        let mode = self.replace_mode(space_id);
        if mode == ReplaceMode::BuildingPrimary {
            panic!(
                "transaction rolled back during snapshot recovery of space {}",
                space_id
            );
        }
        mode
    }
}
