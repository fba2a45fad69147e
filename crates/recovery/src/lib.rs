//! Recovery state machine: `Initialized -> InitialRecovery ->
//! FinalRecovery -> Ok`, gating which indexes each space maintains
//! during snapshot and write-ahead-log replay.

pub mod machine;
pub mod state;

pub use machine::RecoveryStateMachine;
pub use state::RecoveryState;
