//! Cooperative garbage collection worker. Drains a queue of deferred
//! reclamation tasks (dropped indexes, delayed-free tuple sweeps),
//! yielding between units so the transactional task is never starved.

pub mod task;
pub mod worker;

pub use task::GcTask;
pub use worker::GcWorker;
