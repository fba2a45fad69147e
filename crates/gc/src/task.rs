/// A unit of deferred reclamation work (a dropped index, a delayed-free
/// tuple sweep). `run` performs one bounded step and reports whether the
/// task is finished; `free` is the finalizer invoked once it is safe to
/// release the task's resources.
pub trait GcTask: Send {
    /// Performs one step of work. Returns `true` once the task has
    /// nothing further to do.
    fn run(&mut self) -> bool;

    /// Releases the task's resources. Called once `run` has returned
    /// `true` and, if a checkpoint was in progress at that time, only
    /// after the checkpoint has committed or aborted.
    fn free(self: Box<Self>);

    /// A short label for logging.
    fn name(&self) -> &str {
        "gc-task"
    }
}
