use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use crate::task::GcTask;

/// Cooperative garbage collector. Owns a pending-work queue and a
/// deferred-finalization queue for tasks whose step completed while a
/// checkpoint was capturing a consistent read view that might still
/// reference the memory those tasks would otherwise release.
pub struct GcWorker {
    gc_queue: Mutex<VecDeque<Box<dyn GcTask>>>,
    gc_to_free: Mutex<VecDeque<Box<dyn GcTask>>>,
    checkpoint_active: AtomicBool,
    cancelled: AtomicBool,
    notify: Notify,
}

impl GcWorker {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            gc_queue: Mutex::new(VecDeque::new()),
            gc_to_free: Mutex::new(VecDeque::new()),
            checkpoint_active: AtomicBool::new(false),
            cancelled: AtomicBool::new(false),
            notify: Notify::new(),
        })
    }

    /// Appends a task and wakes the worker if it is idle.
    pub fn schedule(&self, task: Box<dyn GcTask>) {
        self.gc_queue.lock().push_back(task);
        self.notify.notify_one();
    }

    pub fn set_checkpoint_active(&self, active: bool) {
        self.checkpoint_active.store(active, Ordering::Release);
    }

    pub fn pending_count(&self) -> usize {
        self.gc_queue.lock().len()
    }

    pub fn deferred_count(&self) -> usize {
        self.gc_to_free.lock().len()
    }

    /// Runs exactly one step on the head task, if any. Returns whether a
    /// step was run (used by both the background loop and by allocator
    /// retry paths that want a synchronous "make one attempt at
    /// progress" call).
    pub fn run_step(&self) -> bool {
        let mut queue = self.gc_queue.lock();
        let Some(task) = queue.front_mut() else {
            return false;
        };
        let done = task.run();
        if !done {
            return true;
        }
        let task = queue.pop_front().unwrap();
        drop(queue);
        if self.checkpoint_active.load(Ordering::Acquire) {
            trace!(task = task.name(), "gc task done, deferring free until checkpoint ends");
            self.gc_to_free.lock().push_back(task);
        } else {
            trace!(task = task.name(), "gc task done, freeing");
            task.free();
        }
        true
    }

    /// Drains deferred finalizers. Called on checkpoint commit and abort.
    pub fn drain_to_free(&self) {
        let mut to_free = self.gc_to_free.lock();
        let drained = to_free.len();
        while let Some(task) = to_free.pop_front() {
            task.free();
        }
        if drained > 0 {
            debug!(count = drained, "drained deferred gc finalizers");
        }
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
        self.notify.notify_one();
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Spawns the cooperative worker loop as a tokio task: run one step,
    /// yield once, and suspend indefinitely (until woken by `schedule`
    /// or `cancel`) when the queue is empty.
    pub fn spawn(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                if self.is_cancelled() {
                    break;
                }
                if self.pending_count() == 0 {
                    self.notify.notified().await;
                    continue;
                }
                self.run_step();
                tokio::task::yield_now().await;
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    struct CountingTask {
        steps_remaining: usize,
        freed: Arc<AtomicUsize>,
    }

    impl GcTask for CountingTask {
        fn run(&mut self) -> bool {
            if self.steps_remaining == 0 {
                return true;
            }
            self.steps_remaining -= 1;
            self.steps_remaining == 0
        }

        fn free(self: Box<Self>) {
            self.freed.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn runs_to_completion_and_frees() {
        let worker = GcWorker::new();
        let freed = Arc::new(AtomicUsize::new(0));
        worker.schedule(Box::new(CountingTask {
            steps_remaining: 2,
            freed: freed.clone(),
        }));
        assert!(worker.run_step());
        assert_eq!(freed.load(Ordering::SeqCst), 0);
        assert!(worker.run_step());
        assert_eq!(freed.load(Ordering::SeqCst), 1);
        assert!(!worker.run_step());
    }

    #[test]
    fn defers_free_during_checkpoint() {
        let worker = GcWorker::new();
        let freed = Arc::new(AtomicUsize::new(0));
        worker.set_checkpoint_active(true);
        worker.schedule(Box::new(CountingTask {
            steps_remaining: 1,
            freed: freed.clone(),
        }));
        worker.run_step();
        assert_eq!(freed.load(Ordering::SeqCst), 0);
        assert_eq!(worker.deferred_count(), 1);
        worker.drain_to_free();
        assert_eq!(freed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn background_loop_drains_queue() {
        let worker = GcWorker::new();
        let freed = Arc::new(AtomicUsize::new(0));
        worker.schedule(Box::new(CountingTask {
            steps_remaining: 1,
            freed: freed.clone(),
        }));
        let handle = worker.clone().spawn();
        for _ in 0..50 {
            if freed.load(Ordering::SeqCst) == 1 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert_eq!(freed.load(Ordering::SeqCst), 1);
        worker.cancel();
        let _ = handle.await;
    }
}
