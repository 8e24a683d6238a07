//! CPU ready-queue adapter.
//!
//! The CPU is a resource like any other: the ready queue's holder is the
//! currently running thread, and ready threads are its waiters. Keeping
//! donation enabled means a thread that is merely *ready* already lends
//! its priority to whoever occupies the CPU, which closes the inversion
//! window between wakeup and dispatch.

use crate::sched::Scheduler;
use crate::types::{QueueId, ThreadId};

/// The CPU ready queue.
#[derive(Debug)]
pub struct ReadyQueue {
    queue: QueueId,
}

impl ReadyQueue {
    /// Creates the ready queue.
    pub fn new(sched: &mut Scheduler) -> Self {
        Self {
            queue: sched.create_queue(true),
        }
    }

    /// Puts the boot thread on the CPU. Called once at kernel startup.
    pub fn start(&self, sched: &mut Scheduler, boot: ThreadId) {
        sched.acquire(self.queue, boot);
        sched.set_running(boot);
    }

    /// Enqueues a thread that became runnable (woken by a lock release, a
    /// completed join, or creation).
    ///
    /// # Panics
    ///
    /// Panics if the thread is already ready or currently running.
    pub fn make_ready(&self, sched: &mut Scheduler, thread: ThreadId) {
        sched.wait_for_access(self.queue, thread);
    }

    /// Dispatches the next ready thread after the running thread blocked
    /// or finished. Returns the new running thread, or `None` if the CPU
    /// goes idle.
    pub fn schedule_next(&self, sched: &mut Scheduler) -> Option<ThreadId> {
        let next = sched.next_thread(self.queue)?;
        sched.set_running(next);
        Some(next)
    }

    /// Yields the CPU: dispatches the highest-priority ready thread and
    /// re-enqueues the previously running one. If nothing else is ready
    /// the current thread keeps the CPU.
    ///
    /// Returns the thread now running.
    ///
    /// # Panics
    ///
    /// Panics if no running thread is registered.
    pub fn yield_now(&self, sched: &mut Scheduler) -> ThreadId {
        let prev = sched
            .running()
            .unwrap_or_else(|| panic!("yield with no running thread registered"));
        match sched.next_thread(self.queue) {
            Some(next) => {
                sched.wait_for_access(self.queue, prev);
                sched.set_running(next);
                next
            }
            None => {
                // next_thread cleared the holder; the queue is empty, so
                // the previous thread takes the CPU back uncontended.
                sched.acquire(self.queue, prev);
                prev
            }
        }
    }

    /// Returns the thread the scheduler considers on the CPU.
    #[must_use]
    pub fn running(&self, sched: &Scheduler) -> Option<ThreadId> {
        sched.holder(self.queue)
    }
}
