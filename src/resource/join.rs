//! Join-handle adapter.
//!
//! Joining is modeled as a resource the child thread holds from creation
//! until it finishes: joiners wait on the child's join queue, so a
//! high-priority joiner donates its priority to the child — the child runs
//! at the joiner's priority until it completes, exactly like a lock holder.

use crate::sched::Scheduler;
use crate::types::{QueueId, ThreadId};

/// The join side of a child thread's lifecycle.
#[derive(Debug)]
pub struct JoinHandle {
    queue: QueueId,
    child: ThreadId,
}

impl JoinHandle {
    /// Creates the join queue for `child` and grants it to the child.
    pub fn new(sched: &mut Scheduler, child: ThreadId) -> Self {
        let queue = sched.create_queue(true);
        sched.acquire(queue, child);
        Self { queue, child }
    }

    /// Returns the child thread this handle joins on.
    #[must_use]
    pub const fn child(&self) -> ThreadId {
        self.child
    }

    /// Registers `waiter` as waiting for the child's completion, donating
    /// its priority to the child. The kernel blocks the waiter until
    /// [`JoinHandle::finish`] returns it.
    ///
    /// # Panics
    ///
    /// Panics on self-join, or if `waiter` already joined.
    pub fn join(&self, sched: &mut Scheduler, waiter: ThreadId) {
        assert!(
            waiter != self.child,
            "{waiter} attempted to join on itself"
        );
        sched.wait_for_access(self.queue, waiter);
    }

    /// Completes the join: drains every joiner (to be made ready by the
    /// kernel, highest priority first), releases all donations made to the
    /// child, and destroys the join queue.
    pub fn finish(self, sched: &mut Scheduler) -> Vec<ThreadId> {
        let mut woken = Vec::new();
        while let Some(thread) = sched.next_thread(self.queue) {
            woken.push(thread);
        }
        sched.destroy_queue(self.queue);
        woken
    }
}
