//! Mutual-exclusion lock adapter.
//!
//! A lock is one donation-enabled wait queue plus the protocol around it:
//! uncontended acquires grant directly, contended acquires enqueue, and a
//! release hands the lock to the highest-priority waiter. The blocking
//! itself (parking the thread, switching away) is the surrounding kernel's
//! job; this adapter only keeps the scheduler's view of ownership correct,
//! which is what makes priority inheritance work.

use crate::sched::Scheduler;
use crate::types::{QueueId, ThreadId};

/// Outcome of a lock acquisition attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockAcquire {
    /// The lock was free; the caller owns it now.
    Acquired,
    /// The lock is held; the caller has been enqueued and must block until
    /// a release dispatches it.
    MustWait,
}

/// A priority-inheriting mutual-exclusion lock.
#[derive(Debug)]
pub struct Lock {
    queue: QueueId,
}

impl Lock {
    /// Creates a free lock.
    pub fn new(sched: &mut Scheduler) -> Self {
        Self {
            queue: sched.create_queue(true),
        }
    }

    /// Attempts to take the lock for `thread`.
    ///
    /// On [`LockAcquire::MustWait`] the thread is already registered as a
    /// waiter (and its priority donated to the holder); the kernel must
    /// block it until it is returned by a release.
    ///
    /// # Panics
    ///
    /// Panics if `thread` already holds or already waits on this lock.
    pub fn acquire(&self, sched: &mut Scheduler, thread: ThreadId) -> LockAcquire {
        if sched.holder(self.queue).is_none() {
            sched.acquire(self.queue, thread);
            LockAcquire::Acquired
        } else {
            sched.wait_for_access(self.queue, thread);
            LockAcquire::MustWait
        }
    }

    /// Releases the lock held by `thread`, handing it to the next waiter.
    ///
    /// Returns the new owner (which the kernel should make ready), or
    /// `None` if nobody was waiting and the lock is free again.
    ///
    /// # Panics
    ///
    /// Panics if `thread` does not hold the lock.
    pub fn release(&self, sched: &mut Scheduler, thread: ThreadId) -> Option<ThreadId> {
        assert!(
            sched.holder(self.queue) == Some(thread),
            "{thread} released a lock it does not hold"
        );
        sched.next_thread(self.queue)
    }

    /// Returns the current owner, if any.
    #[must_use]
    pub fn holder(&self, sched: &Scheduler) -> Option<ThreadId> {
        sched.holder(self.queue)
    }

    /// Destroys the lock.
    ///
    /// # Panics
    ///
    /// Panics if the lock is held or has waiters.
    pub fn destroy(self, sched: &mut Scheduler) {
        sched.destroy_queue(self.queue);
    }
}
