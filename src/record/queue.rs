//! Per-resource wait queue.
//!
//! One record per shared resource (lock, join pairing, the CPU ready
//! queue). Waiters sit in one FIFO bucket per priority level; dispatch
//! scans from the highest bucket down and pops the longest-waiting thread,
//! which yields round-robin rotation among equal-priority waiters.
//!
//! Whether waiting here donates priority to the holder is fixed when the
//! queue is created and never changes for the queue's lifetime.

use crate::types::{Priority, QueueId, ThreadId, PRIORITY_LEVELS};
use std::collections::VecDeque;

/// Internal record for one resource wait queue.
#[derive(Debug)]
pub struct QueueRecord {
    /// Unique identifier for this queue.
    pub id: QueueId,
    /// Whether waiting here donates priority to the holder.
    transfer_donation: bool,
    /// The thread currently granted the resource, if any.
    holder: Option<ThreadId>,
    /// One FIFO list per priority level.
    buckets: [VecDeque<ThreadId>; PRIORITY_LEVELS],
}

impl QueueRecord {
    /// Creates an empty queue with the donation flag fixed.
    #[must_use]
    pub fn new(id: QueueId, transfer_donation: bool) -> Self {
        Self {
            id,
            transfer_donation,
            holder: None,
            buckets: core::array::from_fn(|_| VecDeque::new()),
        }
    }

    /// Returns whether waiting here donates priority to the holder.
    #[must_use]
    pub const fn transfers_donation(&self) -> bool {
        self.transfer_donation
    }

    /// Returns the current holder, if any.
    #[must_use]
    pub const fn holder(&self) -> Option<ThreadId> {
        self.holder
    }

    /// Replaces the holder.
    pub fn set_holder(&mut self, holder: Option<ThreadId>) {
        self.holder = holder;
    }

    /// Appends `thread` to the bucket for `level`.
    pub fn push_waiter(&mut self, level: Priority, thread: ThreadId) {
        self.buckets[level.index()].push_back(thread);
    }

    /// Removes `thread` from the bucket for `level`.
    ///
    /// Returns false if the thread was not there — the caller treats that
    /// as a bucket-placement invariant failure.
    pub fn remove_waiter(&mut self, level: Priority, thread: ThreadId) -> bool {
        let bucket = &mut self.buckets[level.index()];
        match bucket.iter().position(|&t| t == thread) {
            Some(position) => {
                bucket.remove(position);
                true
            }
            None => false,
        }
    }

    /// Pops the head of the bucket for `level`.
    pub fn pop_waiter(&mut self, level: Priority) -> Option<ThreadId> {
        self.buckets[level.index()].pop_front()
    }

    /// Returns the highest priority level with at least one waiter.
    #[must_use]
    pub fn highest_occupied(&self) -> Option<Priority> {
        Priority::descending().find(|level| !self.buckets[level.index()].is_empty())
    }

    /// Returns the thread the next dispatch would pick, without removing
    /// it: the head of the highest non-empty bucket.
    #[must_use]
    pub fn peek_next(&self) -> Option<ThreadId> {
        let level = self.highest_occupied()?;
        self.buckets[level.index()].front().copied()
    }

    /// Returns true if any bucket holds a waiter.
    #[must_use]
    pub fn has_waiters(&self) -> bool {
        self.buckets.iter().any(|bucket| !bucket.is_empty())
    }

    /// Returns the total number of waiters across all buckets.
    #[must_use]
    pub fn waiter_count(&self) -> usize {
        self.buckets.iter().map(VecDeque::len).sum()
    }

    /// Returns the bucket level `thread` currently sits in, if any.
    ///
    /// Full scan; used by the audit and by debug assertions, not by
    /// dispatch.
    #[must_use]
    pub fn find_waiter(&self, thread: ThreadId) -> Option<Priority> {
        Priority::descending().find(|level| self.buckets[level.index()].contains(&thread))
    }

    /// Iterates `(level, thread)` over every waiter, highest bucket first,
    /// FIFO within a bucket.
    pub fn waiters(&self) -> impl Iterator<Item = (Priority, ThreadId)> + '_ {
        Priority::descending().flat_map(move |level| {
            self.buckets[level.index()]
                .iter()
                .map(move |&thread| (level, thread))
        })
    }
}
