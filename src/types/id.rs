//! Identifier types for scheduler entities.
//!
//! Threads and wait queues reference each other freely (a thread waits on
//! several queues, donates to several holders; a queue tracks many
//! waiters). All of those references are typed handles wrapping arena
//! indices, never Rust references, so the graph has a single owner and no
//! lifetime cycles.

use crate::util::ArenaIndex;
use core::fmt;

/// A unique identifier for a schedulable thread's priority state.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ThreadId(pub(crate) ArenaIndex);

impl ThreadId {
    /// Creates a thread ID from an arena index (internal use).
    #[must_use]
    pub(crate) const fn from_arena(index: ArenaIndex) -> Self {
        Self(index)
    }

    /// Returns the underlying arena index (internal use).
    #[must_use]
    pub(crate) const fn arena_index(self) -> ArenaIndex {
        self.0
    }

    /// Creates a thread ID for testing purposes.
    #[doc(hidden)]
    #[must_use]
    pub const fn new_for_test(slot: u32, generation: u32) -> Self {
        Self(ArenaIndex::new(slot, generation))
    }
}

impl fmt::Debug for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ThreadId({}:{})", self.0.slot(), self.0.generation())
    }
}

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "T{}", self.0.slot())
    }
}

/// A unique identifier for a resource wait queue.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct QueueId(pub(crate) ArenaIndex);

impl QueueId {
    /// Creates a queue ID from an arena index (internal use).
    #[must_use]
    pub(crate) const fn from_arena(index: ArenaIndex) -> Self {
        Self(index)
    }

    /// Returns the underlying arena index (internal use).
    #[must_use]
    pub(crate) const fn arena_index(self) -> ArenaIndex {
        self.0
    }

    /// Creates a queue ID for testing purposes.
    #[doc(hidden)]
    #[must_use]
    pub const fn new_for_test(slot: u32, generation: u32) -> Self {
        Self(ArenaIndex::new(slot, generation))
    }
}

impl fmt::Debug for QueueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "QueueId({}:{})", self.0.slot(), self.0.generation())
    }
}

impl fmt::Display for QueueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Q{}", self.0.slot())
    }
}
