//! Donos: priority-donation thread scheduler core for a cooperative kernel.
//!
//! # Overview
//!
//! Donos assigns CPU and resource access by priority and solves priority
//! inversion through transitive priority donation: a thread waiting on a
//! held resource lends its effective priority to the holder, and the loan
//! follows the chain of held resources until it reaches a thread that can
//! actually run. Donations are revoked incrementally as ownership moves —
//! there is no global recomputation pass anywhere.
//!
//! # Core Guarantees
//!
//! - **Inversion-free dispatch**: a resource holder always runs at least at
//!   the effective priority of its highest waiter (on donation-enabled
//!   queues)
//! - **Incremental maintenance**: every mutation touches only the ledger
//!   entries it affects plus the cascade a changed priority forces
//! - **Round-robin fairness**: FIFO order within a priority bucket
//! - **Fail-fast invariants**: a violated precondition panics; the
//!   scheduler never limps along on a corrupt donation graph
//! - **No unsafe, no interior mutability**: the `&mut Scheduler` borrow is
//!   the kernel's "preemption disabled" discipline
//!
//! # Module Structure
//!
//! - [`types`]: identifier handles and the validated priority band
//! - [`record`]: internal per-thread and per-queue records
//! - [`sched`]: the scheduler core and its invariant audit
//! - [`resource`]: lock / join / ready-queue adapters over the core
//! - [`util`]: the generational arena the records live in
//!
//! # Example
//!
//! ```
//! use donos::sched::Scheduler;
//! use donos::types::Priority;
//!
//! let mut sched = Scheduler::new();
//! let holder = sched.create_thread(); // default priority 1
//! let waiter = sched.create_thread_with_priority(Priority::MAX);
//!
//! let lock_queue = sched.create_queue(true);
//! sched.acquire(lock_queue, holder);
//! sched.wait_for_access(lock_queue, waiter);
//!
//! // The holder inherits the waiter's priority until it hands off.
//! assert_eq!(sched.effective_priority(holder), Priority::MAX);
//! assert_eq!(sched.next_thread(lock_queue), Some(waiter));
//! assert_eq!(sched.effective_priority(holder), Priority::DEFAULT);
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::doc_markdown)]

pub mod record;
pub mod resource;
pub mod sched;
#[cfg(feature = "test-internals")]
pub mod test_utils;
pub mod types;
pub mod util;

pub use resource::{JoinHandle, Lock, LockAcquire, ReadyQueue};
pub use sched::{AuditError, Scheduler};
pub use types::{Priority, QueueId, ThreadId, PRIORITY_LEVELS};
