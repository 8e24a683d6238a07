//! The priority-donation scheduler core.
//!
//! [`Scheduler`] owns every thread and queue record and is the only place
//! cross-record logic lives. The donation graph (who donates to whom, who
//! waits where) is maintained incrementally: each mutation touches only the
//! ledger entries it directly affects, plus whatever cascade a changed
//! effective priority forces through the chain of held resources. There is
//! no global recomputation pass.
//!
//! # Concurrency model
//!
//! The surrounding kernel serializes every call — the `&mut self` receiver
//! is the "preemption disabled" discipline. No operation blocks, and every
//! operation completes in time bounded by the number of priority levels
//! plus the ledger entries a cascade touches.
//!
//! # Failure semantics
//!
//! The core is kernel infrastructure: a violated precondition or invariant
//! (double-enqueue, revoking an absent donation, stale handle, inconsistent
//! ledger) is a bug in the scheduler or its caller, never an environmental
//! failure. All such violations panic; nothing is retried or recovered.

use crate::record::{QueueRecord, ThreadRecord};
use crate::types::{Priority, QueueId, ThreadId};
use crate::util::Arena;
use smallvec::SmallVec;
use tracing::{debug, trace};

/// The scheduler core: arenas of thread and queue records plus the
/// running-thread register.
#[derive(Debug, Default)]
pub struct Scheduler {
    threads: Arena<ThreadRecord>,
    queues: Arena<QueueRecord>,
    /// The thread currently on the CPU, as reported by the kernel via
    /// [`Scheduler::set_running`]. Consulted by the relative priority
    /// operations.
    running: Option<ThreadId>,
}

impl Scheduler {
    /// Creates an empty scheduler.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Creates a thread record at the default priority.
    pub fn create_thread(&mut self) -> ThreadId {
        self.create_thread_with_priority(Priority::DEFAULT)
    }

    /// Creates a thread record at the given base priority.
    pub fn create_thread_with_priority(&mut self, priority: Priority) -> ThreadId {
        let index = self
            .threads
            .insert_with(|idx| ThreadRecord::new(ThreadId::from_arena(idx), priority));
        let id = ThreadId::from_arena(index);
        debug!(thread = %id, %priority, "thread created");
        id
    }

    /// Retires a terminated thread's record.
    ///
    /// # Panics
    ///
    /// Panics if the thread still has ledger entries, outstanding
    /// donations, queue memberships, or holds any queue — a thread must be
    /// fully disentangled from the donation graph before it terminates.
    pub fn retire_thread(&mut self, thread: ThreadId) {
        assert!(
            self.thread(thread).is_quiescent(),
            "retiring {thread} with live donation state or queue memberships"
        );
        for (_, queue) in self.queues.iter() {
            assert!(
                queue.holder() != Some(thread),
                "retiring {thread} while it holds {}",
                queue.id
            );
        }
        if self.running == Some(thread) {
            self.running = None;
        }
        self.threads.remove(thread.arena_index());
        debug!(thread = %thread, "thread retired");
    }

    /// Creates a wait queue. `transfer_donation` is fixed for the queue's
    /// lifetime: true for resources whose holder should inherit waiter
    /// priority (locks, joins, the ready queue), false otherwise.
    pub fn create_queue(&mut self, transfer_donation: bool) -> QueueId {
        let index = self
            .queues
            .insert_with(|idx| QueueRecord::new(QueueId::from_arena(idx), transfer_donation));
        let id = QueueId::from_arena(index);
        debug!(queue = %id, transfer_donation, "queue created");
        id
    }

    /// Destroys a queue along with its resource.
    ///
    /// # Panics
    ///
    /// Panics if the queue still has waiters or a holder.
    pub fn destroy_queue(&mut self, queue: QueueId) {
        let record = self.queue(queue);
        assert!(
            !record.has_waiters(),
            "destroying {queue} with waiters enqueued"
        );
        assert!(
            record.holder().is_none(),
            "destroying {queue} while it is held"
        );
        self.queues.remove(queue.arena_index());
        debug!(queue = %queue, "queue destroyed");
    }

    // ========================================================================
    // Priority accessors
    // ========================================================================

    /// Returns the thread's base priority.
    #[must_use]
    pub fn priority(&self, thread: ThreadId) -> Priority {
        self.thread(thread).base_priority()
    }

    /// Returns the thread's effective priority (base, or the best
    /// outstanding donation if higher). Reads the cache; never rescans.
    #[must_use]
    pub fn effective_priority(&self, thread: ThreadId) -> Priority {
        self.thread(thread).effective_priority()
    }

    /// Returns the donor currently backing the thread's effective
    /// priority, if any donation is outstanding.
    #[must_use]
    pub fn best_donor(&self, thread: ThreadId) -> Option<ThreadId> {
        self.thread(thread).best_donation().map(|best| best.donor)
    }

    /// Sets the thread's base priority. No-op if unchanged.
    ///
    /// Only the thread itself (or kernel bootstrap code) may call this for
    /// a given thread; holding `&mut Scheduler` inside the kernel's
    /// exclusion discipline is that privilege.
    pub fn set_priority(&mut self, thread: ThreadId, priority: Priority) {
        let record = self.thread_mut(thread);
        if record.base_priority() == priority {
            return;
        }
        let before = record.effective_priority();
        record.set_base_priority(priority);
        let after = record.effective_priority();
        trace!(thread = %thread, %priority, %before, %after, "base priority set");
        if before != after {
            self.relocate_waiter(thread, before, after);
            self.propagate_donations(thread);
        }
    }

    /// Raises the running thread's base priority by one level.
    ///
    /// Returns false (and changes nothing) at [`Priority::MAX`].
    ///
    /// # Panics
    ///
    /// Panics if no running thread has been registered.
    pub fn increase_priority(&mut self) -> bool {
        let thread = self.running_thread();
        match self.priority(thread).successor() {
            Some(next) => {
                self.set_priority(thread, next);
                true
            }
            None => false,
        }
    }

    /// Lowers the running thread's base priority by one level.
    ///
    /// Returns false (and changes nothing) at [`Priority::MIN`].
    ///
    /// # Panics
    ///
    /// Panics if no running thread has been registered.
    pub fn decrease_priority(&mut self) -> bool {
        let thread = self.running_thread();
        match self.priority(thread).predecessor() {
            Some(next) => {
                self.set_priority(thread, next);
                true
            }
            None => false,
        }
    }

    /// Registers the thread currently on the CPU. Called by the kernel at
    /// every context switch.
    pub fn set_running(&mut self, thread: ThreadId) {
        let _ = self.thread(thread);
        self.running = Some(thread);
    }

    /// Returns the registered running thread, if any.
    #[must_use]
    pub const fn running(&self) -> Option<ThreadId> {
        self.running
    }

    // ========================================================================
    // Queue operations
    // ========================================================================

    /// Enqueues `thread` as a waiter on `queue`.
    ///
    /// If the queue has a holder and transfers donation, the waiter's
    /// effective priority is offered to the holder before the waiter is
    /// placed in the bucket matching its effective priority.
    ///
    /// # Panics
    ///
    /// Panics if the thread already waits on this queue or currently holds
    /// it.
    pub fn wait_for_access(&mut self, queue: QueueId, thread: ThreadId) {
        assert!(
            self.queue(queue).holder() != Some(thread),
            "{thread} cannot wait on {queue} while holding it"
        );
        assert!(
            self.thread_mut(thread).join_queue(queue),
            "{thread} is already waiting on {queue}"
        );
        trace!(thread = %thread, queue = %queue, "wait for access");
        self.offer_donation(thread, queue);
        let level = self.thread(thread).effective_priority();
        self.queue_mut(queue).push_waiter(level, thread);
    }

    /// Grants `thread` the resource behind `queue` without contention.
    ///
    /// Used for initial grants only (a freshly created lock, a join queue
    /// bound to its child, the boot thread taking the CPU).
    ///
    /// # Panics
    ///
    /// Panics if the queue already has waiters; a contended handoff must go
    /// through [`Scheduler::next_thread`].
    pub fn acquire(&mut self, queue: QueueId, thread: ThreadId) {
        let _ = self.thread(thread);
        let record = self.queue_mut(queue);
        assert!(
            !record.has_waiters(),
            "uncontended acquire of {queue} with waiters enqueued"
        );
        record.set_holder(Some(thread));
        debug!(queue = %queue, thread = %thread, "acquired");
    }

    /// Returns the thread [`Scheduler::next_thread`] would dispatch,
    /// without mutating anything.
    #[must_use]
    pub fn peek_next(&self, queue: QueueId) -> Option<ThreadId> {
        self.queue(queue).peek_next()
    }

    /// Dispatches the next waiter from `queue` and makes it the holder.
    ///
    /// Picks the longest-waiting thread in the highest non-empty bucket.
    /// Before the handoff, every donation the departing holder received is
    /// re-examined: it is revoked unless its donor still waits on some
    /// *other* queue held by that thread. After the handoff, waiters that
    /// had donated to the old holder are re-run through the donation check
    /// so the new holder inherits their priority where due.
    ///
    /// Returns `None` — and clears the holder — if no thread is waiting.
    pub fn next_thread(&mut self, queue: QueueId) -> Option<ThreadId> {
        let Some(level) = self.queue(queue).highest_occupied() else {
            self.queue_mut(queue).set_holder(None);
            debug!(queue = %queue, "queue empty; holder cleared");
            return None;
        };
        let next = self
            .queue(queue)
            .peek_next()
            .expect("occupied bucket has a head");
        let old_holder = self.queue(queue).holder();

        // Snapshot the departing holder's donors before revocation starts
        // mutating the ledger underneath us.
        let mut former_donors: SmallVec<[ThreadId; 4]> = SmallVec::new();
        if let Some(holder) = old_holder {
            if holder != next {
                former_donors.extend(self.thread(holder).ledger().iter().map(|e| e.donor));
                for &donor in &former_donors {
                    let justification = self
                        .thread(donor)
                        .member_queues()
                        .iter()
                        .copied()
                        .find(|&other| other != queue && self.queue(other).holder() == Some(holder));
                    match justification {
                        Some(other) => {
                            trace!(
                                donor = %donor,
                                holder = %holder,
                                through = %other,
                                "donation kept: donor still waits on another queue held by the old holder"
                            );
                            if donor == next {
                                // The dispatched thread leaves this queue
                                // but keeps the donation; its ledger entry
                                // must name a queue it still waits on.
                                assert!(
                                    self.thread_mut(holder).retarget_offer(donor, other),
                                    "kept donation {donor} -> {holder} vanished during handoff"
                                );
                            }
                        }
                        None => self.revoke_donation(holder, donor),
                    }
                }
            }
        }

        let popped = self.queue_mut(queue).pop_waiter(level);
        assert_eq!(
            popped,
            Some(next),
            "dispatch head of {queue} changed during revocation"
        );
        assert!(
            self.thread_mut(next).leave_queue(queue),
            "{next} was dispatched from {queue} without a membership record"
        );
        self.queue_mut(queue).set_holder(Some(next));
        debug!(queue = %queue, thread = %next, %level, "dispatched new holder");

        // Waiters that donated to the old holder may now owe the new one.
        for &donor in &former_donors {
            if self.thread(donor).is_member_of(queue) {
                self.offer_donation(donor, queue);
            }
        }
        Some(next)
    }

    /// Returns the current holder of `queue`, if any.
    #[must_use]
    pub fn holder(&self, queue: QueueId) -> Option<ThreadId> {
        self.queue(queue).holder()
    }

    /// Returns true if `thread` is enqueued as a waiter on `queue`.
    #[must_use]
    pub fn is_waiting(&self, queue: QueueId, thread: ThreadId) -> bool {
        self.thread(thread).is_member_of(queue)
    }

    /// Returns the number of waiters enqueued on `queue`.
    #[must_use]
    pub fn waiter_count(&self, queue: QueueId) -> usize {
        self.queue(queue).waiter_count()
    }

    // ========================================================================
    // Donation machinery
    // ========================================================================

    /// Donation check for a waiter on `queue`: if the queue transfers
    /// donation and is held by someone else, offer the waiter's effective
    /// priority to the holder. Used on enqueue and again on every handoff.
    fn offer_donation(&mut self, donor: ThreadId, queue: QueueId) {
        let record = self.queue(queue);
        if !record.transfers_donation() {
            return;
        }
        let Some(holder) = record.holder() else {
            return;
        };
        if holder == donor {
            return;
        }
        self.thread_mut(donor).add_donee(holder);
        let offer = self.thread(donor).effective_priority();
        trace!(donor = %donor, donee = %holder, %offer, queue = %queue, "donation offered");
        self.receive_offer(holder, offer, donor, queue);
    }

    /// Registers (or refreshes) a donation in the donee's ledger and
    /// rescans if the cached best can no longer be trusted.
    fn receive_offer(&mut self, donee: ThreadId, offer: Priority, donor: ThreadId, origin: QueueId) {
        assert!(donee != donor, "{donor} attempted to donate to itself");
        let stale = self.thread_mut(donee).upsert_offer(donor, offer, origin);
        if stale {
            self.recompute_effective(donee);
        }
    }

    /// Removes the donation from `donor` out of `donee`'s ledger, in both
    /// directions, and rescans if the donor backed the cached best.
    fn revoke_donation(&mut self, donee: ThreadId, donor: ThreadId) {
        debug!(donor = %donor, donee = %donee, "donation revoked");
        assert!(
            self.thread_mut(donee).remove_offer(donor).is_some(),
            "revoking absent donation {donor} -> {donee}"
        );
        assert!(
            self.thread_mut(donor).remove_donee(donee),
            "ledger asymmetry: {donee} recorded an offer from {donor}, which does not list it"
        );
        if self.thread(donee).best_donation().map(|best| best.donor) == Some(donor) {
            self.recompute_effective(donee);
        }
    }

    /// Rebuilds the cached best donation from the ledger. If the effective
    /// priority moved, the thread is relocated on every queue it waits on
    /// and the change is propagated to its donees.
    fn recompute_effective(&mut self, thread: ThreadId) {
        let record = self.thread_mut(thread);
        let before = record.effective_priority();
        record.rescan_best();
        let after = record.effective_priority();
        if before == after {
            return;
        }
        debug!(thread = %thread, %before, %after, "effective priority changed");
        self.relocate_waiter(thread, before, after);
        self.propagate_donations(thread);
    }

    /// Moves the thread from bucket `before` to bucket `after` on every
    /// queue it waits on. Relocation appends: the thread goes to the back
    /// of its new bucket.
    fn relocate_waiter(&mut self, thread: ThreadId, before: Priority, after: Priority) {
        let queues: SmallVec<[QueueId; 2]> = self.thread(thread).member_queues().into();
        for &queue in &queues {
            let record = self.queue_mut(queue);
            assert!(
                record.remove_waiter(before, thread),
                "{thread} was not in bucket {before} of {queue} during relocation"
            );
            record.push_waiter(after, thread);
        }
    }

    /// Pushes the thread's current effective priority to every donee it is
    /// still waiting for, refreshing those ledgers in turn. The cascade
    /// bottoms out when an offer no longer changes a donee's best.
    fn propagate_donations(&mut self, thread: ThreadId) {
        let queues: SmallVec<[QueueId; 2]> = self.thread(thread).member_queues().into();
        let donees: SmallVec<[ThreadId; 2]> = self.thread(thread).donees().into();
        for &queue in &queues {
            let record = self.queue(queue);
            if !record.transfers_donation() {
                continue;
            }
            let Some(holder) = record.holder() else {
                continue;
            };
            for &donee in &donees {
                if holder == donee {
                    let offer = self.thread(thread).effective_priority();
                    self.receive_offer(donee, offer, thread, queue);
                }
            }
        }
    }

    // ========================================================================
    // Record access
    // ========================================================================

    fn thread(&self, id: ThreadId) -> &ThreadRecord {
        self.threads
            .get(id.arena_index())
            .unwrap_or_else(|| panic!("stale thread handle {id:?}"))
    }

    fn thread_mut(&mut self, id: ThreadId) -> &mut ThreadRecord {
        self.threads
            .get_mut(id.arena_index())
            .unwrap_or_else(|| panic!("stale thread handle {id:?}"))
    }

    fn queue(&self, id: QueueId) -> &QueueRecord {
        self.queues
            .get(id.arena_index())
            .unwrap_or_else(|| panic!("stale queue handle {id:?}"))
    }

    fn queue_mut(&mut self, id: QueueId) -> &mut QueueRecord {
        self.queues
            .get_mut(id.arena_index())
            .unwrap_or_else(|| panic!("stale queue handle {id:?}"))
    }

    fn running_thread(&self) -> ThreadId {
        self.running
            .unwrap_or_else(|| panic!("no running thread registered with the scheduler"))
    }

    pub(crate) fn thread_records(&self) -> impl Iterator<Item = &ThreadRecord> {
        self.threads.iter().map(|(_, record)| record)
    }

    pub(crate) fn queue_records(&self) -> impl Iterator<Item = &QueueRecord> {
        self.queues.iter().map(|(_, record)| record)
    }

    pub(crate) fn lookup_thread(&self, id: ThreadId) -> Option<&ThreadRecord> {
        self.threads.get(id.arena_index())
    }

    pub(crate) fn lookup_queue(&self, id: QueueId) -> Option<&QueueRecord> {
        self.queues.get(id.arena_index())
    }
}
