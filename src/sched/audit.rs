//! Consistency audit over the donation graph.
//!
//! The scheduler maintains its invariants incrementally, which is exactly
//! the kind of design that rots silently when one update site is missed.
//! [`check`] walks every live record and verifies the full invariant set:
//! cache coherence, bucket placement, ledger/donee symmetry, offer
//! freshness, and the holder/waiter exclusion.
//!
//! The audit is diagnostic. It never repairs anything, and the public
//! operations do not depend on it — they fail fast on their own
//! preconditions. Tests run it after every mutation; a kernel build can
//! run it behind a debug flag.

use crate::record::BestDonation;
use crate::sched::Scheduler;
use crate::types::{Priority, QueueId, ThreadId};
use thiserror::Error;

/// A violated scheduler invariant, as found by [`check`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuditError {
    /// The cached effective priority disagrees with a ledger rescan.
    #[error("cached effective priority of {thread} is {cached}, a ledger rescan gives {expected}")]
    StaleEffectivePriority {
        /// Thread with the stale cache.
        thread: ThreadId,
        /// The cached value.
        cached: Priority,
        /// The value a fresh rescan produces.
        expected: Priority,
    },

    /// The cached best donation disagrees with a ledger rescan.
    #[error("cached best donation of {thread} does not match a ledger rescan")]
    StaleBestDonation {
        /// Thread with the stale cache.
        thread: ThreadId,
    },

    /// A ledger entry references a thread as donor that does not list the
    /// owner as a donee.
    #[error("{donee} records an offer from {donor}, but {donor} does not list {donee} as a donee")]
    LedgerAsymmetry {
        /// The donating thread.
        donor: ThreadId,
        /// The thread holding the ledger entry.
        donee: ThreadId,
    },

    /// A donee reference has no matching ledger entry on the other side.
    #[error("{donor} lists {donee} as a donee, but {donee} has no offer from {donor}")]
    DoneeAsymmetry {
        /// The donating thread.
        donor: ThreadId,
        /// The referenced donee.
        donee: ThreadId,
    },

    /// A thread donated to itself.
    #[error("{thread} has a donation ledger entry from itself")]
    SelfDonation {
        /// The offending thread.
        thread: ThreadId,
    },

    /// A donation's origin queue does not transfer donation.
    #[error("{donee} holds an offer from {donor} through {queue}, which does not transfer donation")]
    OfferWithoutTransfer {
        /// The donating thread.
        donor: ThreadId,
        /// The thread holding the ledger entry.
        donee: ThreadId,
        /// The non-transferring origin queue.
        queue: QueueId,
    },

    /// A donation's origin queue is one the donor no longer waits on.
    #[error("offer from {donor} to {donee} originates from {queue}, which the donor no longer waits on")]
    AbandonedOrigin {
        /// The donating thread.
        donor: ThreadId,
        /// The thread holding the ledger entry.
        donee: ThreadId,
        /// The stale origin queue.
        queue: QueueId,
    },

    /// A live donation's recorded offer lags the donor's effective
    /// priority.
    #[error("offer from {donor} to {donee} is recorded as {recorded}, but the donor's effective priority is {actual}")]
    StaleOffer {
        /// The donating thread.
        donor: ThreadId,
        /// The receiving thread.
        donee: ThreadId,
        /// The ledger value.
        recorded: Priority,
        /// The donor's current effective priority.
        actual: Priority,
    },

    /// A donation is outstanding toward a thread the donor no longer waits
    /// for on any queue.
    #[error("{donor} still donates to {donee} but waits on no queue held by it")]
    OrphanDonation {
        /// The donating thread.
        donor: ThreadId,
        /// The no-longer-blocking donee.
        donee: ThreadId,
    },

    /// A thread's membership back-reference has no matching waiter entry,
    /// or the waiter sits in the wrong bucket.
    #[error("{thread} should wait in bucket {expected} of {queue}, found {found:?}")]
    MisplacedWaiter {
        /// The waiting thread.
        thread: ThreadId,
        /// The queue at fault.
        queue: QueueId,
        /// The bucket matching the thread's effective priority.
        expected: Priority,
        /// The bucket the thread was actually found in, if any.
        found: Option<Priority>,
    },

    /// A waiter appears in a queue without the thread-side back-reference.
    #[error("{thread} waits in {queue} without a membership back-reference")]
    UntrackedWaiter {
        /// The enqueued thread.
        thread: ThreadId,
        /// The queue holding it.
        queue: QueueId,
    },

    /// A thread appears more than once across a queue's buckets.
    #[error("{thread} appears {count} times in the buckets of {queue}")]
    DuplicateWaiter {
        /// The duplicated thread.
        thread: ThreadId,
        /// The queue at fault.
        queue: QueueId,
        /// Number of occurrences found.
        count: usize,
    },

    /// A queue's holder also waits in that queue's buckets.
    #[error("{thread} both holds {queue} and waits on it")]
    WaitingHolder {
        /// The double-booked thread.
        thread: ThreadId,
        /// The queue at fault.
        queue: QueueId,
    },

    /// A record references a retired or never-created thread.
    #[error("dangling thread handle {thread:?} referenced by {context}")]
    DanglingThread {
        /// The unresolvable handle.
        thread: ThreadId,
        /// Where the reference was found.
        context: &'static str,
    },

    /// A record references a destroyed or never-created queue.
    #[error("dangling queue handle {queue:?} referenced by {context}")]
    DanglingQueue {
        /// The unresolvable handle.
        queue: QueueId,
        /// Where the reference was found.
        context: &'static str,
    },
}

/// Verifies every scheduler invariant, returning the first violation.
///
/// Runs in time linear in the number of live records and their ledger and
/// bucket entries.
pub fn check(sched: &Scheduler) -> Result<(), AuditError> {
    check_threads(sched)?;
    check_queues(sched)
}

fn check_threads(sched: &Scheduler) -> Result<(), AuditError> {
    for record in sched.thread_records() {
        let thread = record.id;

        // Cache coherence: rescan the ledger the same way the scheduler
        // does and compare both the best pair and the effective priority.
        let mut expected_best: Option<BestDonation> = None;
        for entry in record.ledger() {
            let beats = expected_best.map_or(true, |b| entry.offer > b.offer);
            if beats {
                expected_best = Some(BestDonation {
                    donor: entry.donor,
                    offer: entry.offer,
                });
            }
        }
        if record.best_donation() != expected_best {
            return Err(AuditError::StaleBestDonation { thread });
        }
        let expected = expected_best.map_or(record.base_priority(), |b| {
            record.base_priority().max(b.offer)
        });
        if record.effective_priority() != expected {
            return Err(AuditError::StaleEffectivePriority {
                thread,
                cached: record.effective_priority(),
                expected,
            });
        }

        for entry in record.ledger() {
            if entry.donor == thread {
                return Err(AuditError::SelfDonation { thread });
            }
            let donor = sched
                .lookup_thread(entry.donor)
                .ok_or(AuditError::DanglingThread {
                    thread: entry.donor,
                    context: "donation ledger",
                })?;
            if !donor.donees().contains(&thread) {
                return Err(AuditError::LedgerAsymmetry {
                    donor: entry.donor,
                    donee: thread,
                });
            }
            let origin = sched
                .lookup_queue(entry.origin)
                .ok_or(AuditError::DanglingQueue {
                    queue: entry.origin,
                    context: "donation ledger origin",
                })?;
            if !origin.transfers_donation() {
                return Err(AuditError::OfferWithoutTransfer {
                    donor: entry.donor,
                    donee: thread,
                    queue: entry.origin,
                });
            }
            if !donor.is_member_of(entry.origin) {
                return Err(AuditError::AbandonedOrigin {
                    donor: entry.donor,
                    donee: thread,
                    queue: entry.origin,
                });
            }
            // While this thread still holds the origin queue, the recorded
            // offer must track the donor's effective priority.
            if origin.holder() == Some(thread) && entry.offer != donor.effective_priority() {
                return Err(AuditError::StaleOffer {
                    donor: entry.donor,
                    donee: thread,
                    recorded: entry.offer,
                    actual: donor.effective_priority(),
                });
            }
        }

        for &donee in record.donees() {
            let donee_record = sched
                .lookup_thread(donee)
                .ok_or(AuditError::DanglingThread {
                    thread: donee,
                    context: "donee set",
                })?;
            if !donee_record
                .ledger()
                .iter()
                .any(|entry| entry.donor == thread)
            {
                return Err(AuditError::DoneeAsymmetry {
                    donor: thread,
                    donee,
                });
            }
            let still_blocking = record.member_queues().iter().any(|&queue| {
                sched
                    .lookup_queue(queue)
                    .is_some_and(|q| q.holder() == Some(donee))
            });
            if !still_blocking {
                return Err(AuditError::OrphanDonation {
                    donor: thread,
                    donee,
                });
            }
        }

        for &queue in record.member_queues() {
            let queue_record = sched
                .lookup_queue(queue)
                .ok_or(AuditError::DanglingQueue {
                    queue,
                    context: "membership back-reference",
                })?;
            let expected = record.effective_priority();
            let found = queue_record.find_waiter(thread);
            if found != Some(expected) {
                return Err(AuditError::MisplacedWaiter {
                    thread,
                    queue,
                    expected,
                    found,
                });
            }
        }
    }
    Ok(())
}

fn check_queues(sched: &Scheduler) -> Result<(), AuditError> {
    for record in sched.queue_records() {
        let queue = record.id;

        if let Some(holder) = record.holder() {
            if sched.lookup_thread(holder).is_none() {
                return Err(AuditError::DanglingThread {
                    thread: holder,
                    context: "queue holder",
                });
            }
            if record.find_waiter(holder).is_some() {
                return Err(AuditError::WaitingHolder {
                    thread: holder,
                    queue,
                });
            }
        }

        for (_, thread) in record.waiters() {
            let count = record.waiters().filter(|&(_, t)| t == thread).count();
            if count > 1 {
                return Err(AuditError::DuplicateWaiter {
                    thread,
                    queue,
                    count,
                });
            }
            let waiter = sched
                .lookup_thread(thread)
                .ok_or(AuditError::DanglingThread {
                    thread,
                    context: "queue bucket",
                })?;
            if !waiter.is_member_of(queue) {
                return Err(AuditError::UntrackedWaiter { thread, queue });
            }
        }
    }
    Ok(())
}
