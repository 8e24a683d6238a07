//! End-to-end donation scenarios.
//!
//! Each test drives the scheduler through a resource-contention story and
//! checks the observable dispatch behavior plus, after every step, the
//! full invariant audit. The scenarios mirror the situations priority
//! inheritance exists for: inversion through one lock, inversion through a
//! chain of locks, donors waiting on several resources held by the same
//! thread, and the CPU ready queue itself.

mod common;

use common::init_test_logging;
use donos::sched::audit;
use donos::types::Priority;
use donos::{JoinHandle, Lock, LockAcquire, ReadyQueue, Scheduler};

fn init_test(name: &str) {
    init_test_logging();
    donos::test_phase!(name);
}

fn prio(level: u8) -> Priority {
    Priority::new(level).expect("level in band")
}

/// Audit the scheduler, panicking with the violation on failure.
fn audited(sched: &Scheduler) {
    if let Err(violation) = audit::check(sched) {
        panic!("audit failed: {violation}");
    }
}

// ============================================================================
// Single-resource inversion
// ============================================================================

#[test]
fn holder_runs_at_waiter_priority_until_handoff() {
    init_test("holder_runs_at_waiter_priority_until_handoff");
    let mut sched = Scheduler::new();
    let holder = sched.create_thread_with_priority(prio(1));
    let waiter = sched.create_thread_with_priority(prio(6));
    let q = sched.create_queue(true);

    sched.acquire(q, holder);
    audited(&sched);

    sched.wait_for_access(q, waiter);
    audited(&sched);
    assert_eq!(sched.effective_priority(holder), prio(6));
    assert_eq!(sched.best_donor(holder), Some(waiter));

    assert_eq!(sched.next_thread(q), Some(waiter));
    audited(&sched);
    assert_eq!(sched.effective_priority(holder), prio(1));
    assert_eq!(sched.best_donor(holder), None);

    // The vacated holder re-enters contention at its own base priority.
    let q2 = sched.create_queue(true);
    sched.wait_for_access(q2, holder);
    audited(&sched);
    assert_eq!(sched.peek_next(q2), Some(holder));
    assert_eq!(sched.next_thread(q2), Some(holder));

    donos::test_complete!("holder_runs_at_waiter_priority_until_handoff");
}

#[test]
fn fifo_within_a_bucket_is_round_robin() {
    init_test("fifo_within_a_bucket_is_round_robin");
    let mut sched = Scheduler::new();
    let t1 = sched.create_thread_with_priority(prio(3));
    let t2 = sched.create_thread_with_priority(prio(3));
    let q = sched.create_queue(true);

    sched.wait_for_access(q, t1);
    sched.wait_for_access(q, t2);
    audited(&sched);

    assert_eq!(sched.next_thread(q), Some(t1));
    audited(&sched);
    assert_eq!(sched.next_thread(q), Some(t2));
    audited(&sched);
    assert_eq!(sched.next_thread(q), None);
    donos::test_complete!("fifo_within_a_bucket_is_round_robin");
}

#[test]
fn higher_bucket_always_dispatches_first() {
    init_test("higher_bucket_always_dispatches_first");
    let mut sched = Scheduler::new();
    let low = sched.create_thread_with_priority(prio(2));
    let mid = sched.create_thread_with_priority(prio(4));
    let high = sched.create_thread_with_priority(prio(5));
    let q = sched.create_queue(true);

    sched.wait_for_access(q, low);
    sched.wait_for_access(q, high);
    sched.wait_for_access(q, mid);
    audited(&sched);

    assert_eq!(sched.next_thread(q), Some(high));
    assert_eq!(sched.next_thread(q), Some(mid));
    assert_eq!(sched.next_thread(q), Some(low));
    donos::test_complete!("higher_bucket_always_dispatches_first");
}

// ============================================================================
// Transitive donation
// ============================================================================

#[test]
fn donation_crosses_a_chain_of_held_resources() {
    init_test("donation_crosses_a_chain_of_held_resources");
    let mut sched = Scheduler::new();

    // c holds r2; b holds r1 and waits on r2; a waits on r1.
    let a = sched.create_thread_with_priority(prio(7));
    let b = sched.create_thread_with_priority(prio(1));
    let c = sched.create_thread_with_priority(prio(1));
    let r1 = sched.create_queue(true);
    let r2 = sched.create_queue(true);

    sched.acquire(r1, b);
    sched.acquire(r2, c);
    sched.wait_for_access(r2, b);
    audited(&sched);
    assert_eq!(sched.effective_priority(c), prio(1));

    sched.wait_for_access(r1, a);
    audited(&sched);
    assert_eq!(sched.effective_priority(b), prio(7));
    assert_eq!(sched.effective_priority(c), prio(7));

    // c hands r2 to b: c reverts, b keeps a's donation.
    assert_eq!(sched.next_thread(r2), Some(b));
    audited(&sched);
    assert_eq!(sched.effective_priority(c), prio(1));
    assert_eq!(sched.effective_priority(b), prio(7));

    // b hands r1 to a: everything reverts.
    assert_eq!(sched.next_thread(r1), Some(a));
    audited(&sched);
    assert_eq!(sched.effective_priority(b), prio(1));
    assert_eq!(sched.effective_priority(a), prio(7));
    donos::test_complete!("donation_crosses_a_chain_of_held_resources");
}

#[test]
fn deep_chain_unwinds_one_hop_per_handoff() {
    init_test("deep_chain_unwinds_one_hop_per_handoff");
    let mut sched = Scheduler::new();

    // threads[i] holds queues[i] and waits on queues[i + 1]; the last
    // thread holds the end of the chain. A top-priority donor then waits
    // on queues[0] and the donation must reach the end.
    let mut threads = Vec::new();
    let mut queues = Vec::new();
    for _ in 0..5 {
        threads.push(sched.create_thread_with_priority(prio(1)));
        queues.push(sched.create_queue(true));
    }
    for i in 0..5 {
        sched.acquire(queues[i], threads[i]);
    }
    for i in 0..4 {
        sched.wait_for_access(queues[i + 1], threads[i]);
    }
    audited(&sched);

    let donor = sched.create_thread_with_priority(prio(7));
    sched.wait_for_access(queues[0], donor);
    audited(&sched);
    for &t in &threads {
        assert_eq!(sched.effective_priority(t), prio(7), "chain member at 7");
    }

    // Handing off the last queue drops only the tail of the chain.
    assert_eq!(sched.next_thread(queues[4]), Some(threads[3]));
    audited(&sched);
    assert_eq!(sched.effective_priority(threads[4]), prio(1));
    for &t in &threads[..4] {
        assert_eq!(sched.effective_priority(t), prio(7));
    }
    donos::test_complete!("deep_chain_unwinds_one_hop_per_handoff");
}

#[test]
fn raising_a_donor_reraises_the_whole_chain() {
    init_test("raising_a_donor_reraises_the_whole_chain");
    let mut sched = Scheduler::new();
    let a = sched.create_thread_with_priority(prio(3));
    let b = sched.create_thread_with_priority(prio(1));
    let c = sched.create_thread_with_priority(prio(1));
    let r1 = sched.create_queue(true);
    let r2 = sched.create_queue(true);

    sched.acquire(r1, b);
    sched.acquire(r2, c);
    sched.wait_for_access(r2, b);
    sched.wait_for_access(r1, a);
    assert_eq!(sched.effective_priority(c), prio(3));

    sched.set_priority(a, prio(6));
    audited(&sched);
    assert_eq!(sched.effective_priority(b), prio(6));
    assert_eq!(sched.effective_priority(c), prio(6));

    sched.set_priority(a, prio(2));
    audited(&sched);
    assert_eq!(sched.effective_priority(b), prio(2));
    assert_eq!(sched.effective_priority(c), prio(2));
    donos::test_complete!("raising_a_donor_reraises_the_whole_chain");
}

// ============================================================================
// Revocation across multiple queues
// ============================================================================

#[test]
fn donation_persists_while_donor_waits_on_another_held_queue() {
    init_test("donation_persists_while_donor_waits_on_another_held_queue");
    let mut sched = Scheduler::new();
    let h = sched.create_thread_with_priority(prio(2));
    let d = sched.create_thread_with_priority(prio(5));
    let other = sched.create_thread_with_priority(prio(2));
    let q1 = sched.create_queue(true);
    let q2 = sched.create_queue(true);

    sched.acquire(q1, h);
    sched.acquire(q2, h);
    sched.wait_for_access(q1, d);
    sched.wait_for_access(q1, other);
    sched.wait_for_access(q2, d);
    audited(&sched);
    assert_eq!(sched.effective_priority(h), prio(5));

    // q1 changes hands; d still waits on q2, which h holds, so h keeps
    // the donation.
    assert_eq!(sched.next_thread(q1), Some(d));
    audited(&sched);
    assert_eq!(sched.effective_priority(h), prio(5));

    // Only when q2 also changes hands is the donation revoked.
    assert_eq!(sched.next_thread(q2), Some(d));
    audited(&sched);
    assert_eq!(sched.effective_priority(h), prio(2));
    donos::test_complete!("donation_persists_while_donor_waits_on_another_held_queue");
}

#[test]
fn two_donors_revoke_independently() {
    init_test("two_donors_revoke_independently");
    let mut sched = Scheduler::new();
    let h = sched.create_thread_with_priority(prio(0));
    let d1 = sched.create_thread_with_priority(prio(6));
    let d2 = sched.create_thread_with_priority(prio(4));
    let q = sched.create_queue(true);

    sched.acquire(q, h);
    sched.wait_for_access(q, d1);
    sched.wait_for_access(q, d2);
    audited(&sched);
    assert_eq!(sched.effective_priority(h), prio(6));

    // d1 leaves: h loses the 6 but inherits d2's 4 through the new-holder
    // donation check run on the remaining waiters. d2 now donates to d1.
    assert_eq!(sched.next_thread(q), Some(d1));
    audited(&sched);
    assert_eq!(sched.effective_priority(h), prio(0));
    assert_eq!(sched.effective_priority(d1), prio(6));
    assert_eq!(sched.best_donor(d1), Some(d2));
    donos::test_complete!("two_donors_revoke_independently");
}

// ============================================================================
// Resource adapters working together
// ============================================================================

#[test]
fn lock_and_join_compose_over_one_scheduler() {
    init_test("lock_and_join_compose_over_one_scheduler");
    let mut sched = Scheduler::new();

    // A worker child holds a lock; a high-priority supervisor joins on
    // the child while a peer contends for the lock.
    let child = sched.create_thread_with_priority(prio(1));
    let peer = sched.create_thread_with_priority(prio(3));
    let supervisor = sched.create_thread_with_priority(prio(7));

    let lock = Lock::new(&mut sched);
    let join = JoinHandle::new(&mut sched, child);

    assert_eq!(lock.acquire(&mut sched, child), LockAcquire::Acquired);
    assert_eq!(lock.acquire(&mut sched, peer), LockAcquire::MustWait);
    audited(&sched);
    assert_eq!(sched.effective_priority(child), prio(3));

    join.join(&mut sched, supervisor);
    audited(&sched);
    assert_eq!(sched.effective_priority(child), prio(7));

    // The child releases the lock: the peer takes it, and the child keeps
    // only the join donation.
    assert_eq!(lock.release(&mut sched, child), Some(peer));
    audited(&sched);
    assert_eq!(sched.effective_priority(child), prio(7));
    assert_eq!(sched.best_donor(child), Some(supervisor));

    // The child finishes: the supervisor is woken, all donations gone.
    let woken = join.finish(&mut sched);
    audited(&sched);
    assert_eq!(woken, vec![supervisor]);
    assert_eq!(sched.effective_priority(child), prio(1));
    donos::test_complete!("lock_and_join_compose_over_one_scheduler");
}

#[test]
fn ready_queue_inversion_window_is_closed() {
    init_test("ready_queue_inversion_window_is_closed");
    let mut sched = Scheduler::new();
    let running = sched.create_thread_with_priority(prio(1));
    let woken = sched.create_thread_with_priority(prio(7));
    let ready = ReadyQueue::new(&mut sched);

    ready.start(&mut sched, running);
    audited(&sched);

    // A high-priority thread becomes ready; until the next dispatch the
    // CPU occupant runs at the woken thread's priority.
    ready.make_ready(&mut sched, woken);
    audited(&sched);
    assert_eq!(sched.effective_priority(running), prio(7));

    assert_eq!(ready.yield_now(&mut sched), woken);
    audited(&sched);
    assert_eq!(sched.effective_priority(running), prio(1));
    assert_eq!(sched.running(), Some(woken));
    donos::test_complete!("ready_queue_inversion_window_is_closed");
}

#[test]
fn blocking_on_a_lock_hands_the_cpu_to_the_lock_holder() {
    init_test("blocking_on_a_lock_hands_the_cpu_to_the_lock_holder");
    let mut sched = Scheduler::new();
    let owner = sched.create_thread_with_priority(prio(2));
    let blocker = sched.create_thread_with_priority(prio(3));
    let idle = sched.create_thread_with_priority(prio(1));
    let ready = ReadyQueue::new(&mut sched);
    let lock = Lock::new(&mut sched);

    assert_eq!(lock.acquire(&mut sched, owner), LockAcquire::Acquired);
    ready.start(&mut sched, blocker);
    ready.make_ready(&mut sched, idle);
    ready.make_ready(&mut sched, owner);
    audited(&sched);

    // The running thread blocks on the lock: the owner inherits its
    // priority, jumps the idle thread in the ready queue, and takes the
    // CPU at the next dispatch.
    assert_eq!(lock.acquire(&mut sched, blocker), LockAcquire::MustWait);
    audited(&sched);
    assert_eq!(sched.effective_priority(owner), prio(3));

    assert_eq!(ready.schedule_next(&mut sched), Some(owner));
    audited(&sched);
    assert_eq!(sched.effective_priority(owner), prio(3));

    // The owner releases: the blocker gets the lock and is made ready,
    // donating to the CPU occupant until the next dispatch runs it.
    assert_eq!(lock.release(&mut sched, owner), Some(blocker));
    audited(&sched);
    assert_eq!(sched.effective_priority(owner), prio(2));

    ready.make_ready(&mut sched, blocker);
    audited(&sched);
    assert_eq!(sched.effective_priority(owner), prio(3));

    assert_eq!(ready.yield_now(&mut sched), blocker);
    audited(&sched);
    assert_eq!(sched.effective_priority(owner), prio(2));
    donos::test_complete!("blocking_on_a_lock_hands_the_cpu_to_the_lock_holder");
}

// ============================================================================
// Priority API boundaries
// ============================================================================

#[test]
fn relative_priority_ops_respect_the_band() {
    init_test("relative_priority_ops_respect_the_band");
    let mut sched = Scheduler::new();
    let t = sched.create_thread_with_priority(Priority::MAX);
    sched.set_running(t);

    assert!(!sched.increase_priority());
    assert_eq!(sched.priority(t), Priority::MAX);

    sched.set_priority(t, Priority::MIN);
    assert!(!sched.decrease_priority());
    assert_eq!(sched.priority(t), Priority::MIN);

    assert!(sched.increase_priority());
    assert_eq!(sched.priority(t), prio(1));
    audited(&sched);
    donos::test_complete!("relative_priority_ops_respect_the_band");
}

#[test]
fn set_priority_to_same_value_is_a_no_op() {
    init_test("set_priority_to_same_value_is_a_no_op");
    let mut sched = Scheduler::new();
    let holder = sched.create_thread_with_priority(prio(1));
    let waiter = sched.create_thread_with_priority(prio(5));
    let q = sched.create_queue(true);

    sched.acquire(q, holder);
    sched.wait_for_access(q, waiter);

    sched.set_priority(waiter, prio(5));
    audited(&sched);
    assert_eq!(sched.effective_priority(holder), prio(5));
    assert_eq!(sched.peek_next(q), Some(waiter));
    donos::test_complete!("set_priority_to_same_value_is_a_no_op");
}

#[test]
fn lowering_a_donors_base_below_its_donation_keeps_the_donation() {
    init_test("lowering_a_donors_base_below_its_donation_keeps_the_donation");
    let mut sched = Scheduler::new();
    let h = sched.create_thread_with_priority(prio(0));
    let mid = sched.create_thread_with_priority(prio(2));
    let top = sched.create_thread_with_priority(prio(6));
    let q1 = sched.create_queue(true);
    let q2 = sched.create_queue(true);

    // top -> mid -> h; mid's own base then drops, but it still carries
    // top's donation, so h must keep seeing 6.
    sched.acquire(q1, h);
    sched.acquire(q2, mid);
    sched.wait_for_access(q1, mid);
    sched.wait_for_access(q2, top);
    audited(&sched);
    assert_eq!(sched.effective_priority(h), prio(6));

    sched.set_priority(mid, prio(1));
    audited(&sched);
    assert_eq!(sched.effective_priority(mid), prio(6));
    assert_eq!(sched.effective_priority(h), prio(6));
    donos::test_complete!("lowering_a_donors_base_below_its_donation_keeps_the_donation");
}
