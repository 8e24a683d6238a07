//! Internal records for scheduler entities.
//!
//! One record type per entity the scheduler tracks: threads and wait
//! queues. Records do local bookkeeping only; every operation that spans
//! records goes through [`crate::sched::Scheduler`], which owns the arenas
//! the records live in.

pub mod queue;
pub mod thread;

pub use queue::QueueRecord;
pub use thread::{BestDonation, DonationEntry, ThreadRecord};
