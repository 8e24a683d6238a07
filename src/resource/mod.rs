//! Resource adapters built on the scheduler core.
//!
//! One adapter per known consumer of the donation machinery: the
//! mutual-exclusion [`Lock`], the [`JoinHandle`], and the CPU
//! [`ReadyQueue`]. All three run with donation enabled. Adapters carry no
//! blocking machinery — parking and context switching belong to the
//! surrounding kernel; these types keep the scheduler's ownership view
//! correct so inheritance flows to the right thread.

pub mod join;
pub mod lock;
pub mod ready;

pub use join::JoinHandle;
pub use lock::{Lock, LockAcquire};
pub use ready::ReadyQueue;
