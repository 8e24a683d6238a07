//! Internal utilities for the scheduler core.
//!
//! Deliberately minimal and dependency-free: the arena is the storage
//! substrate every record type sits on.

pub mod arena;

pub use arena::{Arena, ArenaIndex};
