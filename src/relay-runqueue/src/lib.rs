//! Fixed-priority run queue.
//!
//! Holds the runnable threads of a single-core scheduler, one circular list per
//! priority, and answers "which thread runs next" in constant time.

#![cfg_attr(not(test), no_std)]

mod runqueue;
pub use runqueue::{RunQueue, RunqueueId, ThreadId};
