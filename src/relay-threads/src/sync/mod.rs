//! Synchronization primitives.
//!
//! All of them can be placed in `static`s (`const fn new`) or shared through
//! an `Arc`. Calls that never block can be made from interrupt context and
//! return a [`crate::isr::Wake`]; blocking calls take a
//! [`crate::time::Timeout`].
//!
//! A primitive must only be used by the threads and interrupts of a single
//! [`crate::Kernel`].

use critical_section::CriticalSection;

use crate::{enter, kernel::Role, Scheduler, ThreadId};

mod channel;
mod counter;
mod latest;
mod signal;

pub use channel::Channel;
pub use counter::Counter;
pub use latest::Latest;
pub use signal::Signal;

/// Outcome of the first phase of a blocking call.
pub(crate) enum Attempt<T> {
    /// Completed without blocking.
    Ready(T),
    /// The caller was put on a waiter list.
    Blocked(ThreadId),
}

/// Runs a blocking call in two kernel calls.
///
/// `attempt` either completes or blocks the caller. In the latter case the
/// caller is parked outside of the critical section until it is woken, then
/// `finish` collects the result.
pub(crate) fn block_on<T, E>(
    attempt: impl FnOnce(CriticalSection<'_>, &mut Scheduler, Role) -> Result<Attempt<T>, E>,
    finish: impl FnOnce(CriticalSection<'_>, &mut Scheduler, ThreadId) -> Result<T, E>,
) -> Result<T, E> {
    match enter(attempt)? {
        Attempt::Ready(value) => Ok(value),
        Attempt::Blocked(pid) => enter(|cs, scheduler, _| finish(cs, scheduler, pid)),
    }
}
