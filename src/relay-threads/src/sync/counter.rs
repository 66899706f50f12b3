use core::cell::RefCell;

use critical_section::Mutex;
use relay_debug::log::trace;

use super::{block_on, Attempt};
use crate::{enter, isr::Wake, threadlist::ThreadList, time::Timeout, ThreadState, WaitError};

/// A counting semaphore that latches up to `capacity` events.
///
/// Each [`Counter::signal`] either releases a waiting thread or records one
/// event. Events beyond `capacity` are dropped.
pub struct Counter {
    state: Mutex<RefCell<CounterState>>,
}

struct CounterState {
    count: u32,
    capacity: u32,
    waiters: ThreadList,
}

impl Counter {
    /// Creates a counter holding `initial` events.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero or `initial` exceeds it. In a `static`
    /// this fails the build.
    pub const fn new(capacity: u32, initial: u32) -> Self {
        assert!(capacity >= 1, "counter capacity must be at least 1");
        assert!(initial <= capacity, "initial count exceeds capacity");
        Self {
            state: Mutex::new(RefCell::new(CounterState {
                count: initial,
                capacity,
                waiters: ThreadList::new(),
            })),
        }
    }

    /// Records one event.
    ///
    /// Never blocks; usable from interrupt context. Returns
    /// [`Wake::Unchanged`] if the counter was saturated and the event got
    /// dropped.
    pub fn signal(&self) -> Wake {
        enter(|cs, scheduler, _| {
            let mut state = self.state.borrow_ref_mut(cs);
            if let Some((_, wake)) = state.waiters.pop(scheduler) {
                return wake;
            }
            if state.count < state.capacity {
                state.count += 1;
                Wake::Posted
            } else {
                trace!("counter saturated at {}, event dropped", state.capacity);
                Wake::Unchanged
            }
        })
    }

    /// Takes one event, blocking up to `timeout` until there is one.
    pub fn wait(&self, timeout: Timeout) -> Result<(), WaitError> {
        block_on(
            |cs, scheduler, role| {
                scheduler.admit(role)?;
                let mut state = self.state.borrow_ref_mut(cs);
                if state.count > 0 {
                    state.count -= 1;
                    return Ok(Attempt::Ready(()));
                }
                let (pid, deadline) = scheduler.prepare_block(role, timeout)?;
                state
                    .waiters
                    .put(scheduler, pid, ThreadState::CounterBlocked, deadline);
                Ok(Attempt::Blocked(pid))
            },
            |cs, scheduler, pid| self.state.borrow_ref_mut(cs).waiters.finish(scheduler, pid),
        )
    }

    /// Takes one event if there is one.
    pub fn try_wait(&self) -> bool {
        enter(|cs, _, _| {
            let mut state = self.state.borrow_ref_mut(cs);
            if state.count > 0 {
                state.count -= 1;
                true
            } else {
                false
            }
        })
    }

    /// Number of recorded events.
    pub fn count(&self) -> u32 {
        critical_section::with(|cs| self.state.borrow_ref(cs).count)
    }

    pub fn capacity(&self) -> u32 {
        critical_section::with(|cs| self.state.borrow_ref(cs).capacity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_with_initial_count() {
        let counter = Counter::new(10, 3);
        assert_eq!(counter.count(), 3);
        assert_eq!(counter.capacity(), 10);
    }

    #[test]
    #[should_panic(expected = "counter capacity must be at least 1")]
    fn zero_capacity_is_rejected() {
        let _ = Counter::new(0, 0);
    }

    #[test]
    #[should_panic(expected = "initial count exceeds capacity")]
    fn initial_above_capacity_is_rejected() {
        let _ = Counter::new(2, 3);
    }
}
