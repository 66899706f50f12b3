use core::cell::RefCell;

use critical_section::Mutex;

use super::{block_on, Attempt};
use crate::{enter, isr::Wake, threadlist::ThreadList, time::Timeout, ThreadState, WaitError};

/// A binary semaphore.
///
/// Signaling records one pending event. Signaling again before a thread
/// consumed it changes nothing, so the signal never delivers an event twice.
/// If threads wait, the highest priority one (oldest first) is released
/// directly instead.
pub struct Signal {
    state: Mutex<RefCell<SignalState>>,
}

struct SignalState {
    available: bool,
    waiters: ThreadList,
}

impl Default for Signal {
    fn default() -> Self {
        Self::new()
    }
}

impl Signal {
    /// Creates a new signal that is not available.
    pub const fn new() -> Self {
        Self {
            state: Mutex::new(RefCell::new(SignalState {
                available: false,
                waiters: ThreadList::new(),
            })),
        }
    }

    /// Gives the signal.
    ///
    /// Never blocks; usable from interrupt context.
    pub fn signal(&self) -> Wake {
        enter(|cs, scheduler, _| {
            let mut state = self.state.borrow_ref_mut(cs);
            if let Some((_, wake)) = state.waiters.pop(scheduler) {
                return wake;
            }
            if state.available {
                Wake::Unchanged
            } else {
                state.available = true;
                Wake::Posted
            }
        })
    }

    /// Takes the signal, blocking up to `timeout` until it is given.
    pub fn wait(&self, timeout: Timeout) -> Result<(), WaitError> {
        block_on(
            |cs, scheduler, role| {
                scheduler.admit(role)?;
                let mut state = self.state.borrow_ref_mut(cs);
                if state.available {
                    state.available = false;
                    return Ok(Attempt::Ready(()));
                }
                let (pid, deadline) = scheduler.prepare_block(role, timeout)?;
                state
                    .waiters
                    .put(scheduler, pid, ThreadState::SignalBlocked, deadline);
                Ok(Attempt::Blocked(pid))
            },
            |cs, scheduler, pid| self.state.borrow_ref_mut(cs).waiters.finish(scheduler, pid),
        )
    }

    /// Takes the signal if it is available.
    pub fn try_wait(&self) -> bool {
        enter(|cs, _, _| {
            let mut state = self.state.borrow_ref_mut(cs);
            core::mem::replace(&mut state.available, false)
        })
    }

    /// Whether the signal was given and not taken yet.
    pub fn is_available(&self) -> bool {
        critical_section::with(|cs| self.state.borrow_ref(cs).available)
    }
}
