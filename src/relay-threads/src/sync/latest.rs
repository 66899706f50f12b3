use core::cell::RefCell;

use critical_section::Mutex;

use super::{block_on, Attempt};
use crate::{
    enter, isr::Wake, threadlist::ThreadList, time::Timeout, ThreadState, TryReceiveError,
    WaitError, THREADS_NUMOF,
};

/// A single-slot channel where every send replaces the previous value.
///
/// Used for decision state that one thread publishes and others act on:
/// readers only ever see the newest value, and a sender never blocks.
pub struct Latest<T> {
    state: Mutex<RefCell<LatestState<T>>>,
}

struct LatestState<T> {
    slot: Option<T>,
    /// Values handed to blocked receivers, indexed by pid.
    parked: [Option<T>; THREADS_NUMOF],
    receivers: ThreadList,
}

impl<T> Default for Latest<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Latest<T> {
    /// Creates an empty slot.
    pub const fn new() -> Self {
        Self {
            state: Mutex::new(RefCell::new(LatestState {
                slot: None,
                parked: [const { None }; THREADS_NUMOF],
                receivers: ThreadList::new(),
            })),
        }
    }

    /// Publishes `value`, dropping any value nobody received yet.
    ///
    /// A blocked receiver gets the value directly. Never blocks; usable from
    /// interrupt context.
    pub fn send(&self, value: T) -> Wake {
        enter(|cs, scheduler, _| {
            let mut state = self.state.borrow_ref_mut(cs);
            let state = &mut *state;
            if let Some((pid, wake)) = state.receivers.pop(scheduler) {
                state.parked[usize::from(pid)] = Some(value);
                return wake;
            }
            state.slot = Some(value);
            Wake::Posted
        })
    }

    /// Takes the published value, blocking up to `timeout` until there is
    /// one.
    pub fn receive(&self, timeout: Timeout) -> Result<T, WaitError> {
        block_on(
            |cs, scheduler, role| {
                scheduler.admit(role)?;
                let mut state = self.state.borrow_ref_mut(cs);
                if let Some(value) = state.slot.take() {
                    return Ok(Attempt::Ready(value));
                }
                let (pid, deadline) = scheduler.prepare_block(role, timeout)?;
                state
                    .receivers
                    .put(scheduler, pid, ThreadState::LatestBlocked, deadline);
                Ok(Attempt::Blocked(pid))
            },
            |cs, scheduler, pid| {
                let mut state = self.state.borrow_ref_mut(cs);
                state.receivers.finish(scheduler, pid)?;
                let Some(value) = state.parked[usize::from(pid)].take() else {
                    unreachable!("unexpected thread state: woken receiver without value");
                };
                Ok(value)
            },
        )
    }

    /// Takes the published value if there is one.
    pub fn try_receive(&self) -> Result<T, TryReceiveError> {
        critical_section::with(|cs| self.state.borrow_ref_mut(cs).slot.take())
            .ok_or(TryReceiveError::Empty)
    }

    /// Whether a value is waiting to be received.
    pub fn has_value(&self) -> bool {
        critical_section::with(|cs| self.state.borrow_ref(cs).slot.is_some())
    }
}

impl<T: Clone> Latest<T> {
    /// Returns a copy of the published value without taking it.
    pub fn peek(&self) -> Option<T> {
        critical_section::with(|cs| self.state.borrow_ref(cs).slot.clone())
    }
}
