use core::cell::RefCell;

use critical_section::Mutex;
use heapless::Deque;

use super::{block_on, Attempt};
use crate::{
    enter, isr::Wake, threadlist::ThreadList, time::Timeout, SendError, ThreadId, ThreadState,
    TryReceiveError, TrySendError, WaitError, THREADS_NUMOF,
};

/// A bounded FIFO mailbox holding up to `N` messages.
///
/// Senders block while it is full, receivers while it is empty. Blocked
/// threads are served by priority, oldest first. A message handed to a
/// blocked receiver, or taken from a blocked sender, is moved in the same
/// critical section that frees it, so the channel never shows a gap.
///
/// ```
/// use relay_threads::sync::Channel;
///
/// static READINGS: Channel<u16, 3> = Channel::new();
/// assert_eq!(READINGS.capacity(), 3);
/// assert!(READINGS.is_empty());
/// ```
pub struct Channel<T, const N: usize> {
    state: Mutex<RefCell<ChannelState<T, N>>>,
}

struct ChannelState<T, const N: usize> {
    buffer: Deque<T, N>,
    /// Messages in transit, indexed by the pid of the blocked thread that
    /// gives or receives them.
    parked: [Option<T>; THREADS_NUMOF],
    senders: ThreadList,
    receivers: ThreadList,
}

impl<T, const N: usize> ChannelState<T, N> {
    /// Moves the message of the first blocked sender into the buffer.
    fn refill(&mut self, scheduler: &mut crate::Scheduler) -> Wake {
        let Some((pid, wake)) = self.senders.pop(scheduler) else {
            return Wake::Unchanged;
        };
        let Some(message) = self.parked[usize::from(pid)].take() else {
            unreachable!("unexpected thread state: blocked sender without message");
        };
        if self.buffer.push_back(message).is_err() {
            unreachable!("refill without free slot");
        }
        wake
    }

    fn take_parked(&mut self, pid: ThreadId) -> T {
        let Some(message) = self.parked[usize::from(pid)].take() else {
            unreachable!("unexpected thread state: no message parked for thread");
        };
        message
    }
}

impl<T, const N: usize> Default for Channel<T, N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, const N: usize> Channel<T, N> {
    const VALID: () = assert!(N >= 1, "channel capacity must be at least 1");

    pub const fn new() -> Self {
        #[allow(clippy::let_unit_value)]
        let () = Self::VALID;
        Self {
            state: Mutex::new(RefCell::new(ChannelState {
                buffer: Deque::new(),
                parked: [const { None }; THREADS_NUMOF],
                senders: ThreadList::new(),
                receivers: ThreadList::new(),
            })),
        }
    }

    fn addr(&self) -> usize {
        self as *const Self as usize
    }

    /// Sends `message`, blocking up to `timeout` while the channel is full.
    ///
    /// On failure the message is handed back inside the error; nothing was
    /// enqueued.
    pub fn send(&self, message: T, timeout: Timeout) -> Result<(), SendError<T>> {
        let addr = self.addr();
        block_on(
            |cs, scheduler, role| {
                if let Err(reason) = scheduler.admit(role) {
                    return Err(SendError { reason, message });
                }
                let mut state = self.state.borrow_ref_mut(cs);
                let state = &mut *state;
                if let Some((pid, _)) = state.receivers.pop(scheduler) {
                    state.parked[usize::from(pid)] = Some(message);
                    return Ok(Attempt::Ready(()));
                }
                let message = match state.buffer.push_back(message) {
                    Ok(()) => return Ok(Attempt::Ready(())),
                    Err(message) => message,
                };
                match scheduler.prepare_block(role, timeout) {
                    Ok((pid, deadline)) => {
                        state.parked[usize::from(pid)] = Some(message);
                        state.senders.put(
                            scheduler,
                            pid,
                            ThreadState::ChannelTxBlocked(addr),
                            deadline,
                        );
                        Ok(Attempt::Blocked(pid))
                    }
                    Err(reason) => Err(SendError { reason, message }),
                }
            },
            |cs, scheduler, pid| {
                let mut state = self.state.borrow_ref_mut(cs);
                match state.senders.finish(scheduler, pid) {
                    Ok(()) => Ok(()),
                    Err(reason) => Err(SendError {
                        reason,
                        message: state.take_parked(pid),
                    }),
                }
            },
        )
    }

    /// Receives the oldest message, blocking up to `timeout` while the
    /// channel is empty.
    pub fn receive(&self, timeout: Timeout) -> Result<T, WaitError> {
        let addr = self.addr();
        block_on(
            |cs, scheduler, role| {
                scheduler.admit(role)?;
                let mut state = self.state.borrow_ref_mut(cs);
                if let Some(message) = state.buffer.pop_front() {
                    state.refill(scheduler);
                    return Ok(Attempt::Ready(message));
                }
                let (pid, deadline) = scheduler.prepare_block(role, timeout)?;
                state.receivers.put(
                    scheduler,
                    pid,
                    ThreadState::ChannelRxBlocked(addr),
                    deadline,
                );
                Ok(Attempt::Blocked(pid))
            },
            |cs, scheduler, pid| {
                let mut state = self.state.borrow_ref_mut(cs);
                state.receivers.finish(scheduler, pid)?;
                Ok(state.take_parked(pid))
            },
        )
    }

    /// Sends `message` if there is room.
    ///
    /// Never blocks; usable from interrupt context.
    pub fn try_send(&self, message: T) -> Result<Wake, TrySendError<T>> {
        enter(|cs, scheduler, _| {
            let mut state = self.state.borrow_ref_mut(cs);
            let state = &mut *state;
            if let Some((pid, wake)) = state.receivers.pop(scheduler) {
                state.parked[usize::from(pid)] = Some(message);
                return Ok(wake);
            }
            match state.buffer.push_back(message) {
                Ok(()) => Ok(Wake::Posted),
                Err(message) => Err(TrySendError::Full(message)),
            }
        })
    }

    /// Receives the oldest message if there is one.
    ///
    /// Never blocks; usable from interrupt context. The [`Wake`] reports a
    /// blocked sender that got to enqueue its message.
    pub fn try_receive(&self) -> Result<(T, Wake), TryReceiveError> {
        enter(|cs, scheduler, _| {
            let mut state = self.state.borrow_ref_mut(cs);
            let message = state.buffer.pop_front().ok_or(TryReceiveError::Empty)?;
            let wake = state.refill(scheduler).merge(Wake::Posted);
            Ok((message, wake))
        })
    }

    /// Number of enqueued messages.
    pub fn len(&self) -> usize {
        critical_section::with(|cs| self.state.borrow_ref(cs).buffer.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_full(&self) -> bool {
        critical_section::with(|cs| self.state.borrow_ref(cs).buffer.is_full())
    }

    pub const fn capacity(&self) -> usize {
        N
    }
}
