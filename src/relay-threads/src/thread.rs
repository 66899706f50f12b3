use crate::{
    arch::{Arch, Cpu, ThreadData},
    time::Instant,
    RunqueueId, ThreadId,
};

/// Main struct for holding thread data
#[derive(Debug)]
pub struct Thread {
    pub pid: ThreadId,
    pub name: &'static str,
    pub prio: RunqueueId,
    pub state: ThreadState,
    /// Tick at which a blocked thread times out.
    pub(crate) deadline: Option<Instant>,
    /// Why the thread was last made runnable after blocking.
    pub(crate) wake: Option<WakeReason>,
    pub(crate) cancelled: bool,
    pub(crate) data: ThreadData,
}

/// Possible states of a thread
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ThreadState {
    /// Free slot.
    Invalid,
    /// Runnable; either current or waiting in the run queue.
    Running,
    /// Slot reserved while the thread is being created.
    Paused,
    /// Waiting for a deadline only.
    Sleeping,
    SignalBlocked,
    CounterBlocked,
    /// Waiting to receive from the channel at this address.
    ChannelRxBlocked(usize),
    /// Waiting to send to the channel at this address.
    ChannelTxBlocked(usize),
    LatestBlocked,
}

impl ThreadState {
    /// Whether the thread waits for an event or a deadline.
    pub fn is_blocked(&self) -> bool {
        !matches!(
            self,
            ThreadState::Invalid | ThreadState::Running | ThreadState::Paused
        )
    }
}

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub(crate) enum WakeReason {
    Signaled,
    Timeout,
    Cancelled,
}

impl Thread {
    /// create a default Thread object
    pub(crate) const fn default() -> Thread {
        Thread {
            pid: 0,
            name: "",
            prio: 0,
            state: ThreadState::Invalid,
            deadline: None,
            wake: None,
            cancelled: false,
            data: Cpu::DEFAULT_THREAD_DATA,
        }
    }
}
