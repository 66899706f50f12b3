//! Fixed-priority preemptive scheduler and the primitives used to hand work
//! from interrupt context to threads.
//!
//! A [`Kernel`] owns a table of [`THREADS_NUMOF`] threads and a run queue with
//! [`SCHED_PRIO_LEVELS`] priorities (higher number, higher priority). The
//! hosted port backs every thread with an OS thread, but only the thread the
//! scheduler selected as current executes kernel code; all others are parked.
//!
//! The primitives in [`sync`] can be given from interrupt context
//! ([`Kernel::interrupt`]) and report through [`isr::Wake`] whether the
//! interrupt should request a context switch on exit.
//!
//! ```
//! use std::sync::Arc;
//!
//! use relay_threads::{sync::Signal, time::Timeout, Config, Kernel};
//!
//! let kernel = Kernel::new(Config::default());
//! let signal = Arc::new(Signal::new());
//!
//! let waiter = signal.clone();
//! kernel
//!     .spawn("waiter", 2, move || {
//!         waiter.wait(Timeout::Forever).unwrap();
//!     })
//!     .unwrap();
//! kernel.start();
//!
//! kernel.interrupt(|| {
//!     let wake = signal.signal();
//!     relay_threads::isr::yield_from_isr(wake);
//! });
//!
//! assert!(kernel.wait_for_tasks(std::time::Duration::from_secs(5)));
//! kernel.shutdown();
//! ```

// Disable indexing lints for now, possible panics are documented or rely on internally-enforced
// invariants
#![allow(clippy::indexing_slicing)]

use critical_section::CriticalSection;

use relay_runqueue::RunQueue;
pub use relay_runqueue::{RunqueueId, ThreadId};

mod arch;
mod error;
mod kernel;
mod thread;
mod threadlist;

pub mod consumer;
pub mod event;
pub mod isr;
pub mod sync;
pub mod time;
pub mod timer;

pub use error::{SendError, SpawnError, TimerError, TryReceiveError, TrySendError, WaitError};
pub use kernel::{Builder, Config, Kernel, TickMode};
pub use thread::{Thread, ThreadState};

use arch::{Arch, Cpu, ThreadData};
use isr::Wake;
use kernel::Role;
use thread::WakeReason;
use time::{Duration, Instant, Timeout};

/// The number of possible priority levels.
pub const SCHED_PRIO_LEVELS: usize =
    relay_utils::usize_from_env_or!("CONFIG_SCHED_PRIO_LEVELS", 12);

/// The number of threads that can exist at the same time, per kernel.
pub const THREADS_NUMOF: usize = relay_utils::usize_from_env_or!("CONFIG_THREADS_NUMOF", 16);

/// Scheduler tick frequency.
pub const TICK_HZ: u32 = relay_utils::u32_from_env_or!("CONFIG_TICK_HZ", 1000);

/// Capacity of the timer service's command queue.
pub const TIMER_QUEUE_LENGTH: usize =
    relay_utils::usize_from_env_or!("CONFIG_TIMER_QUEUE_LENGTH", 10);

/// Lower bound for the stack of a hosted thread, in bytes.
pub const MIN_STACKSIZE: usize = relay_utils::usize_from_env_or!("CONFIG_MIN_STACKSIZE", 65536);

const _: () = {
    assert!(SCHED_PRIO_LEVELS >= 1);
    assert!(THREADS_NUMOF >= 1);
    assert!(TICK_HZ >= 1);
    assert!(TIMER_QUEUE_LENGTH >= 1);
};

/// Struct holding all scheduler state
pub(crate) struct Scheduler {
    /// Thread runqueue.
    runqueue: RunQueue<SCHED_PRIO_LEVELS, THREADS_NUMOF>,
    /// The actual TCBs.
    threads: [Thread; THREADS_NUMOF],
    /// Links of the waiter lists; the head of each list lives in the
    /// primitive the threads wait on.
    thread_blocklist: [Option<ThreadId>; THREADS_NUMOF],
    /// The thread currently owning the CPU.
    current_thread: Option<ThreadId>,
    /// Ticks since the kernel was created.
    ticks: u64,
    /// Nothing is scheduled before [`Kernel::start`].
    started: bool,
}

impl Scheduler {
    const fn new() -> Self {
        Self {
            runqueue: RunQueue::new(),
            threads: [const { Thread::default() }; THREADS_NUMOF],
            thread_blocklist: [const { None }; THREADS_NUMOF],
            current_thread: None,
            ticks: 0,
            started: false,
        }
    }

    /// Returns checked mutable access to the thread data of the currently
    /// running thread.
    ///
    /// Returns `None` if there is no current thread.
    pub(crate) fn current(&mut self) -> Option<&mut Thread> {
        self.current_thread
            .map(|tid| &mut self.threads[tid as usize])
    }

    pub(crate) fn current_pid(&self) -> Option<ThreadId> {
        self.current_thread
    }

    /// Reserves a thread slot.
    ///
    /// The slot stays [`ThreadState::Paused`] until [`Scheduler::commit`]
    /// makes it runnable.
    pub(crate) fn reserve(&mut self, name: &'static str, prio: u8) -> Result<ThreadId, SpawnError> {
        if usize::from(prio) >= SCHED_PRIO_LEVELS {
            return Err(SpawnError::InvalidPriority(prio));
        }
        let (thread, pid) = self.get_unused().ok_or(SpawnError::NoFreeSlot)?;
        *thread = Thread::default();
        thread.pid = pid;
        thread.name = name;
        thread.prio = prio;
        thread.state = ThreadState::Paused;
        Ok(pid)
    }

    /// Hands a reserved slot its CPU context and makes it runnable.
    pub(crate) fn commit(&mut self, pid: ThreadId, data: ThreadData) {
        self.threads[pid as usize].data = data;
        self.set_state(pid, ThreadState::Running);
    }

    /// Frees a thread slot.
    pub(crate) fn release(&mut self, pid: ThreadId) {
        self.set_state(pid, ThreadState::Invalid);
        self.thread_blocklist[pid as usize] = None;
        self.threads[pid as usize] = Thread::default();
    }

    /// Returns mutable access to any thread data.
    ///
    /// # Panics
    ///
    /// Panics if `thread_id` is >= [`THREADS_NUMOF`].
    /// If the thread for this `thread_id` is in an invalid state, the
    /// data in the returned [`Thread`] is undefined, i.e. empty or outdated.
    pub(crate) fn get_unchecked_mut(&mut self, thread_id: ThreadId) -> &mut Thread {
        &mut self.threads[thread_id as usize]
    }

    pub(crate) fn get_unchecked(&self, thread_id: ThreadId) -> &Thread {
        &self.threads[thread_id as usize]
    }

    /// Returns an unused ThreadId / Thread slot.
    fn get_unused(&mut self) -> Option<(&mut Thread, ThreadId)> {
        let pid = self
            .threads
            .iter()
            .position(|thread| thread.state == ThreadState::Invalid)?;
        Some((&mut self.threads[pid], pid as ThreadId))
    }

    /// Checks if a thread with valid state exists for this `thread_id`.
    fn is_valid_pid(&self, thread_id: ThreadId) -> bool {
        if thread_id as usize >= THREADS_NUMOF {
            false
        } else {
            self.threads[thread_id as usize].state != ThreadState::Invalid
        }
    }

    /// Sets the state of a thread.
    ///
    /// This function handles adding/ removing the thread to the Runqueue depending
    /// on its previous or new state.
    ///
    /// # Panics
    ///
    /// Panics if `pid` is >= [`THREADS_NUMOF`].
    pub(crate) fn set_state(&mut self, pid: ThreadId, state: ThreadState) -> ThreadState {
        let thread = &mut self.threads[pid as usize];
        let old_state = thread.state;
        thread.state = state;
        if old_state != ThreadState::Running && state == ThreadState::Running {
            self.runqueue.add(pid, thread.prio);
        } else if old_state == ThreadState::Running && state != ThreadState::Running {
            self.runqueue.del(pid, thread.prio);
        }

        old_state
    }

    /// Returns the state of a thread.
    pub(crate) fn get_state(&self, thread_id: ThreadId) -> Option<ThreadState> {
        if self.is_valid_pid(thread_id) {
            Some(self.threads[thread_id as usize].state)
        } else {
            None
        }
    }

    /// Returns the current time.
    pub(crate) fn now(&self) -> Instant {
        Instant::from_ticks(self.ticks)
    }

    /// Fails blocking calls of threads that were asked to terminate.
    pub(crate) fn admit(&self, role: Role) -> Result<(), WaitError> {
        match role {
            Role::Thread(pid) if self.threads[pid as usize].cancelled => Err(WaitError::Cancelled),
            _ => Ok(()),
        }
    }

    /// Decides whether the caller may block for `timeout`.
    ///
    /// Returns the caller's pid and the tick at which the wait times out.
    pub(crate) fn prepare_block(
        &self,
        role: Role,
        timeout: Timeout,
    ) -> Result<(ThreadId, Option<Instant>), WaitError> {
        let pid = match role {
            Role::Thread(pid) => pid,
            Role::Interrupt | Role::External if timeout.is_immediate() => {
                return Err(WaitError::Timeout)
            }
            Role::Interrupt | Role::External => return Err(WaitError::InterruptContext),
        };
        if self.threads[pid as usize].cancelled {
            return Err(WaitError::Cancelled);
        }
        match timeout {
            Timeout::Forever => Ok((pid, None)),
            timeout if timeout.is_immediate() => Err(WaitError::Timeout),
            Timeout::Within(duration) => Ok((pid, Some(self.now() + duration))),
            Timeout::Immediate => Err(WaitError::Timeout),
        }
    }

    /// Takes a thread off the CPU until it is woken or `deadline` passes.
    pub(crate) fn block(&mut self, pid: ThreadId, state: ThreadState, deadline: Option<Instant>) {
        debug_assert!(state.is_blocked());
        let thread = &mut self.threads[pid as usize];
        thread.deadline = deadline;
        thread.wake = None;
        self.set_state(pid, state);
    }

    /// Makes a blocked thread runnable again.
    ///
    /// Returns [`Wake::Unchanged`] if the thread was not blocked.
    pub(crate) fn wake(&mut self, pid: ThreadId, reason: WakeReason) -> Wake {
        let thread = &mut self.threads[pid as usize];
        if !thread.state.is_blocked() {
            return Wake::Unchanged;
        }
        thread.wake = Some(reason);
        thread.deadline = None;
        let prio = thread.prio;
        self.set_state(pid, ThreadState::Running);
        self.wake_level(prio)
    }

    /// Classifies a thread of priority `prio` becoming ready.
    fn wake_level(&self, prio: RunqueueId) -> Wake {
        match self.current_thread {
            Some(current) if self.threads[current as usize].prio >= prio => Wake::Posted,
            _ => Wake::Preempt,
        }
    }

    /// Whether `pid` is still blocked, i.e. neither woken nor timed out.
    pub(crate) fn is_waiting(&self, pid: ThreadId) -> bool {
        self.threads[pid as usize].state.is_blocked()
    }

    /// Takes the reason a thread was last woken.
    pub(crate) fn take_wake(&mut self, pid: ThreadId) -> Option<WakeReason> {
        self.threads[pid as usize].wake.take()
    }

    /// Marks a thread as cancelled and wakes it if it is blocked.
    ///
    /// Returns `None` if no thread exists for `pid`.
    pub(crate) fn cancel(&mut self, pid: ThreadId) -> Option<Wake> {
        if !self.is_valid_pid(pid) {
            return None;
        }
        let thread = &mut self.threads[pid as usize];
        if thread.cancelled {
            return Some(Wake::Unchanged);
        }
        thread.cancelled = true;
        match self.wake(pid, WakeReason::Cancelled) {
            Wake::Unchanged => Some(Wake::Posted),
            wake => Some(wake),
        }
    }

    pub(crate) fn is_cancelled(&self, pid: ThreadId) -> bool {
        self.threads[pid as usize].cancelled
    }

    /// Wakes every thread whose deadline is due at `now`.
    fn expire(&mut self, now: Instant) -> Wake {
        let mut wake = Wake::Unchanged;
        for pid in 0..THREADS_NUMOF {
            let thread = &self.threads[pid];
            let due = thread.state.is_blocked()
                && thread.deadline.is_some_and(|deadline| deadline <= now);
            if due {
                wake = wake.merge(self.wake(pid as ThreadId, WakeReason::Timeout));
            }
        }
        wake
    }

    /// Advances time by one tick.
    ///
    /// Wakes expired threads and rotates the current priority, so threads
    /// of equal priority share the CPU round-robin.
    pub(crate) fn tick(&mut self) -> Wake {
        self.ticks += 1;
        let wake = self.expire(self.now());
        if let Some(prio) = self.current().map(|thread| thread.prio) {
            self.runqueue.advance(prio);
        }
        wake
    }

    /// "Yields" the current thread to another of the same priority.
    fn yield_same(&mut self) {
        if let Some(prio) = self.current().map(|thread| thread.prio) {
            self.runqueue.advance(prio);
        }
    }

    /// Selects the thread that runs next and switches the CPU to it.
    pub(crate) fn reschedule(&mut self) {
        if !self.started {
            return;
        }
        let next = self.runqueue.get_next();
        if next == self.current_thread {
            return;
        }
        self.current_thread = next;
        if let Some(pid) = next {
            Cpu::switch_to(&self.threads[pid as usize].data);
        }
    }

    /// Whether no thread is runnable.
    pub(crate) fn is_idle(&self) -> bool {
        self.runqueue.is_empty()
    }

    pub(crate) fn start(&mut self) {
        self.started = true;
    }

    pub(crate) fn is_started(&self) -> bool {
        self.started
    }

    /// Pids of all existing threads.
    pub(crate) fn pids(&self) -> impl Iterator<Item = ThreadId> + '_ {
        self.threads
            .iter()
            .enumerate()
            .filter(|(_, thread)| thread.state != ThreadState::Invalid)
            .map(|(pid, _)| pid as ThreadId)
    }
}

/// Runs `f` as a kernel call of the calling thread or interrupt.
///
/// For threads, every kernel call is a scheduling point: the caller first
/// waits until it owns the CPU, and after `f` the scheduler picks the next
/// current thread. If that is not the caller anymore, the caller parks until
/// it is selected again.
///
/// # Panics
///
/// Panics if the calling OS thread is neither a kernel thread nor inside
/// [`Kernel::interrupt`].
pub(crate) fn enter<F, R>(f: F) -> R
where
    F: FnOnce(CriticalSection<'_>, &mut Scheduler, Role) -> R,
{
    let Some(context) = kernel::context() else {
        panic!("kernel call outside of a relay thread or interrupt");
    };
    context.shared.enter_as(context.role, f)
}

/// Like [`enter`], but returns `None` outside of any kernel context.
pub(crate) fn try_enter<F, R>(f: F) -> Option<R>
where
    F: FnOnce(CriticalSection<'_>, &mut Scheduler, Role) -> R,
{
    let context = kernel::context()?;
    Some(context.shared.enter_as(context.role, f))
}

/// Returns the [`ThreadState`] for this `thread_id`.
///
/// Returns `None` if `thread_id` is out of bound or no thread with
/// valid state exists.
pub fn get_state(thread_id: ThreadId) -> Option<ThreadState> {
    enter(|_, scheduler, _| scheduler.get_state(thread_id))
}

/// Returns the [`ThreadId`] of the currently active thread.
///
/// Note: when called from interrupt context, this returns the thread that
/// was interrupted. Returns `None` outside of any kernel context.
pub fn current_pid() -> Option<ThreadId> {
    try_enter(|_, scheduler, role| match role {
        Role::Thread(pid) => Some(pid),
        Role::Interrupt | Role::External => scheduler.current_pid(),
    })
    .flatten()
}

/// Returns the kernel the calling thread or interrupt belongs to.
pub fn current_kernel() -> Option<Kernel> {
    kernel::context().map(|context| Kernel::from_shared(context.shared))
}

/// Returns the current time of the calling thread's kernel.
///
/// # Panics
///
/// Panics outside of a kernel thread or interrupt.
pub fn now() -> Instant {
    enter(|_, scheduler, _| scheduler.now())
}

/// "Yields" to another thread with the same priority.
pub fn yield_same() {
    enter(|_, scheduler, _| scheduler.yield_same());
}

/// Suspends the calling thread for `duration`.
///
/// A zero duration returns at once. Returns early with
/// [`WaitError::Cancelled`] if the thread is deleted meanwhile.
pub fn sleep(duration: Duration) -> Result<(), WaitError> {
    if duration.ticks() == 0 {
        return enter(|_, scheduler, role| scheduler.admit(role));
    }
    let pid = enter(|_, scheduler, role| {
        scheduler.admit(role)?;
        let (pid, deadline) = scheduler.prepare_block(role, Timeout::Within(duration))?;
        scheduler.block(pid, ThreadState::Sleeping, deadline);
        Ok(pid)
    })?;
    enter(|_, scheduler, _| match scheduler.take_wake(pid) {
        Some(WakeReason::Cancelled) => Err(WaitError::Cancelled),
        Some(WakeReason::Timeout) => Ok(()),
        reason => unreachable!("unexpected wake reason {reason:?} after sleeping"),
    })
}

/// Sleeps until `*last_wake + period`, then advances `last_wake` by `period`.
///
/// Calling this in a loop gives a fixed period that does not drift with the
/// loop body's run time. If the thread fell behind, it returns at once.
pub fn sleep_until(last_wake: &mut Instant, period: Duration) -> Result<(), WaitError> {
    let wake_at = *last_wake + period;
    *last_wake = wake_at;
    let remaining = enter(|_, scheduler, _| wake_at.checked_duration_since(scheduler.now()));
    match remaining {
        Some(remaining) if remaining.ticks() > 0 => sleep(remaining),
        _ => enter(|_, scheduler, role| scheduler.admit(role)),
    }
}

/// Asks a thread to terminate.
///
/// Deletion is cooperative: a blocked thread is woken with
/// [`WaitError::Cancelled`], a running one fails its next blocking call and
/// can poll [`is_cancelled`]. Deleting [`current_pid`] cancels the caller.
///
/// Returns `false` if no thread exists for `thread_id`.
pub fn delete(thread_id: ThreadId) -> bool {
    enter(|_, scheduler, role| {
        let wake = scheduler.cancel(thread_id);
        if role == Role::Interrupt {
            if let Some(wake) = wake {
                isr::yield_from_isr(wake);
            }
        }
        wake.is_some()
    })
}

/// Whether the calling thread was asked to terminate.
///
/// Returns `false` outside of a kernel thread.
pub fn is_cancelled() -> bool {
    try_enter(|_, scheduler, role| match role {
        Role::Thread(pid) => scheduler.is_cancelled(pid),
        Role::Interrupt | Role::External => false,
    })
    .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scheduler_with(prios: &[u8]) -> Scheduler {
        let mut scheduler = Scheduler::new();
        for (i, prio) in prios.iter().enumerate() {
            let pid = scheduler.reserve("test", *prio).unwrap();
            assert_eq!(pid as usize, i);
            scheduler.commit(pid, Cpu::DEFAULT_THREAD_DATA);
        }
        scheduler.start();
        scheduler.reschedule();
        scheduler
    }

    #[test]
    fn highest_priority_becomes_current() {
        let scheduler = scheduler_with(&[1, 4, 2]);
        assert_eq!(scheduler.current_pid(), Some(1));
    }

    #[test]
    fn reserve_rejects_invalid_priority() {
        let mut scheduler = Scheduler::new();
        assert_eq!(
            scheduler.reserve("x", SCHED_PRIO_LEVELS as u8),
            Err(SpawnError::InvalidPriority(SCHED_PRIO_LEVELS as u8))
        );
    }

    #[test]
    fn reserve_runs_out_of_slots() {
        let mut scheduler = Scheduler::new();
        for _ in 0..THREADS_NUMOF {
            scheduler.reserve("x", 0).unwrap();
        }
        assert_eq!(scheduler.reserve("x", 0), Err(SpawnError::NoFreeSlot));
    }

    #[test]
    fn reserved_slot_is_not_runnable_until_committed() {
        let mut scheduler = Scheduler::new();
        scheduler.start();
        let pid = scheduler.reserve("x", 3).unwrap();
        scheduler.reschedule();
        assert_eq!(scheduler.current_pid(), None);
        assert_eq!(scheduler.get_state(pid), Some(ThreadState::Paused));

        scheduler.commit(pid, Cpu::DEFAULT_THREAD_DATA);
        scheduler.reschedule();
        assert_eq!(scheduler.current_pid(), Some(pid));
    }

    #[test]
    fn released_slot_is_reused() {
        let mut scheduler = scheduler_with(&[1, 1]);
        scheduler.release(0);
        assert_eq!(scheduler.get_state(0), None);
        assert_eq!(scheduler.reserve("again", 2), Ok(0));
    }

    #[test]
    fn wake_classifies_against_current_priority() {
        let mut scheduler = scheduler_with(&[2, 1, 3]);
        // pid 2 runs; block the two others
        scheduler.block(0, ThreadState::SignalBlocked, None);
        scheduler.block(1, ThreadState::SignalBlocked, None);
        assert_eq!(scheduler.wake(1, WakeReason::Signaled), Wake::Posted);

        scheduler.block(2, ThreadState::SignalBlocked, None);
        scheduler.reschedule();
        assert_eq!(scheduler.current_pid(), Some(1));
        assert_eq!(scheduler.wake(0, WakeReason::Signaled), Wake::Preempt);
        // waking a running thread changes nothing
        assert_eq!(scheduler.wake(0, WakeReason::Signaled), Wake::Unchanged);
    }

    #[test]
    fn deadline_expires_after_exact_tick_count() {
        let mut scheduler = scheduler_with(&[1]);
        let (pid, deadline) = scheduler
            .prepare_block(Role::Thread(0), Timeout::Within(Duration::from_ticks(3)))
            .unwrap();
        scheduler.block(pid, ThreadState::Sleeping, deadline);

        scheduler.tick();
        scheduler.tick();
        assert!(scheduler.is_waiting(pid));
        scheduler.tick();
        assert!(!scheduler.is_waiting(pid));
        assert_eq!(scheduler.take_wake(pid), Some(WakeReason::Timeout));
    }

    #[test]
    fn prepare_block_rules() {
        let mut scheduler = scheduler_with(&[1]);
        let forever = Timeout::Forever;
        let zero = Timeout::Within(Duration::from_ticks(0));

        assert_eq!(
            scheduler.prepare_block(Role::Thread(0), Timeout::Immediate),
            Err(WaitError::Timeout)
        );
        assert_eq!(
            scheduler.prepare_block(Role::Thread(0), zero),
            Err(WaitError::Timeout)
        );
        assert_eq!(
            scheduler.prepare_block(Role::Interrupt, Timeout::Immediate),
            Err(WaitError::Timeout)
        );
        assert_eq!(
            scheduler.prepare_block(Role::Interrupt, forever),
            Err(WaitError::InterruptContext)
        );
        assert_eq!(
            scheduler.prepare_block(Role::Thread(0), forever),
            Ok((0, None))
        );

        scheduler.cancel(0);
        assert_eq!(
            scheduler.prepare_block(Role::Thread(0), forever),
            Err(WaitError::Cancelled)
        );
        assert_eq!(scheduler.admit(Role::Thread(0)), Err(WaitError::Cancelled));
    }

    #[test]
    fn cancel_wakes_blocked_thread() {
        let mut scheduler = scheduler_with(&[1, 2]);
        scheduler.block(0, ThreadState::SignalBlocked, None);
        assert_eq!(scheduler.cancel(0), Some(Wake::Posted));
        assert_eq!(scheduler.take_wake(0), Some(WakeReason::Cancelled));
        assert_eq!(scheduler.cancel(0), Some(Wake::Unchanged));
        assert_eq!(scheduler.cancel(7), None);
    }

    #[test]
    fn tick_rotates_equal_priorities() {
        let mut scheduler = scheduler_with(&[1, 1]);
        assert_eq!(scheduler.current_pid(), Some(0));
        scheduler.tick();
        scheduler.reschedule();
        assert_eq!(scheduler.current_pid(), Some(1));
        scheduler.tick();
        scheduler.reschedule();
        assert_eq!(scheduler.current_pid(), Some(0));
    }
}
