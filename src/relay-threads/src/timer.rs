//! Software timers.
//!
//! A [`TimerService`] owns a daemon thread that keeps the timers' expiry
//! bookkeeping and runs their callbacks. Timers are controlled by commands
//! sent over a queue of [`TIMER_QUEUE_LENGTH`] entries; every command
//! carries the tick it was issued at, so a timer started at tick `t` with
//! period `p` expires at `t + p` no matter when the daemon gets to it.
//!
//! Callbacks run on the daemon thread, one at a time. A callback that
//! controls timers itself has its commands applied directly instead of
//! queued, so it cannot deadlock on a full queue.

use core::cell::RefCell;
use std::sync::Arc;

use critical_section::Mutex;
use portable_atomic::{AtomicU16, AtomicU32, Ordering};
use relay_debug::log::{debug, error};

use crate::{
    isr::Wake,
    kernel::{self, Role},
    sync::Channel,
    time::{Duration, Instant, Timeout},
    Kernel, SpawnError, ThreadId, TimerError, WaitError, TIMER_QUEUE_LENGTH,
};

pub type TimerId = u32;

/// Whether a timer re-arms after it expired.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Mode {
    OneShot,
    /// Re-arms from the previous expiry, so the period does not drift.
    AutoReload,
}

/// Passed to a timer's callback.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Expiry {
    pub id: TimerId,
    pub name: &'static str,
    /// How many times this timer expired so far, including this one.
    pub count: u32,
    /// The tick the timer was due at.
    pub at: Instant,
}

type Callback = Box<dyn FnMut(&Expiry) + Send>;

struct Slot {
    id: TimerId,
    name: &'static str,
    period: Duration,
    mode: Mode,
    expiry: Option<Instant>,
    count: u32,
    /// `None` while the daemon runs it.
    callback: Option<Callback>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Op {
    Start,
    Stop,
    Reset,
    ChangePeriod(Duration),
    Delete,
}

#[derive(Copy, Clone, Debug)]
struct Command {
    id: TimerId,
    op: Op,
    issued: Instant,
}

/// Outside the range of [`ThreadId`].
const NO_DAEMON: u16 = u16::MAX;

fn daemon_from_raw(raw: u16) -> Option<ThreadId> {
    ThreadId::try_from(raw).ok()
}

struct Inner {
    kernel: Kernel,
    commands: Channel<Command, TIMER_QUEUE_LENGTH>,
    slots: Mutex<RefCell<Vec<Slot>>>,
    next_id: AtomicU32,
    daemon: AtomicU16,
}

impl Inner {
    fn daemon_pid(&self) -> Option<ThreadId> {
        daemon_from_raw(self.daemon.load(Ordering::Acquire))
    }

    /// Whether the caller is the daemon thread itself (i.e. a callback).
    fn on_daemon(&self) -> bool {
        let Some(daemon) = self.daemon_pid() else {
            return false;
        };
        kernel::context().is_some_and(|context| context.role == Role::Thread(daemon))
    }

    fn run(&self) {
        if let Some(pid) = crate::current_pid() {
            self.daemon.store(u16::from(pid), Ordering::Release);
        }
        debug!("timer service running");

        loop {
            let timeout = match self.next_expiry() {
                None => Timeout::Forever,
                Some(at) => match at.checked_duration_since(crate::now()) {
                    Some(remaining) => Timeout::Within(remaining),
                    None => Timeout::Immediate,
                },
            };
            match self.commands.receive(timeout) {
                Ok(command) => self.apply(command),
                Err(WaitError::Timeout) => {}
                Err(WaitError::Cancelled) => break,
                Err(err) => {
                    error!("timer service stopped: {:?}", err);
                    break;
                }
            }
            self.fire_due(crate::now());
        }

        debug!("timer service stopped");
    }

    fn next_expiry(&self) -> Option<Instant> {
        critical_section::with(|cs| {
            self.slots
                .borrow_ref(cs)
                .iter()
                .filter_map(|slot| slot.expiry)
                .min()
        })
    }

    fn apply(&self, command: Command) {
        critical_section::with(|cs| {
            let mut slots = self.slots.borrow_ref_mut(cs);
            let Some(index) = slots.iter().position(|slot| slot.id == command.id) else {
                // deleted meanwhile
                return;
            };
            if command.op == Op::Delete {
                slots.remove(index);
                return;
            }
            let Some(slot) = slots.get_mut(index) else {
                return;
            };
            match command.op {
                Op::Start | Op::Reset => slot.expiry = Some(command.issued + slot.period),
                Op::Stop => slot.expiry = None,
                Op::ChangePeriod(period) => {
                    slot.period = period;
                    slot.expiry = Some(command.issued + period);
                }
                Op::Delete => {}
            }
        });
    }

    /// Runs the callbacks of all timers due at `now`, earliest first.
    ///
    /// An auto-reload timer that missed several periods fires once per
    /// missed period.
    fn fire_due(&self, now: Instant) {
        loop {
            let due = critical_section::with(|cs| {
                let mut slots = self.slots.borrow_ref_mut(cs);
                let slot = slots
                    .iter_mut()
                    .filter(|slot| slot.expiry.is_some_and(|at| at <= now))
                    .min_by_key(|slot| slot.expiry)?;
                let at = slot.expiry?;
                let callback = slot.callback.take()?;
                slot.count = slot.count.wrapping_add(1);
                slot.expiry = match slot.mode {
                    Mode::AutoReload => Some(at + slot.period),
                    Mode::OneShot => None,
                };
                let expiry = Expiry {
                    id: slot.id,
                    name: slot.name,
                    count: slot.count,
                    at,
                };
                Some((expiry, callback))
            });
            let Some((expiry, mut callback)) = due else {
                break;
            };

            callback(&expiry);

            critical_section::with(|cs| {
                let mut slots = self.slots.borrow_ref_mut(cs);
                if let Some(slot) = slots.iter_mut().find(|slot| slot.id == expiry.id) {
                    slot.callback = Some(callback);
                }
            });
        }
    }

    fn with_slot<R>(&self, id: TimerId, f: impl FnOnce(&Slot) -> R) -> Option<R> {
        critical_section::with(|cs| self.slots.borrow_ref(cs).iter().find(|slot| slot.id == id).map(f))
    }
}

/// Handle to the timer daemon.
#[derive(Clone)]
pub struct TimerService {
    inner: Arc<Inner>,
}

impl TimerService {
    /// Spawns the timer daemon on `kernel` at `priority`.
    ///
    /// The daemon exits when the kernel shuts down.
    pub fn spawn(kernel: &Kernel, priority: u8) -> Result<Self, SpawnError> {
        let inner = Arc::new(Inner {
            kernel: kernel.clone(),
            commands: Channel::new(),
            slots: Mutex::new(RefCell::new(Vec::new())),
            next_id: AtomicU32::new(0),
            daemon: AtomicU16::new(NO_DAEMON),
        });
        let daemon = inner.clone();
        let pid = kernel.spawn("timer", priority, move || daemon.run())?;
        inner.daemon.store(u16::from(pid), Ordering::Release);
        Ok(Self { inner })
    }

    /// Creates a dormant timer.
    ///
    /// `callback` runs on the daemon thread every time the timer expires.
    ///
    /// # Panics
    ///
    /// Panics if `period` is zero.
    pub fn create<F>(&self, name: &'static str, period: Duration, mode: Mode, callback: F) -> Timer
    where
        F: FnMut(&Expiry) + Send + 'static,
    {
        assert!(period.ticks() > 0, "timer period must not be zero");
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        critical_section::with(|cs| {
            self.inner.slots.borrow_ref_mut(cs).push(Slot {
                id,
                name,
                period,
                mode,
                expiry: None,
                count: 0,
                callback: Some(Box::new(callback)),
            });
        });
        debug!("timer {} ({}) created", id, name);
        Timer {
            id,
            inner: self.inner.clone(),
        }
    }

    /// The daemon's thread id.
    pub fn daemon(&self) -> Option<ThreadId> {
        self.inner.daemon_pid()
    }
}

/// Handle to one software timer.
#[derive(Clone)]
pub struct Timer {
    id: TimerId,
    inner: Arc<Inner>,
}

impl core::fmt::Debug for Timer {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Timer").field("id", &self.id).finish_non_exhaustive()
    }
}

impl Timer {
    pub fn id(&self) -> TimerId {
        self.id
    }

    /// Returns `None` once the timer was deleted.
    pub fn name(&self) -> Option<&'static str> {
        self.inner.with_slot(self.id, |slot| slot.name)
    }

    pub fn period(&self) -> Option<Duration> {
        self.inner.with_slot(self.id, |slot| slot.period)
    }

    /// Whether the timer is armed.
    pub fn is_active(&self) -> bool {
        self.inner
            .with_slot(self.id, |slot| slot.expiry.is_some())
            .unwrap_or(false)
    }

    /// Number of times the timer expired so far.
    pub fn expiry_count(&self) -> Option<u32> {
        self.inner.with_slot(self.id, |slot| slot.count)
    }

    fn command(&self, op: Op) -> Result<Command, TimerError> {
        if self.inner.with_slot(self.id, |_| ()).is_none() {
            return Err(TimerError::Deleted);
        }
        Ok(Command {
            id: self.id,
            op,
            issued: self.inner.kernel.now(),
        })
    }

    fn send(&self, op: Op, timeout: Timeout) -> Result<(), TimerError> {
        let command = self.command(op)?;
        if self.inner.on_daemon() {
            self.inner.apply(command);
            return Ok(());
        }
        self.inner
            .kernel
            .with_context(|| self.inner.commands.send(command, timeout))
            .map_err(|err| TimerError::from(err.reason))
    }

    fn send_from_isr(&self, op: Op) -> Result<Wake, TimerError> {
        let command = self.command(op)?;
        self.inner
            .kernel
            .with_context(|| self.inner.commands.try_send(command))
            .map_err(|_| TimerError::QueueFull)
    }

    /// Arms the timer to expire one period from now.
    ///
    /// Starting an armed timer restarts it.
    ///
    /// Like all commands, this can be issued from any OS thread, also before
    /// the kernel started. Outside of the kernel's threads it cannot wait for
    /// queue space: a full queue fails with [`TimerError::QueueFull`] for
    /// [`Timeout::Immediate`] and [`TimerError::InterruptContext`] otherwise.
    pub fn start(&self, timeout: Timeout) -> Result<(), TimerError> {
        self.send(Op::Start, timeout)
    }

    pub fn stop(&self, timeout: Timeout) -> Result<(), TimerError> {
        self.send(Op::Stop, timeout)
    }

    /// Re-arms the timer to expire one period from now.
    pub fn reset(&self, timeout: Timeout) -> Result<(), TimerError> {
        self.send(Op::Reset, timeout)
    }

    /// Sets a new period and arms the timer to expire one new period from
    /// now.
    ///
    /// # Panics
    ///
    /// Panics if `period` is zero.
    pub fn change_period(&self, period: Duration, timeout: Timeout) -> Result<(), TimerError> {
        assert!(period.ticks() > 0, "timer period must not be zero");
        self.send(Op::ChangePeriod(period), timeout)
    }

    /// Deletes the timer; its callback is dropped.
    pub fn delete(&self, timeout: Timeout) -> Result<(), TimerError> {
        self.send(Op::Delete, timeout)
    }

    pub fn start_from_isr(&self) -> Result<Wake, TimerError> {
        self.send_from_isr(Op::Start)
    }

    pub fn stop_from_isr(&self) -> Result<Wake, TimerError> {
        self.send_from_isr(Op::Stop)
    }

    pub fn reset_from_isr(&self) -> Result<Wake, TimerError> {
        self.send_from_isr(Op::Reset)
    }
}
