//! Kernel instances, thread creation and the hosted tick source.

use std::{
    any::Any,
    cell::{Cell, RefCell},
    panic::{catch_unwind, resume_unwind, AssertUnwindSafe},
    sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError, Weak},
    thread::JoinHandle,
    time::Duration as StdDuration,
};

use critical_section::CriticalSection;
use portable_atomic::{AtomicBool, Ordering};
use relay_debug::log::{debug, error, info, warn};

use crate::{
    arch::{Arch, Cpu},
    isr::{self, Wake},
    time::Instant,
    Scheduler, SpawnError, ThreadId, ThreadState, MIN_STACKSIZE, TICK_HZ,
};

/// What the calling OS thread currently executes as.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum Role {
    /// A kernel thread.
    Thread(ThreadId),
    /// Code inside [`Kernel::interrupt`].
    Interrupt,
    /// A [`Kernel`] method called by an OS thread that is not part of the
    /// kernel.
    External,
}

#[derive(Clone)]
pub(crate) struct Context {
    pub(crate) shared: Arc<Shared>,
    pub(crate) role: Role,
}

thread_local! {
    static CONTEXT: RefCell<Option<Context>> = const { RefCell::new(None) };
    static SWITCH_REQUESTED: Cell<bool> = const { Cell::new(false) };
}

pub(crate) fn context() -> Option<Context> {
    CONTEXT.with_borrow(Clone::clone)
}

fn set_context(context: Option<Context>) -> Option<Context> {
    CONTEXT.replace(context)
}

/// Records a context switch request of the running interrupt.
///
/// Returns `false` outside of interrupt context.
pub(crate) fn request_switch() -> bool {
    let in_interrupt = CONTEXT.with_borrow(|context| {
        context
            .as_ref()
            .is_some_and(|context| context.role == Role::Interrupt)
    });
    if in_interrupt {
        SWITCH_REQUESTED.set(true);
    }
    in_interrupt
}

/// How a kernel's time advances.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TickMode {
    /// A background thread raises the tick interrupt at [`TICK_HZ`].
    Periodic,
    /// Time only advances through [`Kernel::tick`] and [`Kernel::advance`].
    Manual,
}

/// Runtime configuration of a [`Kernel`].
#[derive(Copy, Clone, Debug)]
pub struct Config {
    pub tick: TickMode,
    /// How long [`Kernel::shutdown`] waits for cancelled threads to exit,
    /// and the upper bound for settling in [`Kernel::advance`].
    pub shutdown_grace: StdDuration,
}

impl Config {
    /// Configuration for deterministic tests: time only moves on request.
    pub const fn manual() -> Self {
        Self {
            tick: TickMode::Manual,
            shutdown_grace: StdDuration::from_secs(2),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            tick: TickMode::Periodic,
            shutdown_grace: StdDuration::from_secs(2),
        }
    }
}

struct Ticker {
    stop: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

/// State shared by all handles and threads of one kernel.
pub(crate) struct Shared {
    scheduler: critical_section::Mutex<RefCell<Scheduler>>,
    config: Config,
    handles: Mutex<Vec<JoinHandle<()>>>,
    live: Mutex<usize>,
    exited: Condvar,
    panics: Mutex<Vec<Box<dyn Any + Send>>>,
    ticker: Mutex<Option<Ticker>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    // Thread panics are caught before they could poison these.
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Shared {
    /// Runs `f` with the scheduler locked, as `role`.
    ///
    /// See [`crate::enter`].
    pub(crate) fn enter_as<F, R>(&self, role: Role, f: F) -> R
    where
        F: FnOnce(CriticalSection<'_>, &mut Scheduler, Role) -> R,
    {
        if let Role::Thread(pid) = role {
            self.wait_until_current(pid);
        }
        let result = critical_section::with(|cs| {
            let mut scheduler = self.scheduler.borrow_ref_mut(cs);
            let result = f(cs, &mut scheduler, role);
            if role != Role::Interrupt {
                scheduler.reschedule();
            }
            result
        });
        if let Role::Thread(pid) = role {
            self.wait_until_current(pid);
        }
        result
    }

    /// Parks the calling OS thread until `pid` owns the CPU.
    fn wait_until_current(&self, pid: ThreadId) {
        while !self.inspect(|scheduler| scheduler.current_pid() == Some(pid)) {
            Cpu::suspend();
        }
    }

    fn inspect<R>(&self, f: impl FnOnce(&Scheduler) -> R) -> R {
        critical_section::with(|cs| f(&self.scheduler.borrow_ref(cs)))
    }

    fn with_scheduler<R>(&self, f: impl FnOnce(&mut Scheduler) -> R) -> R {
        critical_section::with(|cs| f(&mut self.scheduler.borrow_ref_mut(cs)))
    }

    /// Removes an exiting thread and hands the CPU on.
    fn exit(&self, pid: ThreadId) {
        self.wait_until_current(pid);
        self.with_scheduler(|scheduler| {
            scheduler.release(pid);
            scheduler.reschedule();
        });
        let mut live = lock(&self.live);
        *live = live.saturating_sub(1);
        self.exited.notify_all();
    }
}

/// Handle to a scheduler instance.
///
/// Cloning is cheap; all clones refer to the same kernel. Threads and
/// interrupts of a kernel can reach it through [`crate::current_kernel`].
#[derive(Clone)]
pub struct Kernel {
    shared: Arc<Shared>,
}

impl core::fmt::Debug for Kernel {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Kernel")
            .field("config", &self.shared.config)
            .finish_non_exhaustive()
    }
}

impl Default for Kernel {
    fn default() -> Self {
        Self::new(Config::default())
    }
}

impl Kernel {
    /// Creates a kernel without threads.
    ///
    /// Threads can be spawned right away but only run after
    /// [`Kernel::start`].
    pub fn new(config: Config) -> Self {
        Self {
            shared: Arc::new(Shared {
                scheduler: critical_section::Mutex::new(RefCell::new(Scheduler::new())),
                config,
                handles: Mutex::new(Vec::new()),
                live: Mutex::new(0),
                exited: Condvar::new(),
                panics: Mutex::new(Vec::new()),
                ticker: Mutex::new(None),
            }),
        }
    }

    pub(crate) fn from_shared(shared: Arc<Shared>) -> Self {
        Self { shared }
    }

    pub fn config(&self) -> &Config {
        &self.shared.config
    }

    /// Whether the calling OS thread belongs to this kernel.
    fn own_role(&self) -> Option<Role> {
        CONTEXT.with_borrow(|context| {
            context
                .as_ref()
                .filter(|context| Arc::ptr_eq(&context.shared, &self.shared))
                .map(|context| context.role)
        })
    }

    /// Kernel call on behalf of whoever calls a [`Kernel`] method.
    fn enter<F, R>(&self, f: F) -> R
    where
        F: FnOnce(CriticalSection<'_>, &mut Scheduler, Role) -> R,
    {
        let role = self.own_role().unwrap_or(Role::External);
        self.shared.enter_as(role, f)
    }

    /// Spawns a thread with default stack size.
    ///
    /// `priority` must be below [`crate::SCHED_PRIO_LEVELS`]; higher numbers
    /// preempt lower ones.
    pub fn spawn<F>(&self, name: &'static str, priority: u8, f: F) -> Result<ThreadId, SpawnError>
    where
        F: FnOnce() + Send + 'static,
    {
        Builder::new().name(name).priority(priority).spawn(self, f)
    }

    fn spawn_with<F>(&self, builder: Builder, f: F) -> Result<ThreadId, SpawnError>
    where
        F: FnOnce() + Send + 'static,
    {
        let Builder {
            name,
            priority,
            stacksize,
        } = builder;

        let pid = self
            .enter(|_, scheduler, _| scheduler.reserve(name, priority))
            .inspect_err(|err| error!("cannot spawn thread {}: {:?}", name, err))?;

        let shared = self.shared.clone();
        let spawned = std::thread::Builder::new()
            .name(name.into())
            .stack_size(stacksize.max(MIN_STACKSIZE))
            .spawn(move || thread_main(shared, pid, f));
        let handle = match spawned {
            Ok(handle) => handle,
            Err(err) => {
                self.enter(|_, scheduler, _| scheduler.release(pid));
                let err = SpawnError::Os(err.kind());
                error!("cannot spawn thread {}: {:?}", name, err);
                return Err(err);
            }
        };

        let data = Cpu::thread_data(&handle);
        *lock(&self.shared.live) += 1;
        lock(&self.shared.handles).push(handle);
        debug!("spawned thread {} ({}) at priority {}", pid, name, priority);

        self.enter(|_, scheduler, _| scheduler.commit(pid, data));
        Ok(pid)
    }

    /// Starts scheduling.
    ///
    /// Calling this more than once has no effect.
    pub fn start(&self) {
        let first = self.enter(|_, scheduler, _| {
            let first = !scheduler.is_started();
            scheduler.start();
            first
        });
        if !first {
            return;
        }
        debug!("kernel started");
        if self.shared.config.tick == TickMode::Periodic {
            self.start_ticker();
        }
    }

    pub fn is_started(&self) -> bool {
        self.shared.inspect(|scheduler| scheduler.is_started())
    }

    fn start_ticker(&self) {
        let stop = Arc::new(AtomicBool::new(false));
        let weak: Weak<Shared> = Arc::downgrade(&self.shared);
        let period = StdDuration::from_nanos(1_000_000_000 / u64::from(TICK_HZ));
        let stop_flag = stop.clone();
        let spawned = std::thread::Builder::new()
            .name("relay-tick".into())
            .spawn(move || {
                while !stop_flag.load(Ordering::Acquire) {
                    std::thread::sleep(period);
                    let Some(shared) = weak.upgrade() else {
                        break;
                    };
                    Kernel::from_shared(shared).tick();
                }
            });
        match spawned {
            Ok(handle) => *lock(&self.shared.ticker) = Some(Ticker { stop, handle }),
            Err(err) => error!("cannot start tick thread: {:?}", err.kind()),
        }
    }

    /// Runs `f` in interrupt context.
    ///
    /// Primitives given inside `f` never block; blocking calls with a
    /// non-zero timeout fail with [`crate::WaitError::InterruptContext`].
    /// If `f` calls [`isr::yield_from_isr`] with a wake that needs a switch,
    /// the scheduler runs when `f` returns. When called from one of this
    /// kernel's threads, that thread resumes only once it is current again.
    pub fn interrupt<R>(&self, f: impl FnOnce() -> R) -> R {
        let previous = set_context(Some(Context {
            shared: self.shared.clone(),
            role: Role::Interrupt,
        }));
        let outer_request = SWITCH_REQUESTED.replace(false);

        let result = catch_unwind(AssertUnwindSafe(f));

        let requested = SWITCH_REQUESTED.replace(outer_request);
        let interrupted = previous
            .as_ref()
            .filter(|context| Arc::ptr_eq(&context.shared, &self.shared))
            .map(|context| context.role);
        set_context(previous);

        let result = match result {
            Ok(result) => result,
            Err(payload) => resume_unwind(payload),
        };

        match interrupted {
            // Nested: the outermost interrupt performs the switch.
            Some(Role::Interrupt) => SWITCH_REQUESTED.set(outer_request || requested),
            interrupted => {
                self.shared.with_scheduler(|scheduler| {
                    if requested || scheduler.current_pid().is_none() {
                        scheduler.reschedule();
                    }
                });
                if let Some(Role::Thread(pid)) = interrupted {
                    self.shared.wait_until_current(pid);
                }
            }
        }
        result
    }

    /// Runs `f` with its kernel calls going to this kernel.
    ///
    /// Inside this kernel's threads and interrupts `f` runs as is; any other
    /// caller acts as [`Role::External`] for the duration of `f`, so it
    /// cannot block.
    pub(crate) fn with_context<R>(&self, f: impl FnOnce() -> R) -> R {
        if self.own_role().is_some() {
            return f();
        }
        let previous = set_context(Some(Context {
            shared: self.shared.clone(),
            role: Role::External,
        }));
        let result = catch_unwind(AssertUnwindSafe(f));
        set_context(previous);
        result.unwrap_or_else(|payload| resume_unwind(payload))
    }

    /// Raises one tick interrupt.
    pub fn tick(&self) {
        self.interrupt(|| {
            crate::enter(|_, scheduler, _| scheduler.tick());
            isr::yield_from_isr(Wake::Preempt);
        });
    }

    /// Raises `ticks` tick interrupts.
    ///
    /// After every tick this waits (up to [`Config::shutdown_grace`]) until
    /// no thread is runnable, so threads woken by a tick reach their next
    /// blocking call before the next tick.
    pub fn advance(&self, ticks: u64) {
        for _ in 0..ticks {
            self.tick();
            self.settle(self.shared.config.shutdown_grace);
        }
    }

    /// Waits until no thread is runnable.
    ///
    /// Returns `false` if threads were still runnable after `timeout`.
    pub fn settle(&self, timeout: StdDuration) -> bool {
        let deadline = std::time::Instant::now() + timeout;
        loop {
            let idle = self
                .shared
                .inspect(|scheduler| scheduler.is_started() && scheduler.is_idle());
            if idle {
                return true;
            }
            if std::time::Instant::now() >= deadline {
                return false;
            }
            std::thread::sleep(StdDuration::from_micros(100));
        }
    }

    /// Returns the kernel's current time.
    pub fn now(&self) -> Instant {
        self.shared.inspect(|scheduler| scheduler.now())
    }

    /// Returns the state of a thread of this kernel.
    pub fn get_state(&self, pid: ThreadId) -> Option<ThreadState> {
        self.shared.inspect(|scheduler| scheduler.get_state(pid))
    }

    /// Asks a thread to terminate, see [`crate::delete`].
    pub fn delete(&self, pid: ThreadId) -> bool {
        self.enter(|_, scheduler, _| scheduler.cancel(pid).is_some())
    }

    /// Number of threads that have not exited yet.
    pub fn thread_count(&self) -> usize {
        *lock(&self.shared.live)
    }

    /// Blocks the calling OS thread until all threads exited.
    ///
    /// Returns `false` if threads were still alive after `timeout`.
    pub fn wait_for_tasks(&self, timeout: StdDuration) -> bool {
        let live = lock(&self.shared.live);
        let (live, _) = self
            .shared
            .exited
            .wait_timeout_while(live, timeout, |live| *live > 0)
            .unwrap_or_else(PoisonError::into_inner);
        *live == 0
    }

    /// Cancels all threads, waits for them to exit and stops the tick source.
    ///
    /// Threads that ignore cancellation for longer than
    /// [`Config::shutdown_grace`] are left behind.
    ///
    /// # Panics
    ///
    /// Re-raises the first panic of any of the kernel's threads. Panics if
    /// called from one of the kernel's own threads or interrupts.
    pub fn shutdown(self) {
        assert!(
            self.own_role().is_none(),
            "Kernel::shutdown called from inside the kernel"
        );
        info!("shutting down");

        self.enter(|_, scheduler, _| {
            let pids: Vec<ThreadId> = scheduler.pids().collect();
            for pid in pids {
                scheduler.cancel(pid);
            }
        });
        self.start();

        let clean = self.wait_for_tasks(self.shared.config.shutdown_grace);
        if !clean {
            warn!(
                "{} threads did not exit within the grace period",
                self.thread_count()
            );
        }

        if let Some(Ticker { stop, handle }) = lock(&self.shared.ticker).take() {
            stop.store(true, Ordering::Release);
            let _ = handle.join();
        }

        let handles = core::mem::take(&mut *lock(&self.shared.handles));
        for handle in handles {
            if clean || handle.is_finished() {
                // Panics were caught in the thread.
                let _ = handle.join();
            }
        }

        let first_panic = lock(&self.shared.panics).drain(..).next();
        if let Some(payload) = first_panic {
            resume_unwind(payload);
        }
    }
}

/// Body of every kernel thread's OS thread.
fn thread_main<F: FnOnce()>(shared: Arc<Shared>, pid: ThreadId, f: F) {
    set_context(Some(Context {
        shared: shared.clone(),
        role: Role::Thread(pid),
    }));
    shared.wait_until_current(pid);

    let cancelled = shared.with_scheduler(|scheduler| scheduler.is_cancelled(pid));
    if cancelled {
        debug!("thread {} cancelled before it ran", pid);
    } else if let Err(payload) = catch_unwind(AssertUnwindSafe(f)) {
        error!("thread {} panicked: {}", pid, panic_message(&*payload));
        lock(&shared.panics).push(payload);
    }

    debug!("thread {} exited", pid);
    shared.exit(pid);
    set_context(None);
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else {
        "<non-string panic payload>"
    }
}

/// Thread factory, which can be used in order to configure the properties of
/// a new thread.
#[derive(Copy, Clone, Debug)]
pub struct Builder {
    name: &'static str,
    priority: u8,
    stacksize: usize,
}

impl Default for Builder {
    fn default() -> Self {
        Self::new()
    }
}

impl Builder {
    pub const fn new() -> Self {
        Self {
            name: "unnamed",
            priority: 0,
            stacksize: MIN_STACKSIZE,
        }
    }

    pub const fn name(mut self, name: &'static str) -> Self {
        self.name = name;
        self
    }

    pub const fn priority(mut self, priority: u8) -> Self {
        self.priority = priority;
        self
    }

    /// Stack size in bytes; raised to [`MIN_STACKSIZE`] if smaller.
    pub const fn stacksize(mut self, stacksize: usize) -> Self {
        self.stacksize = stacksize;
        self
    }

    /// Spawns the configured thread on `kernel`.
    pub fn spawn<F>(self, kernel: &Kernel, f: F) -> Result<ThreadId, SpawnError>
    where
        F: FnOnce() + Send + 'static,
    {
        kernel.spawn_with(self, f)
    }
}
