//! CPU-specific parts of the scheduler.

pub(crate) trait Arch {
    /// What the scheduler needs to resume a thread.
    type ThreadData;

    const DEFAULT_THREAD_DATA: Self::ThreadData;

    /// Hands the CPU to the thread described by `data`.
    ///
    /// Called with the scheduler locked, after the thread was made current.
    fn switch_to(data: &Self::ThreadData);

    /// Suspends the calling thread until it is switched to.
    ///
    /// May return spuriously; callers re-check whether they are current.
    fn suspend();
}

cfg_if::cfg_if! {
    if #[cfg(not(target_os = "none"))] {
        mod hosted;
        pub(crate) use hosted::Cpu;
    } else {
        compile_error!("relay-threads only supports hosted targets");
    }
}

pub(crate) type ThreadData = <Cpu as Arch>::ThreadData;
