//! Single-core emulation on top of OS threads.
//!
//! Every kernel thread is an OS thread; the one the scheduler selected is
//! unparked, all others park in [`Arch::suspend`] until selected.

use std::thread::JoinHandle;

use super::Arch;

pub(crate) struct Cpu;

impl Arch for Cpu {
    /// Handle used to unpark the OS thread.
    type ThreadData = Option<std::thread::Thread>;

    const DEFAULT_THREAD_DATA: Self::ThreadData = None;

    fn switch_to(data: &Self::ThreadData) {
        if let Some(thread) = data {
            thread.unpark();
        }
    }

    fn suspend() {
        std::thread::park();
    }
}

impl Cpu {
    pub(crate) fn thread_data<T>(handle: &JoinHandle<T>) -> <Self as Arch>::ThreadData {
        Some(handle.thread().clone())
    }
}
