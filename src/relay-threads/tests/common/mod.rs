#![allow(dead_code)]

use std::{
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};

use relay_threads::{Config, Kernel};

pub const LIMIT: Duration = Duration::from_secs(5);

pub fn manual_kernel() -> Kernel {
    relay_debug::init();
    Kernel::new(Config::manual())
}

/// Polls `condition` until it holds or [`LIMIT`] passes.
pub fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + LIMIT;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_micros(200));
    }
    condition()
}

/// Ordered log of what the threads did.
#[derive(Clone, Default)]
pub struct Trace<T = &'static str>(Arc<Mutex<Vec<T>>>);

impl<T: Clone> Trace<T> {
    pub fn new() -> Self {
        Self(Arc::new(Mutex::new(Vec::new())))
    }

    pub fn push(&self, entry: T) {
        self.0.lock().unwrap().push(entry);
    }

    pub fn snapshot(&self) -> Vec<T> {
        self.0.lock().unwrap().clone()
    }

    pub fn len(&self) -> usize {
        self.0.lock().unwrap().len()
    }

    /// Number of clones alive, this one included.
    pub fn handles(&self) -> usize {
        Arc::strong_count(&self.0)
    }
}

/// Lets all threads finish, then shuts the kernel down.
pub fn finish(kernel: Kernel) {
    assert!(kernel.wait_for_tasks(LIMIT), "threads did not finish");
    kernel.shutdown();
}
