//! Event-driven consumer threads.
//!
//! A consumer thread loops forever: wait for the next event from a
//! [`Source`], process it, and handle starvation when the wait times out.
//! [`run`] implements the loop; it only ends when the consumer asks to stop
//! or the thread is deleted.
//!
//! ```no_run
//! use core::ops::ControlFlow;
//!
//! use relay_threads::{consumer, sync::Channel, time::Timeout};
//!
//! static SAMPLES: Channel<u16, 3> = Channel::new();
//!
//! fn consumer_thread() {
//!     let mut total = 0u32;
//!     let exit = consumer::run(&SAMPLES, Timeout::millis(1000), &mut |sample: u16| {
//!         total += u32::from(sample);
//!         ControlFlow::Continue(())
//!     });
//!     relay_debug::log::info!("consumer exited: {:?}", exit);
//! }
//! ```

use core::ops::ControlFlow;

use relay_debug::log::warn;

use crate::{
    sync::{Channel, Counter, Latest, Signal},
    time::Timeout,
    WaitError,
};

/// Something a thread can block on for events.
pub trait Source {
    type Item;

    /// Waits up to `timeout` for the next event.
    fn wait_for(&self, timeout: Timeout) -> Result<Self::Item, WaitError>;
}

impl Source for Signal {
    type Item = ();

    fn wait_for(&self, timeout: Timeout) -> Result<(), WaitError> {
        self.wait(timeout)
    }
}

impl Source for Counter {
    type Item = ();

    fn wait_for(&self, timeout: Timeout) -> Result<(), WaitError> {
        self.wait(timeout)
    }
}

impl<T, const N: usize> Source for Channel<T, N> {
    type Item = T;

    fn wait_for(&self, timeout: Timeout) -> Result<T, WaitError> {
        self.receive(timeout)
    }
}

impl<T> Source for Latest<T> {
    type Item = T;

    fn wait_for(&self, timeout: Timeout) -> Result<T, WaitError> {
        self.receive(timeout)
    }
}

impl<S: Source + ?Sized> Source for &S {
    type Item = S::Item;

    fn wait_for(&self, timeout: Timeout) -> Result<S::Item, WaitError> {
        (**self).wait_for(timeout)
    }
}

impl<S: Source + ?Sized> Source for std::sync::Arc<S> {
    type Item = S::Item;

    fn wait_for(&self, timeout: Timeout) -> Result<S::Item, WaitError> {
        (**self).wait_for(timeout)
    }
}

/// Handles the events of a consumer loop.
pub trait Consumer<E> {
    /// Processes one event.
    fn process(&mut self, event: E) -> ControlFlow<()>;

    /// Called when no event arrived within the loop's timeout.
    ///
    /// The default logs a warning and keeps waiting.
    fn on_timeout(&mut self) -> ControlFlow<()> {
        warn!(
            "consumer on thread {:?} timed out waiting for an event",
            crate::current_pid()
        );
        ControlFlow::Continue(())
    }
}

impl<E, F> Consumer<E> for F
where
    F: FnMut(E) -> ControlFlow<()>,
{
    fn process(&mut self, event: E) -> ControlFlow<()> {
        self(event)
    }
}

/// Why [`run`] returned.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Exit {
    /// The consumer returned [`ControlFlow::Break`].
    Stopped,
    /// The thread was deleted.
    Cancelled,
    /// Waiting failed for another reason, e.g. from interrupt context.
    Failed(WaitError),
}

/// Runs the consumer loop on the calling thread.
///
/// Cancellation is checked before every wait and observed during it.
pub fn run<S, C>(source: &S, timeout: Timeout, consumer: &mut C) -> Exit
where
    S: Source + ?Sized,
    C: Consumer<S::Item> + ?Sized,
{
    loop {
        if crate::is_cancelled() {
            return Exit::Cancelled;
        }
        let flow = match source.wait_for(timeout) {
            Ok(event) => consumer.process(event),
            Err(WaitError::Timeout) => consumer.on_timeout(),
            Err(WaitError::Cancelled) => return Exit::Cancelled,
            Err(err) => return Exit::Failed(err),
        };
        if flow.is_break() {
            return Exit::Stopped;
        }
    }
}
