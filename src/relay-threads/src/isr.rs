//! Interrupt-to-thread handoff.
//!
//! Every primitive call that can be made from interrupt context returns a
//! [`Wake`] describing what it did to the scheduler. The interrupt handler
//! passes it (or several, combined with [`Wake::merge`]) to
//! [`yield_from_isr`], and the context switch happens when the interrupt
//! returns.

use relay_debug::log::trace;

/// Effect of a primitive operation on scheduling.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Wake {
    /// Nothing changed.
    Unchanged,
    /// State changed, but no thread of higher priority than the interrupted
    /// one became ready.
    Posted,
    /// A thread of higher priority than the interrupted one became ready.
    Preempt,
}

impl Wake {
    /// Whether the interrupt should switch context on exit.
    pub fn needs_switch(self) -> bool {
        self == Wake::Preempt
    }

    /// Combines the results of two operations.
    #[must_use]
    pub fn merge(self, other: Wake) -> Wake {
        self.max(other)
    }
}

impl From<Wake> for bool {
    fn from(wake: Wake) -> Self {
        wake.needs_switch()
    }
}

/// Requests a context switch at interrupt exit if `wake` needs one.
///
/// Outside of interrupt context this does nothing: threads reschedule at
/// every kernel call anyway.
pub fn yield_from_isr(wake: Wake) {
    if wake.needs_switch() && !crate::kernel::request_switch() {
        trace!("yield_from_isr outside of interrupt context");
    }
}
