//! Events that carry their origin.
//!
//! Sending a [`Tagged`] record through a [`crate::sync::Channel`] keeps the
//! source and time of every event together with its payload, where a bare
//! counter would lose which source fired.

use crate::time::Instant;

/// An event stamped with its source and the tick it was raised at.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Tagged<S, P> {
    pub source: S,
    pub timestamp: Instant,
    pub payload: P,
}

impl<S, P> Tagged<S, P> {
    /// Tags `payload` with `source` and the current kernel time.
    ///
    /// # Panics
    ///
    /// Panics outside of a kernel thread or interrupt.
    pub fn new(source: S, payload: P) -> Self {
        Self::at(source, crate::now(), payload)
    }

    pub const fn at(source: S, timestamp: Instant, payload: P) -> Self {
        Self {
            source,
            timestamp,
            payload,
        }
    }

    /// Replaces the payload, keeping source and timestamp.
    pub fn map<Q>(self, f: impl FnOnce(P) -> Q) -> Tagged<S, Q> {
        Tagged {
            source: self.source,
            timestamp: self.timestamp,
            payload: f(self.payload),
        }
    }
}
