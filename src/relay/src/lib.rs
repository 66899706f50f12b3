//! relay hands events from interrupt context to threads of a fixed-priority
//! preemptive scheduler.
//!
//! [`thread`] holds the scheduler, the primitives ([`thread::sync`]), the
//! consumer thread pattern and software timers; [`debug`] holds console
//! output and the logging macros.
//!
//! ```
//! use relay::thread::{sync::Counter, time::Timeout, Config, Kernel};
//!
//! static EVENTS: Counter = Counter::new(10, 0);
//!
//! let kernel = Kernel::new(Config::default());
//! kernel
//!     .spawn("handler", 2, || {
//!         while EVENTS.wait(Timeout::millis(50)).is_ok() {
//!             relay::debug::println!("event");
//!         }
//!     })
//!     .unwrap();
//! kernel.start();
//! kernel.interrupt(|| {
//!     let wake = EVENTS.signal().merge(EVENTS.signal());
//!     relay::thread::isr::yield_from_isr(wake);
//! });
//! assert!(kernel.wait_for_tasks(std::time::Duration::from_secs(5)));
//! kernel.shutdown();
//! ```
//!
//! # Cargo features
#![doc = document_features::document_features!(feature_label = r#"<span class="stab portability"><code>{feature}</code></span>"#)]

#[doc(inline)]
pub use relay_debug as debug;
#[doc(inline)]
pub use relay_threads as thread;

/// Third party crates that appear in relay's public API.
pub mod reexports {
    pub use fugit;
}
