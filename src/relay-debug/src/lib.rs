//! Console output and logging macros.
//!
//! The backend is chosen by feature: `defmt` takes precedence over `log`; with
//! neither enabled every macro is a no-op that still evaluates its arguments.

#![cfg_attr(not(any(test, feature = "log")), no_std)]

cfg_if::cfg_if! {
    if #[cfg(feature = "log")] {
        mod backend {
            use std::io::Write as _;

            use log::{Level, LevelFilter, Log, Metadata, Record};

            pub use std::{print, println};

            pub const EXIT_SUCCESS: Result<(), ()> = Ok(());
            pub const EXIT_FAILURE: Result<(), ()> = Err(());

            /// Terminates the process with a status matching `code`.
            pub fn exit(code: Result<(), ()>) -> ! {
                std::process::exit(if code.is_ok() { 0 } else { 1 })
            }

            /// Environment variable selecting the console log level.
            pub const LOG_LEVEL_ENV: &str = "RELAY_LOG";

            struct Console {
                level: LevelFilter,
            }

            impl Log for Console {
                fn enabled(&self, metadata: &Metadata) -> bool {
                    metadata.level() <= self.level
                }

                fn log(&self, record: &Record) {
                    if !self.enabled(record.metadata()) {
                        return;
                    }
                    let level = match record.level() {
                        Level::Error => "ERROR",
                        Level::Warn => "WARN ",
                        Level::Info => "INFO ",
                        Level::Debug => "DEBUG",
                        Level::Trace => "TRACE",
                    };
                    // Console output is best effort.
                    let _ = writeln!(
                        std::io::stderr().lock(),
                        "{level} [{}] {}",
                        record.target(),
                        record.args()
                    );
                }

                fn flush(&self) {
                    let _ = std::io::stderr().flush();
                }
            }

            /// Parses a `RELAY_LOG` value, e.g. `"debug"` or `"WARN"`.
            pub fn parse_level(value: &str) -> Option<LevelFilter> {
                value.trim().parse().ok()
            }

            /// Installs the stderr console logger.
            ///
            /// The level is read from `RELAY_LOG` and defaults to `info`.
            /// Calling this more than once, or after another logger was
            /// installed, keeps the first logger.
            pub fn init() {
                let level = std::env::var(LOG_LEVEL_ENV)
                    .ok()
                    .as_deref()
                    .and_then(parse_level)
                    .unwrap_or(LevelFilter::Info);

                if log::set_boxed_logger(Box::new(Console { level })).is_ok() {
                    log::set_max_level(level);
                }
            }
        }
    } else {
        mod backend {
            pub const EXIT_SUCCESS: Result<(), ()> = Ok(());
            pub const EXIT_FAILURE: Result<(), ()> = Err(());
            pub fn exit(_code: Result<(), ()>) -> ! {
                #[allow(clippy::empty_loop)]
                loop {}
            }
            pub fn init() {}

            #[macro_export]
            macro_rules! nop_println {
                ($($arg:tt)*) => {{
                    let _ = ($($arg)*);
                    // Do nothing
                }};
            }

            #[macro_export]
            macro_rules! nop_print {
                ($($arg:tt)*) => {{
                    let _ = ($($arg)*);
                    // Do nothing
                }};
            }

            pub use nop_print as print;
            pub use nop_println as println;
        }
    }
}

pub use backend::*;

cfg_if::cfg_if! {
    if #[cfg(feature = "defmt")] {
        pub mod log {
            #[doc(hidden)]
            pub use defmt;

            #[macro_export]
            macro_rules! __trace {
                ($($arg:tt)*) => {{
                    use $crate::log::defmt;
                    defmt::trace!($($arg)*);
                }};
            }

            #[macro_export]
            macro_rules! __debug {
                ($($arg:tt)*) => {{
                    use $crate::log::defmt;
                    defmt::debug!($($arg)*);
                }};
            }

            #[macro_export]
            macro_rules! __info {
                ($($arg:tt)*) => {{
                    use $crate::log::defmt;
                    defmt::info!($($arg)*);
                }};
            }

            #[macro_export]
            macro_rules! __warn {
                ($($arg:tt)*) => {{
                    use $crate::log::defmt;
                    defmt::warn!($($arg)*);
                }};
            }

            #[macro_export]
            macro_rules! __error {
                ($($arg:tt)*) => {{
                    use $crate::log::defmt;
                    defmt::error!($($arg)*);
                }};
            }

            pub use __debug as debug;
            pub use __error as error;
            pub use __info as info;
            pub use __trace as trace;
            pub use __warn as warn;
        }
    } else if #[cfg(feature = "log")] {
        pub mod log {
            #[doc(hidden)]
            pub use ::log as facade;

            #[macro_export]
            macro_rules! __trace {
                ($($arg:tt)*) => {{
                    $crate::log::facade::trace!($($arg)*);
                }};
            }

            #[macro_export]
            macro_rules! __debug {
                ($($arg:tt)*) => {{
                    $crate::log::facade::debug!($($arg)*);
                }};
            }

            #[macro_export]
            macro_rules! __info {
                ($($arg:tt)*) => {{
                    $crate::log::facade::info!($($arg)*);
                }};
            }

            #[macro_export]
            macro_rules! __warn {
                ($($arg:tt)*) => {{
                    $crate::log::facade::warn!($($arg)*);
                }};
            }

            #[macro_export]
            macro_rules! __error {
                ($($arg:tt)*) => {{
                    $crate::log::facade::error!($($arg)*);
                }};
            }

            pub use __debug as debug;
            pub use __error as error;
            pub use __info as info;
            pub use __trace as trace;
            pub use __warn as warn;
        }
    } else {
        pub mod log {
            #[macro_export]
            macro_rules! __stub {
                ($($arg:tt)*) => {{
                    let _ = ($($arg)*); // Do nothing
                }};
            }

            pub use __stub as debug;
            pub use __stub as error;
            pub use __stub as info;
            pub use __stub as trace;
            pub use __stub as warn;
        }
    }
}
