//! Compile-time configuration read from environment variables.
//!
//! The macros evaluate in `const` context, so a malformed value fails the
//! build instead of the boot:
//!
//! ```
//! const QUEUE_LEN: usize = relay_utils::usize_from_env_or!("CONFIG_DOCTEST_QUEUE_LEN", 4);
//! assert_eq!(QUEUE_LEN, 4);
//! ```

pub use {const_panic, konst};

#[doc(hidden)]
#[macro_export]
macro_rules! __parse_env_or {
    ($parse:ident, $kind:literal, $var:literal, $default:expr) => {
        match option_env!($var) {
            None => $default,
            Some(raw) => match $crate::env::konst::primitive::$parse(raw) {
                Ok(value) => value,
                Err(_) => $crate::env::const_panic::concat_panic!(
                    "invalid build configuration: `",
                    $var,
                    "=",
                    raw,
                    "` is not ",
                    $kind,
                ),
            },
        }
    };
}

/// Reads a `usize` from the build environment, or `$default` if unset.
#[macro_export]
macro_rules! usize_from_env_or {
    ($var:literal, $default:expr) => {
        $crate::__parse_env_or!(parse_usize, "a usize", $var, $default)
    };
}

/// Reads a `u32` from the build environment, or `$default` if unset.
#[macro_export]
macro_rules! u32_from_env_or {
    ($var:literal, $default:expr) => {
        $crate::__parse_env_or!(parse_u32, "a u32", $var, $default)
    };
}
