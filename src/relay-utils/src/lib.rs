//! Small helpers shared by the relay crates.

#![cfg_attr(not(test), no_std)]

pub mod env;
