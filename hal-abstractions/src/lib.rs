//! Hardware abstraction traits for IoT firmware
//!
//! This crate defines traits that abstract over hardware differences
//! between boards. BSPs implement these traits.

#![no_std]
#![deny(unsafe_code)]
#![deny(warnings)]

pub mod timer;

pub use timer::{prescaler_ratio, OverflowTimer, TimerError};
