//! Platform-agnostic synchronized clock for IoT firmware
//!
//! Extends a free-running hardware counter with a periodic overflow
//! interrupt into two 64-bit microsecond clocks:
//!
//! - a monotonic clock that is never adjusted, and
//! - a UTC clock that follows an external time reference by slewing its
//!   rate for small offsets and stepping for large ones.
//!
//! This crate contains no hardware dependencies. Boards supply an
//! [`OverflowTimer`] implementation, place a [`Clock`] in a `static` and call
//! [`Clock::on_overflow`] from the timer's overflow interrupt.
//!
//! ## Usage
//! ```ignore
//! static CLOCK: Clock<Tim7Counter> = Clock::new(Tim7Counter::new(84_000_000), ClockConfig::DEFAULT);
//!
//! // init (interrupts masked)
//! CLOCK.init()?;
//!
//! // overflow interrupt handler
//! CLOCK.on_overflow();
//!
//! // any task
//! let uptime = CLOCK.now_monotonic();
//! CLOCK.adjust(UtcDuration::from_micros(offset_from_time_source));
//! let wall = CLOCK.now_utc();
//! ```

#![cfg_attr(not(test), no_std)]
#![deny(unsafe_code)]
#![deny(warnings)]

#[macro_use]
mod fmt;

mod clock;
mod config;
mod error;
mod sampler;
mod state;
mod sync;
mod timestamp;

#[cfg(test)]
mod sim;

pub use clock::{Clock, SystemClock};
pub use config::{ClockConfig, MICROSECOND_TICK_HZ};
pub use error::ClockError;
pub use sync::{AdjustmentPlan, SlewPolicy};
pub use timestamp::{MonotonicTime, UtcDuration, UtcTime};

pub use hal_abstractions::{OverflowTimer, TimerError};
