//! Overflow-race-free time sampling
//!
//! A 64-bit time is the software base (completed periods) plus the raw
//! hardware count. The counter keeps running while we read it, so it can
//! wrap after the base was read but before the overflow interrupt had a
//! chance to add the period to the base. The latched overflow flag tells us
//! that happened: the count we read may be from either side of the wrap, so
//! read it again (now certainly past zero) and add the period ourselves.
//!
//! The amount added for a pending overflow is the caller's: the monotonic
//! clock adds the plain period, the UTC clock the period plus its speed
//! correction, so a sample taken just before the interrupt runs agrees with
//! one taken just after.
//!
//! Must be called with interrupts masked so the base cannot change while
//! the hardware is read. The overflow interrupt must be serviced within one
//! period, otherwise a second wrap goes unnoticed.

use hal_abstractions::OverflowTimer;

/// Combine `base` with the current hardware count
///
/// `overflow_step` is what the overflow interrupt will add to `base`.
pub(crate) fn sample<T: OverflowTimer + ?Sized>(base: u64, timer: &T, overflow_step: u64) -> u64 {
    let mut time = base;
    let mut count = timer.raw_count();

    if timer.overflow_pending() {
        // Count may predate the wrap; this one cannot
        count = timer.raw_count();
        time = time.saturating_add(overflow_step);
    }

    time.saturating_add(u64::from(count))
}
