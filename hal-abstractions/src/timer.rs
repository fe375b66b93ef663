//! Free-running overflow timer abstraction
//!
//! A counter that counts up from zero at `tick_hz`, wraps after
//! `period_ticks` and latches an overflow flag when it does. The flag stays
//! set until [`OverflowTimer::clear_overflow`] is called, normally from the
//! overflow interrupt handler.
//!
//! All methods take `&self`: implementations wrap memory-mapped registers
//! and must be usable from both task and interrupt context.

/// Timer configuration errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TimerError {
    /// Input clock is not an integer multiple of the requested tick rate
    UnevenTickRate,
    /// Required prescaler does not fit the peripheral's prescaler register
    PrescalerOutOfRange,
    /// Counter cannot wrap at the requested period
    UnsupportedPeriod,
}

impl core::fmt::Display for TimerError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::UnevenTickRate => write!(f, "Timer input clock not divisible by tick rate"),
            Self::PrescalerOutOfRange => write!(f, "Timer prescaler out of range"),
            Self::UnsupportedPeriod => write!(f, "Unsupported timer period"),
        }
    }
}

impl core::error::Error for TimerError {}

/// Free-running hardware counter with a latched overflow flag
pub trait OverflowTimer {
    /// Configure the counter to tick at `tick_hz`, wrap every `period_ticks`
    /// ticks, enable the overflow interrupt and start counting from zero.
    fn start(&self, period_ticks: u32, tick_hz: u32) -> Result<(), TimerError>;

    /// Current counter value, `0..period_ticks`. No side effects.
    fn raw_count(&self) -> u32;

    /// Whether an overflow happened that has not been acknowledged yet.
    /// No side effects.
    fn overflow_pending(&self) -> bool;

    /// Acknowledge the pending overflow.
    fn clear_overflow(&self);
}

/// Compute the prescaler divider (`input_hz / tick_hz`) for a timer fed by
/// `input_hz`.
///
/// The returned value is the division ratio; most peripherals expect
/// `ratio - 1` in their register. `max_ratio` is the largest ratio the
/// hardware supports (65536 for a 16-bit prescaler).
pub fn prescaler_ratio(input_hz: u32, tick_hz: u32, max_ratio: u32) -> Result<u32, TimerError> {
    if tick_hz == 0 || input_hz < tick_hz {
        return Err(TimerError::PrescalerOutOfRange);
    }
    if input_hz % tick_hz != 0 {
        return Err(TimerError::UnevenTickRate);
    }
    let ratio = input_hz / tick_hz;
    if ratio > max_ratio {
        return Err(TimerError::PrescalerOutOfRange);
    }
    Ok(ratio)
}
