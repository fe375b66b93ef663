//! Clock configuration

use crate::error::ClockError;

/// Tick rate at which one counter tick is exactly one microsecond
pub const MICROSECOND_TICK_HZ: u32 = 1_000_000;

/// Clock configuration
///
/// All values are fixed at build time on real hardware; use
/// [`ClockConfig::DEFAULT`] unless the board needs something else.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ClockConfig {
    /// Counter ticks per overflow period (`P`).
    ///
    /// Larger periods mean fewer overflow interrupts; the period must fit the
    /// hardware counter. With 1 µs ticks, 65536 overflows every 65.536 ms.
    pub period_ticks: u32,
    /// Counter tick rate. Must be 1 MHz: one tick is one microsecond.
    pub tick_hz: u32,
    /// Maximum UTC speed correction in microseconds per overflow period.
    ///
    /// Bounds the drift-compensation rate to
    /// `max_correction * 1_000_000 / period_ticks` ppm.
    pub max_correction: i32,
    /// Offsets whose whole-millisecond magnitude exceeds this value are
    /// corrected by stepping the UTC clock instead of slewing it.
    pub jump_threshold_ms: u64,
}

impl ClockConfig {
    /// 16-bit counter at 1 MHz, ±500 µs per period (±7629 ppm), 1 ms jump threshold
    pub const DEFAULT: Self = Self {
        period_ticks: 65_536,
        tick_hz: MICROSECOND_TICK_HZ,
        max_correction: 500,
        jump_threshold_ms: 1,
    };

    /// Length of one overflow period in microseconds
    pub const fn period_usec(&self) -> u64 {
        self.period_ticks as u64
    }

    /// Convert a per-period speed correction into parts per million
    pub const fn correction_to_ppm(&self, correction: i32) -> i32 {
        if self.period_ticks == 0 {
            return 0;
        }
        (correction as i64 * 1_000_000 / self.period_ticks as i64) as i32
    }

    /// Check the configuration for internal consistency
    pub fn validate(&self) -> Result<(), ClockError> {
        if self.period_ticks == 0 {
            return Err(ClockError::InvalidPeriod);
        }
        if self.tick_hz != MICROSECOND_TICK_HZ {
            return Err(ClockError::InvalidTickRate);
        }
        // A correction of a full period or more would stop or reverse UTC
        if self.max_correction < 0 || self.max_correction as u32 >= self.period_ticks {
            return Err(ClockError::InvalidMaxCorrection);
        }
        Ok(())
    }
}

impl Default for ClockConfig {
    fn default() -> Self {
        Self::DEFAULT
    }
}
