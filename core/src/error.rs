//! Clock error types

use hal_abstractions::TimerError;

/// Clock configuration and startup errors
///
/// These are wiring mistakes detected by [`Clock::init`](crate::Clock::init).
/// A correctly configured clock never fails at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ClockError {
    /// Overflow period is zero
    InvalidPeriod,
    /// Counter does not tick at 1 MHz
    InvalidTickRate,
    /// Speed correction bound is negative or not smaller than the period
    InvalidMaxCorrection,
    /// Hardware timer rejected the configuration
    Timer(TimerError),
}

impl From<TimerError> for ClockError {
    fn from(e: TimerError) -> Self {
        ClockError::Timer(e)
    }
}

impl core::fmt::Display for ClockError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::InvalidPeriod => write!(f, "Invalid overflow period"),
            Self::InvalidTickRate => write!(f, "Counter tick rate must be 1 MHz"),
            Self::InvalidMaxCorrection => write!(f, "Invalid maximum speed correction"),
            Self::Timer(e) => write!(f, "Timer error: {}", e),
        }
    }
}

impl core::error::Error for ClockError {
    fn source(&self) -> Option<&(dyn core::error::Error + 'static)> {
        match self {
            Self::Timer(e) => Some(e),
            _ => None,
        }
    }
}
