//! Typed microsecond timestamps
//!
//! Monotonic and UTC times are distinct types so one cannot be passed where
//! the other is expected. Both count microseconds; zero means "no time".

/// Time since the clock started, in microseconds
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct MonotonicTime(u64);

impl MonotonicTime {
    /// Zero time, also returned by an unstarted clock
    pub const ZERO: Self = Self(0);

    pub const fn from_micros(usec: u64) -> Self {
        Self(usec)
    }

    pub const fn as_micros(self) -> u64 {
        self.0
    }

    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }

    /// Microseconds elapsed since `earlier`, zero if `earlier` is later
    pub const fn saturating_micros_since(self, earlier: Self) -> u64 {
        self.0.saturating_sub(earlier.0)
    }
}

/// UTC wall-clock time in microseconds
///
/// [`UtcTime::ZERO`] means the clock has not been synchronized yet.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct UtcTime(u64);

impl UtcTime {
    /// Unsynchronized sentinel
    pub const ZERO: Self = Self(0);

    pub const fn from_micros(usec: u64) -> Self {
        Self(usec)
    }

    pub const fn as_micros(self) -> u64 {
        self.0
    }

    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }

    /// Signed offset `self - other`, or `None` if it does not fit in `i64`
    pub fn checked_duration_since(self, other: Self) -> Option<UtcDuration> {
        let diff = i128::from(self.0) - i128::from(other.0);
        i64::try_from(diff).ok().map(UtcDuration::from_micros)
    }
}

/// Signed UTC correction in microseconds
///
/// Positive values move the UTC clock forward.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct UtcDuration(i64);

impl UtcDuration {
    pub const ZERO: Self = Self(0);

    pub const fn from_micros(usec: i64) -> Self {
        Self(usec)
    }

    pub const fn from_millis(msec: i64) -> Self {
        Self(msec.saturating_mul(1000))
    }

    pub const fn as_micros(self) -> i64 {
        self.0
    }

    /// Magnitude in whole milliseconds, truncated
    pub const fn abs_whole_millis(self) -> u64 {
        self.0.unsigned_abs() / 1000
    }

    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }

    pub const fn is_positive(self) -> bool {
        self.0 > 0
    }

    pub const fn is_negative(self) -> bool {
        self.0 < 0
    }
}
