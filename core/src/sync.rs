//! UTC synchronization policy
//!
//! Each adjustment is the signed offset between the external time reference
//! and our UTC clock. Small offsets are closed by biasing the UTC rate one
//! microsecond per overflow period at a time (a bounded integral
//! controller). Large offsets, and the very first adjustment, step the UTC
//! base immediately.
//!
//! The policy is a pure decision; [`Clock::adjust`](crate::Clock::adjust)
//! applies it under the synchronizer lock.

use crate::config::ClockConfig;
use crate::timestamp::UtcDuration;

/// Outcome of one adjustment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct AdjustmentPlan {
    /// New speed correction in microseconds per overflow period
    pub correction: i32,
    /// Step to add to the UTC base, if any
    pub jump: Option<i64>,
    /// This adjustment synchronizes the clock for the first time
    pub first_sync: bool,
}

/// Slew-or-jump decision rules
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlewPolicy {
    max_correction: i32,
    jump_threshold_ms: u64,
}

impl SlewPolicy {
    pub const fn new(max_correction: i32, jump_threshold_ms: u64) -> Self {
        Self {
            max_correction,
            jump_threshold_ms,
        }
    }

    pub const fn from_config(config: &ClockConfig) -> Self {
        Self::new(config.max_correction, config.jump_threshold_ms)
    }

    /// Decide how to apply `delta`
    ///
    /// Returns `None` when the clock is synchronized and `delta` is zero.
    pub fn plan(&self, delta: UtcDuration, synchronized: bool, correction: i32) -> Option<AdjustmentPlan> {
        if delta.is_zero() && synchronized {
            return None;
        }

        let nudged = self.nudge(correction, delta);
        let step = !synchronized || delta.abs_whole_millis() > self.jump_threshold_ms;

        Some(AdjustmentPlan {
            // Rate learned before the first sync is meaningless
            correction: if synchronized { nudged } else { 0 },
            jump: step.then_some(delta.as_micros()),
            first_sync: !synchronized,
        })
    }

    /// Move `correction` one step toward the sign of `delta`, within bounds
    pub fn nudge(&self, correction: i32, delta: UtcDuration) -> i32 {
        if delta.is_positive() {
            correction.saturating_add(1).min(self.max_correction)
        } else if delta.is_negative() {
            correction.saturating_sub(1).max(-self.max_correction)
        } else {
            correction
        }
    }
}

/// Apply a signed step to the UTC base
///
/// A step that would take the base to zero or below clamps to 1: UTC never
/// runs back into the unsynchronized sentinel or wraps around.
pub(crate) fn apply_jump(base: u64, delta: i64) -> u64 {
    let stepped = if delta < 0 {
        base.saturating_sub(delta.unsigned_abs())
    } else {
        base.saturating_add(delta.unsigned_abs())
    };
    stepped.max(1)
}
