//! Clock facade
//!
//! [`Clock`] owns the hardware timer, the configuration and all shared
//! state. Boards keep one in a `static` and call [`Clock::on_overflow`] from
//! the timer's overflow interrupt.
//!
//! ## Contexts
//! - `now_utc_from_isr`, `on_overflow`: any context; critical section only
//! - `now_monotonic`, `now_utc`: any context once initialized; before that
//!   the first call starts the timer
//! - `adjust`, `speed_correction_ppm`, `jump_count`: task context; they take
//!   the synchronizer mutex (`M`). With the default `CriticalSectionRawMutex`
//!   every priority may call them.

use embassy_sync::blocking_mutex::raw::{CriticalSectionRawMutex, RawMutex};
use hal_abstractions::OverflowTimer;

use crate::config::ClockConfig;
use crate::error::ClockError;
use crate::state::ClockState;
use crate::sync::SlewPolicy;
use crate::timestamp::{MonotonicTime, UtcDuration, UtcTime};

/// Clock interface for code that only needs to read and steer time
pub trait SystemClock {
    /// Monotonic time, never adjusted
    fn monotonic(&self) -> MonotonicTime;
    /// UTC time, [`UtcTime::ZERO`] until the first adjustment
    fn utc(&self) -> UtcTime;
    /// Feed one offset measured against the external time reference
    fn adjust_utc(&self, adjustment: UtcDuration);
}

/// Synchronized microsecond clock driven by an [`OverflowTimer`]
pub struct Clock<T, M = CriticalSectionRawMutex> {
    timer: T,
    config: ClockConfig,
    state: ClockState<M>,
}

impl<T: OverflowTimer, M: RawMutex> Clock<T, M> {
    /// Create a stopped clock. Nothing touches the hardware until `init`.
    pub const fn new(timer: T, config: ClockConfig) -> Self {
        Self {
            timer,
            config,
            state: ClockState::new(),
        }
    }

    pub const fn config(&self) -> &ClockConfig {
        &self.config
    }

    pub const fn timer(&self) -> &T {
        &self.timer
    }

    /// Validate the configuration and start the hardware timer
    ///
    /// Idempotent: only the first successful call starts the timer, later and
    /// concurrent calls return `Ok(())` without touching the hardware. On
    /// error nothing is marked initialized and the call may be retried.
    pub fn init(&self) -> Result<(), ClockError> {
        self.config.validate()?;

        let started = self.state.init_once(|| {
            self.timer
                .start(self.config.period_ticks, self.config.tick_hz)
                .map_err(ClockError::from)
        })?;

        self.state.set_lazy_init_failed(false);
        if started {
            info!(
                "Clock started: period {} us, max slew {} ppm",
                self.config.period_ticks,
                self.config.correction_to_ppm(self.config.max_correction)
            );
        }
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.state.is_initialized()
    }

    /// Lazily start the clock on first use
    ///
    /// A failed lazy start is not retried: the configuration will not fix
    /// itself between reads. An explicit [`Clock::init`] still retries.
    fn ensure_initialized(&self) -> bool {
        if self.state.is_initialized() {
            return true;
        }
        if self.state.lazy_init_failed() {
            return false;
        }
        match self.init() {
            Ok(()) => true,
            Err(e) => {
                if self.state.set_lazy_init_failed(true) {
                    error!("Clock initialization failed: {}", e);
                }
                false
            }
        }
    }

    /// Current monotonic time
    ///
    /// Non-decreasing across all callers. Returns [`MonotonicTime::ZERO`] only
    /// if the clock cannot be started.
    pub fn now_monotonic(&self) -> MonotonicTime {
        if !self.ensure_initialized() {
            return MonotonicTime::ZERO;
        }
        MonotonicTime::from_micros(self.state.sample_monotonic(&self.timer, self.config.period_ticks))
    }

    /// Current UTC time, [`UtcTime::ZERO`] until the first [`Clock::adjust`]
    pub fn now_utc(&self) -> UtcTime {
        if !self.ensure_initialized() || !self.state.is_utc_synchronized() {
            return UtcTime::ZERO;
        }
        UtcTime::from_micros(self.state.sample_utc(&self.timer, self.config.period_ticks))
    }

    /// UTC time for timestamping inside an interrupt handler
    ///
    /// Never starts the clock and never takes the synchronizer mutex.
    pub fn now_utc_from_isr(&self) -> UtcTime {
        debug_assert!(self.state.is_initialized(), "clock sampled before init");
        if !self.state.is_utc_synchronized() {
            return UtcTime::ZERO;
        }
        UtcTime::from_micros(self.state.sample_utc(&self.timer, self.config.period_ticks))
    }

    pub fn is_utc_synchronized(&self) -> bool {
        self.state.is_utc_synchronized()
    }

    /// Overflow interrupt handler body
    ///
    /// Must run once per hardware overflow, before the counter wraps again.
    pub fn on_overflow(&self) {
        debug_assert!(self.state.is_initialized(), "overflow before init");
        self.state.advance(&self.timer, self.config.period_ticks);
    }

    /// Steer UTC by the offset `delta` (reference minus our UTC)
    ///
    /// The first call steps UTC to `delta` and marks it synchronized. Later
    /// calls bias the UTC rate one microsecond per period toward the sign of
    /// `delta` and additionally step by `delta` when it exceeds the jump
    /// threshold.
    pub fn adjust(&self, delta: UtcDuration) {
        if !self.ensure_initialized() {
            return;
        }
        let policy = SlewPolicy::from_config(&self.config);

        self.state.synchronize(|sync| {
            let Some(plan) = policy.plan(delta, sync.is_synchronized(), sync.speed_correction()) else {
                trace!("UTC adjustment: in sync");
                return;
            };

            sync.set_speed_correction(plan.correction);

            if let Some(step) = plan.jump {
                let utc = sync.jump_utc(step, plan.first_sync);
                if plan.first_sync {
                    info!("UTC synchronized: base {} us", utc);
                } else {
                    info!(
                        "UTC stepped by {} us (jump #{})",
                        step,
                        sync.jump_count()
                    );
                }
            }

            debug!(
                "UTC adjustment {} us: correction {} us/period",
                delta.as_micros(),
                plan.correction
            );
        });
    }

    /// UTC rate correction currently applied, in parts per million
    pub fn speed_correction_ppm(&self) -> i32 {
        let correction = self.state.synchronize(|sync| sync.speed_correction());
        self.config.correction_to_ppm(correction)
    }

    /// Number of UTC steps applied after the first synchronization
    pub fn jump_count(&self) -> u32 {
        self.state.synchronize(|sync| sync.jump_count())
    }
}

impl<T: OverflowTimer, M: RawMutex> SystemClock for Clock<T, M> {
    fn monotonic(&self) -> MonotonicTime {
        self.now_monotonic()
    }

    fn utc(&self) -> UtcTime {
        self.now_utc()
    }

    fn adjust_utc(&self, adjustment: UtcDuration) {
        self.adjust(adjustment)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimTimer;
    use hal_abstractions::TimerError;

    const P: u64 = 65_536;

    fn started_clock() -> Clock<SimTimer> {
        let clock: Clock<SimTimer> = Clock::new(SimTimer::new(), ClockConfig::DEFAULT);
        clock.init().unwrap();
        clock
    }

    /// Let `ticks` pass and service the overflow interrupt if one fired
    fn run_for(clock: &Clock<SimTimer>, ticks: u32) {
        clock.timer().advance(ticks);
        if clock.timer().overflow_pending() {
            clock.on_overflow();
        }
    }

    #[test]
    fn test_init_is_idempotent() {
        let clock = Clock::<_, CriticalSectionRawMutex>::new(SimTimer::new(), ClockConfig::DEFAULT);
        assert!(!clock.is_initialized());
        clock.init().unwrap();
        clock.init().unwrap();
        assert!(clock.is_initialized());
        assert_eq!(clock.timer().start_count(), 1);
    }

    #[test]
    fn test_concurrent_init_starts_hardware_once() {
        let clock: Clock<SimTimer> = Clock::new(SimTimer::new(), ClockConfig::DEFAULT);
        std::thread::scope(|s| {
            for _ in 0..8 {
                s.spawn(|| clock.init().unwrap());
            }
        });
        assert_eq!(clock.timer().start_count(), 1);
    }

    #[test]
    fn test_init_rejects_invalid_config() {
        let config = ClockConfig {
            max_correction: 70_000,
            ..ClockConfig::DEFAULT
        };
        let clock: Clock<SimTimer> = Clock::new(SimTimer::new(), config);
        assert_eq!(clock.init(), Err(ClockError::InvalidMaxCorrection));
        assert_eq!(clock.timer().start_count(), 0);
        assert!(!clock.is_initialized());
    }

    #[test]
    fn test_timer_error_leaves_clock_stopped() {
        let clock: Clock<SimTimer> = Clock::new(SimTimer::failing(TimerError::UnevenTickRate), ClockConfig::DEFAULT);
        assert_eq!(clock.init(), Err(ClockError::Timer(TimerError::UnevenTickRate)));
        assert!(!clock.is_initialized());
        assert_eq!(clock.now_monotonic(), MonotonicTime::ZERO);
        assert_eq!(clock.now_utc(), UtcTime::ZERO);
    }

    #[test]
    fn test_failed_lazy_init_is_not_retried() {
        let clock: Clock<SimTimer> = Clock::new(SimTimer::failing(TimerError::PrescalerOutOfRange), ClockConfig::DEFAULT);
        assert_eq!(clock.now_monotonic(), MonotonicTime::ZERO);
        assert_eq!(clock.now_utc(), UtcTime::ZERO);
        clock.adjust(UtcDuration::from_micros(1_000));
        assert_eq!(clock.now_monotonic(), MonotonicTime::ZERO);
        assert_eq!(clock.timer().start_attempts(), 1);
        assert!(!clock.is_utc_synchronized());

        // Explicit init still tries the hardware again
        assert_eq!(clock.init(), Err(ClockError::Timer(TimerError::PrescalerOutOfRange)));
        assert_eq!(clock.timer().start_attempts(), 2);
    }

    #[test]
    fn test_first_read_starts_clock() {
        let clock: Clock<SimTimer> = Clock::new(SimTimer::new(), ClockConfig::DEFAULT);
        assert_eq!(clock.now_monotonic(), MonotonicTime::ZERO);
        assert!(clock.is_initialized());
        clock.now_monotonic();
        clock.init().unwrap();
        assert_eq!(clock.timer().start_count(), 1);
    }

    #[test]
    fn test_monotonic_counts_periods() {
        let clock = started_clock();
        clock.timer().set_count(100);
        assert_eq!(clock.now_monotonic().as_micros(), 100);

        run_for(&clock, P as u32);
        assert_eq!(clock.now_monotonic().as_micros(), P + 100);

        run_for(&clock, 3 * P as u32 / 4);
        run_for(&clock, 3 * P as u32 / 4);
        assert_eq!(clock.now_monotonic().as_micros(), P + 100 + 3 * P / 2);
    }

    #[test]
    fn test_pending_overflow_matches_serviced_overflow() {
        let clock = started_clock();
        clock.timer().set_count(P as u32 - 2);
        clock.timer().advance(5);
        assert!(clock.timer().overflow_pending());

        // Interrupt is due but has not run: base still 0, count 3
        let before_isr = clock.now_monotonic().as_micros();
        assert_eq!(before_isr, P + 3);

        clock.on_overflow();
        assert!(!clock.timer().overflow_pending());
        clock.timer().advance(1);
        assert_eq!(clock.now_monotonic().as_micros(), before_isr + 1);
    }

    #[test]
    fn test_wrap_between_count_reads() {
        let clock = started_clock();
        clock.timer().set_count(P as u32 - 1);
        clock.timer().wrap_after_next_read(0);
        assert_eq!(clock.now_monotonic().as_micros(), P);
    }

    #[test]
    fn test_monotonic_never_decreases() {
        let clock = started_clock();
        let mut seed: u32 = 0x1234_5678;
        let mut last = clock.now_monotonic();
        for _ in 0..20_000 {
            seed = seed.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
            let ticks = (seed >> 8) % 40_000;
            clock.timer().advance(ticks);
            // Service late half of the time; never let a second wrap happen
            if clock.timer().overflow_pending() && (seed & 1 == 0 || ticks > 20_000) {
                let mid = clock.now_monotonic();
                assert!(mid >= last);
                last = mid;
                clock.on_overflow();
            }
            if clock.timer().overflow_pending() {
                clock.on_overflow();
            }
            let now = clock.now_monotonic();
            assert!(now >= last, "{:?} < {:?}", now, last);
            last = now;
        }
        assert!(last.as_micros() > 100 * P);
    }

    #[test]
    fn test_concurrent_readers_see_monotonic_time() {
        let clock = started_clock();
        let done = core::sync::atomic::AtomicBool::new(false);

        std::thread::scope(|s| {
            for _ in 0..3 {
                s.spawn(|| {
                    let mut last = MonotonicTime::ZERO;
                    while !done.load(core::sync::atomic::Ordering::Relaxed) {
                        let now = clock.now_monotonic();
                        assert!(now >= last);
                        last = now;
                    }
                });
            }

            // Hardware and overflow interrupt
            for i in 0..50_000u32 {
                clock.timer().advance(997);
                if clock.timer().overflow_pending() && i % 3 == 0 {
                    clock.on_overflow();
                }
                if clock.timer().overflow_pending() && clock.timer().raw_count() > 60_000 {
                    clock.on_overflow();
                }
            }
            done.store(true, core::sync::atomic::Ordering::Relaxed);
        });
    }

    #[test]
    fn test_utc_zero_until_first_adjust() {
        let clock = started_clock();
        clock.timer().set_count(500);
        run_for(&clock, P as u32);
        assert!(!clock.is_utc_synchronized());
        assert_eq!(clock.now_utc(), UtcTime::ZERO);
        assert_eq!(clock.now_utc_from_isr(), UtcTime::ZERO);
    }

    #[test]
    fn test_first_adjust_zero_synchronizes() {
        let clock = started_clock();
        clock.adjust(UtcDuration::ZERO);
        assert!(clock.is_utc_synchronized());
        assert!(!clock.now_utc().is_zero());
        assert_eq!(clock.jump_count(), 0);
        assert_eq!(clock.speed_correction_ppm(), 0);
    }

    #[test]
    fn test_first_adjust_sets_utc_and_discards_slew() {
        let clock = started_clock();
        let reference = 1_767_571_200_000_000i64;
        clock.adjust(UtcDuration::from_micros(reference));
        assert_eq!(clock.now_utc().as_micros(), reference as u64);
        assert_eq!(clock.speed_correction_ppm(), 0);
        assert_eq!(clock.jump_count(), 0);
    }

    #[test]
    fn test_large_adjust_steps_immediately() {
        let clock = started_clock();
        clock.adjust(UtcDuration::from_micros(10_000_000));
        clock.timer().set_count(1_000);

        let before = clock.now_utc();
        clock.adjust(UtcDuration::from_micros(2_000));
        let after = clock.now_utc();

        assert_eq!(clock.jump_count(), 1);
        assert_eq!(after.checked_duration_since(before), Some(UtcDuration::from_micros(2_000)));
        // Step also nudges the rate
        assert_eq!(clock.speed_correction_ppm(), 15);
    }

    #[test]
    fn test_small_adjust_only_slews() {
        let clock = started_clock();
        clock.adjust(UtcDuration::from_micros(10_000_000));
        clock.timer().set_count(1_000);

        let before = clock.now_utc();
        clock.adjust(UtcDuration::from_micros(50));
        assert_eq!(clock.now_utc(), before);
        assert_eq!(clock.jump_count(), 0);
        assert_eq!(clock.speed_correction_ppm(), 15);

        clock.adjust(UtcDuration::from_micros(-50));
        clock.adjust(UtcDuration::from_micros(-50));
        assert_eq!(clock.speed_correction_ppm(), -15);
        assert_eq!(clock.now_utc(), before);
    }

    #[test]
    fn test_speed_correction_saturates() {
        let clock = started_clock();
        clock.adjust(UtcDuration::from_micros(1));
        for _ in 0..2_000 {
            clock.adjust(UtcDuration::from_micros(1));
        }
        assert_eq!(clock.speed_correction_ppm(), 7629);

        for _ in 0..2_000 {
            clock.adjust(UtcDuration::from_micros(-1));
        }
        assert_eq!(clock.speed_correction_ppm(), -7629);
        assert_eq!(clock.jump_count(), 0);
    }

    #[test]
    fn test_slew_is_applied_per_overflow() {
        let clock = started_clock();
        clock.adjust(UtcDuration::from_micros(1_000_000));
        for _ in 0..3 {
            clock.adjust(UtcDuration::from_micros(10));
        }
        let before = clock.now_utc().as_micros();
        let mono_before = clock.now_monotonic().as_micros();

        run_for(&clock, P as u32);
        assert_eq!(clock.now_monotonic().as_micros() - mono_before, P);
        assert_eq!(clock.now_utc().as_micros() - before, P + 3);
    }

    #[test]
    fn test_utc_never_steps_back_under_negative_slew() {
        let clock = started_clock();
        clock.adjust(UtcDuration::from_micros(1_000_000));
        for _ in 0..10 {
            clock.adjust(UtcDuration::from_micros(-10));
        }
        assert_eq!(clock.jump_count(), 0);

        clock.timer().set_count(P as u32 - 1);
        let before = clock.now_utc();
        assert_eq!(before.as_micros(), 1_000_000 + P - 1);

        // Wrapped, interrupt not yet run
        clock.timer().advance(1);
        assert!(clock.timer().overflow_pending());
        let pending = clock.now_utc();
        let pending_isr = clock.now_utc_from_isr();

        clock.on_overflow();
        let after = clock.now_utc();

        assert!(pending >= before);
        assert_eq!(pending_isr, pending);
        assert_eq!(after, pending);

        // Held for the 9 us the base fell short, then runs on
        clock.timer().advance(20);
        assert_eq!(clock.now_utc().as_micros(), 1_000_000 + P - 10 + 20);
    }

    #[test]
    fn test_pending_utc_sample_includes_slew() {
        let clock = started_clock();
        clock.adjust(UtcDuration::from_micros(1_000_000));
        for _ in 0..5 {
            clock.adjust(UtcDuration::from_micros(10));
        }

        clock.timer().set_count(P as u32 - 1);
        clock.timer().advance(3);
        let pending = clock.now_utc();
        clock.on_overflow();
        assert_eq!(clock.now_utc(), pending);
        assert_eq!(pending.as_micros(), 1_000_000 + P + 5 + 2);
    }

    #[test]
    fn test_backward_jump_is_visible() {
        let clock = started_clock();
        clock.adjust(UtcDuration::from_micros(1_000_000));
        clock.timer().set_count(30_000);
        let before = clock.now_utc();

        clock.adjust(UtcDuration::from_micros(-5_000));
        assert_eq!(clock.jump_count(), 1);
        assert_eq!(before.checked_duration_since(clock.now_utc()), Some(UtcDuration::from_micros(5_000)));
    }

    #[test]
    fn test_negative_jump_clamps_to_one() {
        let clock = started_clock();
        clock.adjust(UtcDuration::from_micros(5_000));
        clock.adjust(UtcDuration::from_micros(-1_000_000));
        assert_eq!(clock.jump_count(), 1);
        // Base clamped to 1, count is still 0
        assert_eq!(clock.now_utc().as_micros(), 1);

        let clock = started_clock();
        clock.adjust(UtcDuration::from_micros(-42));
        assert_eq!(clock.now_utc().as_micros(), 1);
    }

    #[test]
    fn test_isr_sample_matches_task_sample() {
        let clock = started_clock();
        clock.adjust(UtcDuration::from_micros(123_456_789));
        run_for(&clock, 70_000);
        assert_eq!(clock.now_utc_from_isr(), clock.now_utc());
    }

    #[test]
    fn test_concurrent_adjust_stays_bounded() {
        let clock = started_clock();
        clock.adjust(UtcDuration::from_micros(1_000_000));

        std::thread::scope(|s| {
            for sign in [1i64, 1, 1, -1] {
                let clock = &clock;
                s.spawn(move || {
                    for i in 0..1_500i64 {
                        clock.adjust(UtcDuration::from_micros(sign * (1 + i % 900)));
                        let ppm = clock.speed_correction_ppm();
                        assert!(ppm.abs() <= 7629);
                    }
                });
            }
            s.spawn(|| {
                for _ in 0..2_000 {
                    run_for(&clock, 30_000);
                }
            });
        });

        assert_eq!(clock.jump_count(), 0);
        assert!(clock.speed_correction_ppm().abs() <= 7629);
    }

    #[test]
    fn test_system_clock_trait() {
        fn sync_to<C: SystemClock>(clock: &C, reference: UtcTime) {
            let offset = reference.checked_duration_since(clock.utc()).unwrap();
            clock.adjust_utc(offset);
        }

        let clock = started_clock();
        clock.timer().set_count(10);
        assert_eq!(clock.monotonic().as_micros(), 10);

        sync_to(&clock, UtcTime::from_micros(5_000_000));
        assert_eq!(clock.utc().as_micros(), 5_000_010);

        sync_to(&clock, UtcTime::from_micros(5_004_010));
        assert_eq!(clock.utc().as_micros(), 5_004_010);
        assert_eq!(clock.jump_count(), 1);
    }
}
