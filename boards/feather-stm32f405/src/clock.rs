#![deny(unsafe_code)]
#![deny(warnings)]
//! System clock on TIM7
//!
//! TIM7 is a basic 16-bit timer with no pins and no other users on this
//! board, so the clock owns it outright. It counts at 1 MHz and raises its
//! update interrupt once per 65536 µs period; `main` binds that interrupt
//! to [`CLOCK`]`.on_overflow()` at a priority above every software task.

use embassy_stm32::pac;
use embassy_stm32::pac::timer::vals;
use hal_abstractions::{prescaler_ratio, OverflowTimer, TimerError};
use iot_clock::{Clock, ClockConfig};

/// TIM7 kernel clock: APB1 runs at 42 MHz with a prescaler of 2, so the
/// timers on it see twice that
pub const TIM7_INPUT_CLOCK_HZ: u32 = 84_000_000;

/// Counter width of a basic timer
const MAX_PERIOD_TICKS: u32 = 1 << 16;

/// PSC is 16 bits and divides by PSC + 1
const MAX_PRESCALER_RATIO: u32 = 1 << 16;

/// The board's single clock instance
pub static CLOCK: Clock<Tim7Counter> =
    Clock::new(Tim7Counter::new(TIM7_INPUT_CLOCK_HZ), ClockConfig::DEFAULT);

/// [`OverflowTimer`] backed by the TIM7 basic timer
pub struct Tim7Counter {
    input_clock_hz: u32,
}

impl Tim7Counter {
    pub const fn new(input_clock_hz: u32) -> Self {
        Self { input_clock_hz }
    }
}

impl OverflowTimer for Tim7Counter {
    fn start(&self, period_ticks: u32, tick_hz: u32) -> Result<(), TimerError> {
        if period_ticks == 0 || period_ticks > MAX_PERIOD_TICKS {
            return Err(TimerError::UnsupportedPeriod);
        }
        let ratio = prescaler_ratio(self.input_clock_hz, tick_hz, MAX_PRESCALER_RATIO)?;

        pac::RCC.apb1enr().modify(|w| w.set_tim7en(true));
        pac::RCC.apb1rstr().modify(|w| w.set_tim7rst(true));
        pac::RCC.apb1rstr().modify(|w| w.set_tim7rst(false));

        let tim = pac::TIM7;
        tim.arr().write(|w| w.set_arr((period_ticks - 1) as _));
        tim.psc().write_value((ratio - 1) as _);
        // Only a real wrap may set the update flag, not the UG below
        tim.cr1().write(|w| w.set_urs(vals::Urs::COUNTER_ONLY));
        tim.sr().write(|w| w.set_uif(false));
        // Latch PSC and ARR
        tim.egr().write(|w| w.set_ug(true));
        tim.dier().write(|w| w.set_uie(true));
        tim.cr1().modify(|w| w.set_cen(true));

        defmt::debug!(
            "TIM7 started: psc={}, arr={}",
            ratio - 1,
            period_ticks - 1
        );
        Ok(())
    }

    fn raw_count(&self) -> u32 {
        u32::from(pac::TIM7.cnt().read().cnt())
    }

    fn overflow_pending(&self) -> bool {
        pac::TIM7.sr().read().uif()
    }

    fn clear_overflow(&self) {
        // rc_w0: writing zero clears the flag
        pac::TIM7.sr().write(|w| w.set_uif(false));
    }
}
