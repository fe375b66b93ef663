//! Simulated overflow timer for host tests
//!
//! Hardware updates (`advance`) run inside a critical section so the count
//! and the overflow flag change together, the way the real counter sets the
//! update flag on the same edge it wraps.

use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use hal_abstractions::{OverflowTimer, TimerError};

const NO_WRAP: u32 = u32::MAX;

pub(crate) struct SimTimer {
    period: AtomicU32,
    count: AtomicU32,
    pending: AtomicBool,
    starts: AtomicU32,
    attempts: AtomicU32,
    wrap_to: AtomicU32,
    start_error: Option<TimerError>,
}

impl SimTimer {
    pub(crate) const fn new() -> Self {
        Self {
            period: AtomicU32::new(65_536),
            count: AtomicU32::new(0),
            pending: AtomicBool::new(false),
            starts: AtomicU32::new(0),
            attempts: AtomicU32::new(0),
            wrap_to: AtomicU32::new(NO_WRAP),
            start_error: None,
        }
    }

    /// Timer whose `start` always fails with `error`
    pub(crate) fn failing(error: TimerError) -> Self {
        let mut timer = Self::new();
        timer.start_error = Some(error);
        timer
    }

    /// Number of times `start` configured the hardware
    pub(crate) fn start_count(&self) -> u32 {
        self.starts.load(Ordering::SeqCst)
    }

    /// Number of `start` calls, failed ones included
    pub(crate) fn start_attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }

    pub(crate) fn set_count(&self, count: u32) {
        self.count.store(count, Ordering::SeqCst);
    }

    /// Let `ticks` microseconds pass, latching the overflow flag on a wrap
    pub(crate) fn advance(&self, ticks: u32) {
        critical_section::with(|_| {
            let period = self.period.load(Ordering::SeqCst);
            let next = self.count.load(Ordering::SeqCst) + ticks;
            if next >= period {
                assert!(
                    !self.pending.load(Ordering::SeqCst),
                    "second wrap before the overflow was serviced"
                );
                self.pending.store(true, Ordering::SeqCst);
            }
            self.count.store(next % period, Ordering::SeqCst);
        });
    }

    /// Make the counter wrap to `count` immediately after the next read
    pub(crate) fn wrap_after_next_read(&self, count: u32) {
        self.wrap_to.store(count, Ordering::SeqCst);
    }
}

impl OverflowTimer for SimTimer {
    fn start(&self, period_ticks: u32, _tick_hz: u32) -> Result<(), TimerError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if let Some(e) = self.start_error {
            return Err(e);
        }
        self.period.store(period_ticks, Ordering::SeqCst);
        self.count.store(0, Ordering::SeqCst);
        self.pending.store(false, Ordering::SeqCst);
        self.starts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn raw_count(&self) -> u32 {
        let count = self.count.load(Ordering::SeqCst);
        let wrap_to = self.wrap_to.swap(NO_WRAP, Ordering::SeqCst);
        if wrap_to != NO_WRAP {
            self.count.store(wrap_to, Ordering::SeqCst);
            self.pending.store(true, Ordering::SeqCst);
        }
        count
    }

    fn overflow_pending(&self) -> bool {
        self.pending.load(Ordering::SeqCst)
    }

    fn clear_overflow(&self) {
        self.pending.store(false, Ordering::SeqCst);
    }
}
