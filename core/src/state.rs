//! Shared clock state and its access discipline
//!
//! | Field | Writers | Guard |
//! |---|---|---|
//! | monotonic / UTC base | overflow interrupt, UTC jump | critical section |
//! | speed correction, synchronized flag | synchronizer | synchronizer mutex (atomic, read lock-free by the interrupt) |
//! | jump count | synchronizer | synchronizer mutex |
//! | last UTC sample | UTC readers, UTC jump | critical section |
//! | initialized flag | `init` | critical section |
//! | lazy init failed flag | lazy init | atomic |
//!
//! Nothing outside this module touches the fields directly.

use core::cell::{Cell, RefCell};
use core::sync::atomic::{AtomicBool, AtomicI32, Ordering};

use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::blocking_mutex::Mutex as BlockingMutex;
use hal_abstractions::OverflowTimer;

use crate::sampler;
use crate::sync::apply_jump;

#[derive(Clone, Copy)]
struct Bases {
    monotonic: u64,
    utc: u64,
}

struct SyncState {
    jump_count: u32,
}

pub(crate) struct ClockState<M> {
    bases: critical_section::Mutex<Cell<Bases>>,
    initialized: critical_section::Mutex<Cell<bool>>,
    lazy_init_failed: AtomicBool,
    /// Floor for UTC samples; a negative slew must not show as a step back
    last_utc: critical_section::Mutex<Cell<u64>>,
    utc_synchronized: AtomicBool,
    speed_correction: AtomicI32,
    sync: BlockingMutex<M, RefCell<SyncState>>,
    #[cfg(debug_assertions)]
    last_monotonic: critical_section::Mutex<Cell<u64>>,
}

impl<M: RawMutex> ClockState<M> {
    pub(crate) const fn new() -> Self {
        Self {
            bases: critical_section::Mutex::new(Cell::new(Bases {
                monotonic: 0,
                utc: 0,
            })),
            initialized: critical_section::Mutex::new(Cell::new(false)),
            lazy_init_failed: AtomicBool::new(false),
            last_utc: critical_section::Mutex::new(Cell::new(0)),
            utc_synchronized: AtomicBool::new(false),
            speed_correction: AtomicI32::new(0),
            sync: BlockingMutex::new(RefCell::new(SyncState { jump_count: 0 })),
            #[cfg(debug_assertions)]
            last_monotonic: critical_section::Mutex::new(Cell::new(0)),
        }
    }

    pub(crate) fn is_initialized(&self) -> bool {
        critical_section::with(|cs| self.initialized.borrow(cs).get())
    }

    /// Run `start` unless a previous call already succeeded
    ///
    /// Returns `Ok(true)` if this call performed the start. The check and the
    /// start happen in one critical section, so concurrent callers start the
    /// hardware exactly once.
    pub(crate) fn init_once<E>(&self, start: impl FnOnce() -> Result<(), E>) -> Result<bool, E> {
        critical_section::with(|cs| {
            let initialized = self.initialized.borrow(cs);
            if initialized.get() {
                return Ok(false);
            }
            start()?;
            initialized.set(true);
            Ok(true)
        })
    }

    pub(crate) fn lazy_init_failed(&self) -> bool {
        self.lazy_init_failed.load(Ordering::Relaxed)
    }

    /// Record the outcome of a lazy init; returns `true` on the first failure
    pub(crate) fn set_lazy_init_failed(&self, failed: bool) -> bool {
        !self.lazy_init_failed.swap(failed, Ordering::Relaxed) && failed
    }

    pub(crate) fn is_utc_synchronized(&self) -> bool {
        self.utc_synchronized.load(Ordering::Acquire)
    }

    /// Sample the monotonic clock
    pub(crate) fn sample_monotonic<T: OverflowTimer + ?Sized>(&self, timer: &T, period_ticks: u32) -> u64 {
        critical_section::with(|cs| {
            let now = sampler::sample(
                self.bases.borrow(cs).get().monotonic,
                timer,
                u64::from(period_ticks),
            );

            #[cfg(debug_assertions)]
            {
                let prev = self.last_monotonic.borrow(cs).replace(now);
                assert!(prev <= now, "monotonic time went backwards");
            }

            now
        })
    }

    /// Sample the UTC clock
    ///
    /// Never below the previous sample unless a jump happened in between:
    /// with a negative correction the base advances by less than the count
    /// covered before the wrap, and the floor holds UTC still for those few
    /// microseconds.
    pub(crate) fn sample_utc<T: OverflowTimer + ?Sized>(&self, timer: &T, period_ticks: u32) -> u64 {
        let step = utc_step(period_ticks, self.speed_correction.load(Ordering::Relaxed));
        critical_section::with(|cs| {
            let now = sampler::sample(self.bases.borrow(cs).get().utc, timer, step);
            let last = self.last_utc.borrow(cs);
            let now = now.max(last.get());
            last.set(now);
            now
        })
    }

    /// Account for one hardware overflow
    ///
    /// Interrupt context. Acknowledges the overflow and advances both bases by
    /// one period, the UTC base by the period plus the current speed
    /// correction once synchronized.
    pub(crate) fn advance<T: OverflowTimer + ?Sized>(&self, timer: &T, period_ticks: u32) {
        let period = u64::from(period_ticks);
        let correction = self.speed_correction.load(Ordering::Relaxed);
        critical_section::with(|cs| {
            timer.clear_overflow();

            let cell = self.bases.borrow(cs);
            let mut bases = cell.get();
            bases.monotonic = bases.monotonic.saturating_add(period);
            if self.utc_synchronized.load(Ordering::Acquire) {
                bases.utc = bases.utc.saturating_add(utc_step(period_ticks, correction));
            }
            cell.set(bases);
        });
    }

    /// Run `f` holding the synchronizer mutex
    pub(crate) fn synchronize<R>(&self, f: impl FnOnce(&mut Synchronizer<'_, M>) -> R) -> R {
        self.sync.lock(|cell| {
            let mut inner = cell.borrow_mut();
            let mut guard = Synchronizer {
                state: self,
                inner: &mut *inner,
            };
            f(&mut guard)
        })
    }
}

/// UTC base advance for one overflow period
fn utc_step(period_ticks: u32, correction: i32) -> u64 {
    u64::from(period_ticks).saturating_add_signed(i64::from(correction))
}

/// Write access to the UTC synchronization fields
///
/// Only obtainable through [`ClockState::synchronize`], so every mutation
/// happens with the synchronizer mutex held.
pub(crate) struct Synchronizer<'a, M> {
    state: &'a ClockState<M>,
    inner: &'a mut SyncState,
}

impl<M: RawMutex> Synchronizer<'_, M> {
    pub(crate) fn is_synchronized(&self) -> bool {
        self.state.is_utc_synchronized()
    }

    pub(crate) fn speed_correction(&self) -> i32 {
        self.state.speed_correction.load(Ordering::Relaxed)
    }

    pub(crate) fn set_speed_correction(&mut self, correction: i32) {
        self.state.speed_correction.store(correction, Ordering::Relaxed);
    }

    pub(crate) fn jump_count(&self) -> u32 {
        self.inner.jump_count
    }

    /// Step the UTC base by `delta` microseconds and return the new base
    ///
    /// With `synchronize` set, the synchronized flag is raised in the same
    /// critical section, so no overflow can fall between the step and the
    /// first UTC base advance.
    pub(crate) fn jump_utc(&mut self, delta: i64, synchronize: bool) -> u64 {
        let utc = critical_section::with(|cs| {
            let cell = self.state.bases.borrow(cs);
            let mut bases = cell.get();
            bases.utc = apply_jump(bases.utc, delta);
            cell.set(bases);
            // A backward step must be visible
            self.state.last_utc.borrow(cs).set(0);
            if synchronize {
                self.state.utc_synchronized.store(true, Ordering::Release);
            }
            bases.utc
        });
        if !synchronize {
            self.inner.jump_count = self.inner.jump_count.wrapping_add(1);
        }
        utc
    }
}
