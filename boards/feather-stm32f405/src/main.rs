#![deny(unsafe_code)]
#![deny(warnings)]
#![no_main]
#![no_std]

use defmt_rtt as _; // global logger
use panic_probe as _;
use rtic::app;
use rtic_monotonics::stm32::prelude::*;

mod clock;
mod utc_sync;

stm32_tim2_monotonic!(Mono, 1_000_000);

// Log lines carry monotonic microseconds once the clock runs
defmt::timestamp!("{=u64:us}", {
    if clock::CLOCK.is_initialized() {
        clock::CLOCK.now_monotonic().as_micros()
    } else {
        0
    }
});

#[app(device = embassy_stm32, peripherals = true, dispatchers = [USART1, USART2])]
mod app {
    use super::*;
    use defmt::info;
    use embassy_stm32::gpio::{Level, Output, Speed};
    use embassy_stm32::rcc::{Hse, HseMode};
    use embassy_stm32::time::Hertz;

    use crate::clock::CLOCK;

    #[shared]
    struct Shared {}

    #[local]
    struct Local {
        led: Output<'static>,
    }

    #[init]
    fn init(_cx: init::Context) -> (Shared, Local) {
        info!("IoT clock starting...");

        // Adafruit Feather STM32F405: 12 MHz HSE
        let mut config = embassy_stm32::Config::default();
        config.rcc.hse = Some(Hse {
            freq: Hertz(12_000_000),
            mode: HseMode::Oscillator,
        });

        // HSE (12 MHz) / PREDIV(6) = 2 MHz (PLL input)
        // 2 MHz * MUL(168) = 336 MHz (VCO)
        // VCO / DIVP(4) = 84 MHz (SYSCLK)
        config.rcc.pll_src = embassy_stm32::rcc::PllSource::HSE;
        config.rcc.pll = Some(embassy_stm32::rcc::Pll {
            prediv: embassy_stm32::rcc::PllPreDiv::DIV6, // 12 MHz / 6 = 2 MHz
            mul: embassy_stm32::rcc::PllMul::MUL168,     // 2 MHz * 168 = 336 MHz (VCO)
            divp: Some(embassy_stm32::rcc::PllPDiv::DIV4), // 336 MHz / 4 = 84 MHz (SYSCLK)
            divq: Some(embassy_stm32::rcc::PllQDiv::DIV7), // 336 MHz / 7 = 48 MHz (USB)
            divr: None,
        });
        config.rcc.sys = embassy_stm32::rcc::Sysclk::PLL1_P;
        config.rcc.ahb_pre = embassy_stm32::rcc::AHBPrescaler::DIV1; // 84 MHz
        config.rcc.apb1_pre = embassy_stm32::rcc::APBPrescaler::DIV2; // 42 MHz, timers 84 MHz
        config.rcc.apb2_pre = embassy_stm32::rcc::APBPrescaler::DIV1; // 84 MHz

        let p = embassy_stm32::init(config);
        info!("System initialized with HSE (12MHz), SYSCLK=84MHz");

        // TIM2 on APB1: timer clock = 2*APB1 when prescaler != 1
        let timer_clock_hz = 84_000_000;
        Mono::start(timer_clock_hz);
        info!("TIM2 monotonic timer initialized at 1 MHz");

        // A clock that cannot run makes every timestamp on the bus wrong
        if let Err(e) = CLOCK.init() {
            defmt::panic!("System clock init failed: {}", e);
        }

        let led = Output::new(p.PC1, Level::High, Speed::Low);

        heartbeat::spawn().ok();
        sync_utc::spawn().ok();

        (Shared {}, Local { led })
    }

    /// TIM7 update interrupt: one clock period elapsed
    ///
    /// Highest priority in the system; it must run within one period
    /// (65.5 ms) of the wrap or the clock loses a period.
    #[task(binds = TIM7, priority = 3)]
    fn clock_overflow(_cx: clock_overflow::Context) {
        CLOCK.on_overflow();
    }

    /// Heartbeat task, also reports clock health
    #[task(priority = 1, local = [led])]
    async fn heartbeat(cx: heartbeat::Context) {
        info!("Heartbeat task started");
        loop {
            cx.local.led.set_high();
            Mono::delay(100.millis()).await;
            cx.local.led.set_low();

            info!(
                "mono={} utc={} synced={} slew={}ppm jumps={}",
                CLOCK.now_monotonic().as_micros(),
                CLOCK.now_utc().as_micros(),
                CLOCK.is_utc_synchronized(),
                CLOCK.speed_correction_ppm(),
                CLOCK.jump_count()
            );

            Mono::delay(4900.millis()).await;
        }
    }

    /// Applies UTC corrections queued by the time-sync protocol
    #[task(priority = 2)]
    async fn sync_utc(_cx: sync_utc::Context) -> ! {
        crate::utc_sync::run(&CLOCK).await
    }

    /// RTIC idle task - WFI sleep mode when no tasks active
    #[idle]
    fn idle(_cx: idle::Context) -> ! {
        info!("Idle task started - entering WFI loop");
        loop {
            cortex_m::asm::wfi();
        }
    }
}
