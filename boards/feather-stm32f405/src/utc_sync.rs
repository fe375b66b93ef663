#![deny(unsafe_code)]
#![deny(warnings)]
//! UTC correction intake
//!
//! Whatever measures the offset to the network time reference (a time-sync
//! protocol on CAN, Ethernet, GNSS) pushes it through [`UTC_CORRECTIONS`].
//! The `sync_utc` task drains the channel and feeds each offset to the
//! clock from task context, where the synchronizer lock may be taken.

use defmt::{debug, info};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::{Channel, Receiver, Sender};
use iot_clock::{SystemClock, UtcDuration};

/// Pending corrections; a full queue means the producer is outrunning the clock
const QUEUE_DEPTH: usize = 8;

/// Channel of measured UTC offsets (reference minus local)
/// Using CriticalSectionRawMutex makes it safe across all RTIC priorities
pub static UTC_CORRECTIONS: Channel<CriticalSectionRawMutex, UtcDuration, QUEUE_DEPTH> =
    Channel::new();

/// Get a sender for UTC corrections (can be called from any task or interrupt)
#[allow(dead_code)] // Producer side belongs to the time-sync protocol task
pub fn correction_sender() -> Sender<'static, CriticalSectionRawMutex, UtcDuration, QUEUE_DEPTH> {
    UTC_CORRECTIONS.sender()
}

fn correction_receiver() -> Receiver<'static, CriticalSectionRawMutex, UtcDuration, QUEUE_DEPTH> {
    UTC_CORRECTIONS.receiver()
}

/// Apply every received correction to `clock`
pub async fn run<C: SystemClock>(clock: &C) -> ! {
    let receiver = correction_receiver();
    info!("UTC sync waiting for corrections");

    loop {
        let delta = receiver.receive().await;
        clock.adjust_utc(delta);
        debug!("Applied UTC correction {} us", delta.as_micros());
    }
}
