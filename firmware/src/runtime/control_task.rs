use controller_core::clock::MonotonicClock;
use controller_core::controller::FlowController;
use embassy_futures::yield_now;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;

use crate::hw::{
    CurrentReceiver, CurrentTransmitter, EmbassyClock, GpioRelays, IwdgWatchdog, StackHeadroom,
};
use crate::links::{ChannelPort, dropped_replies};
use crate::telemetry::TelemetryRecorder;

pub type RigController = FlowController<
    CurrentReceiver,
    CurrentReceiver,
    GpioRelays,
    CurrentTransmitter,
    IwdgWatchdog,
    StackHeadroom,
>;

pub type RigPort = ChannelPort<'static, CriticalSectionRawMutex>;

/// Runs the control loop forever, yielding to the USB task between passes.
#[embassy_executor::task]
pub async fn run(mut controller: RigController, mut port: RigPort, mut telemetry: TelemetryRecorder) -> ! {
    let clock = EmbassyClock;
    controller.start(clock.now_ms(), &mut telemetry);
    defmt::info!("control: loop running");

    loop {
        let summary = controller.poll(&clock, &mut port, &mut telemetry);
        if summary.commands_applied > 0 {
            defmt::debug!(
                "control: {} command(s) applied, {} reply(ies) dropped so far",
                summary.commands_applied,
                dropped_replies()
            );
        }
        yield_now().await;
    }
}
