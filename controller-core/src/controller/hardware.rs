//! Hardware seams consumed by [`super::FlowController`].

use crate::actuator::OutputDriver;
use crate::calibration::LinearCalibration;
use crate::clock::Millis;
use crate::commands::{CommandLine, CommandSource};
use crate::report::NoMemoryProbe;

/// Independent hardware watchdog.
pub trait HardwareWatchdog {
    /// Starts the watchdog; the process restarts unless [`reset`](Self::reset)
    /// is called at least once per `timeout_ms`.
    fn enable(&mut self, timeout_ms: Millis);

    fn reset(&mut self);
}

/// Watchdog stand-in for hosts without one.
#[derive(Copy, Clone, Debug, Default)]
pub struct NoopWatchdog;

impl HardwareWatchdog for NoopWatchdog {
    fn enable(&mut self, _timeout_ms: Millis) {}

    fn reset(&mut self) {}
}

/// Line-oriented links to the host program and the debug console.
pub trait CommandPort {
    /// Next complete line received on `source`, if one is waiting. Never blocks.
    fn next_line(&mut self, source: CommandSource) -> Option<CommandLine>;

    /// Queues a reply line on `source`. Lines that cannot be queued are dropped.
    fn reply(&mut self, source: CommandSource, line: &str);
}

/// Physical devices driven by the control loop.
///
/// `pressure` and `flow` are the raw current-loop receivers, `relays` the relay
/// board, `pump` the current-loop transmitter taking converter codes.
pub struct Peripherals<P, F, R, M, W, Q = NoMemoryProbe> {
    pub pressure: P,
    pub flow: F,
    pub relays: R,
    pub pump: M,
    pub watchdog: W,
    pub memory: Q,
}

/// Drives a code-based transmitter from a loop current.
pub(crate) struct PumpLine<'a, M: ?Sized> {
    pub(crate) driver: &'a mut M,
    pub(crate) calibration: LinearCalibration,
}

impl<M: OutputDriver<u16> + ?Sized> OutputDriver<f32> for PumpLine<'_, M> {
    fn begin(&mut self) {
        self.driver.begin();
    }

    fn write(&mut self, ma: f32) {
        self.driver.write(self.calibration.ma_to_code(ma));
    }
}
