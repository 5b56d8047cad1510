#![allow(dead_code)]

use std::cell::Cell;
use std::collections::VecDeque;
use std::string::String;
use std::vec::Vec;

use controller_core::acquisition::{ChannelConfig, ValueSource};
use controller_core::actuator::OutputDriver;
use controller_core::clock::{Micros, Millis, MonotonicClock};
use controller_core::commands::{CommandLine, CommandSource};
use controller_core::config::ControllerConfig;
use controller_core::controller::{
    CommandPort, FlowController, HardwareWatchdog, Peripherals, PassSummary,
};
use controller_core::relays::{RelayId, RelayOutputs};
use controller_core::report::MemoryProbe;
use controller_core::telemetry::{ControlEvent, EventSink};

pub const FREE_BYTES: usize = 1_234;

/// Millisecond clock advanced by hand.
#[derive(Default)]
pub struct MockClock {
    us: Cell<u64>,
}

impl MockClock {
    pub fn advance_ms(&self, ms: u64) {
        self.us.set(self.us.get() + ms * 1_000);
    }

    pub fn ms(&self) -> Millis {
        (self.us.get() / 1_000) as Millis
    }
}

impl MonotonicClock for MockClock {
    fn now_ms(&self) -> Millis {
        self.ms()
    }

    fn now_us(&self) -> Micros {
        self.us.get() as Micros
    }
}

/// Receiver returning a fixed converter code.
pub struct MockReceiver {
    pub code: u32,
    pub reads: usize,
}

impl MockReceiver {
    pub fn new(code: u32) -> Self {
        Self { code, reads: 0 }
    }
}

impl ValueSource for MockReceiver {
    fn read(&mut self) -> u32 {
        self.reads += 1;
        self.code
    }
}

#[derive(Default)]
pub struct RecordingRelays {
    pub begun: bool,
    pub writes: Vec<(u8, bool)>,
}

impl RecordingRelays {
    pub fn writes_to(&self, relay: RelayId) -> Vec<bool> {
        self.writes
            .iter()
            .filter(|(number, _)| *number == relay.number())
            .map(|(_, on)| *on)
            .collect()
    }
}

impl RelayOutputs for RecordingRelays {
    fn begin(&mut self) {
        self.begun = true;
    }

    fn write(&mut self, relay: RelayId, on: bool) {
        self.writes.push((relay.number(), on));
    }
}

#[derive(Default)]
pub struct RecordingPump {
    pub begun: bool,
    pub codes: Vec<u16>,
}

impl OutputDriver<u16> for RecordingPump {
    fn begin(&mut self) {
        self.begun = true;
    }

    fn write(&mut self, code: u16) {
        self.codes.push(code);
    }
}

#[derive(Default)]
pub struct MockWatchdog {
    pub timeout_ms: Option<Millis>,
    pub resets: Vec<Millis>,
    pub clock_ms: Millis,
}

impl HardwareWatchdog for MockWatchdog {
    fn enable(&mut self, timeout_ms: Millis) {
        self.timeout_ms = Some(timeout_ms);
    }

    fn reset(&mut self) {
        let stamp = self.clock_ms;
        self.resets.push(stamp);
    }
}

pub struct FixedMemory;

impl MemoryProbe for FixedMemory {
    fn free_bytes(&self) -> Option<usize> {
        Some(FREE_BYTES)
    }
}

/// Both command links, fed from queues.
#[derive(Default)]
pub struct QueuePort {
    pending: VecDeque<(CommandSource, String)>,
    pub replies: Vec<(CommandSource, String)>,
}

impl QueuePort {
    pub fn send(&mut self, source: CommandSource, line: &str) {
        self.pending.push_back((source, line.into()));
    }

    pub fn host(&mut self, line: &str) {
        self.send(CommandSource::Host, line);
    }

    pub fn debug(&mut self, line: &str) {
        self.send(CommandSource::Debug, line);
    }

    pub fn take_replies(&mut self) -> Vec<(CommandSource, String)> {
        core::mem::take(&mut self.replies)
    }
}

impl CommandPort for QueuePort {
    fn next_line(&mut self, source: CommandSource) -> Option<CommandLine> {
        let position = self
            .pending
            .iter()
            .position(|(queued, _)| *queued == source)?;
        let (_, text) = self.pending.remove(position)?;
        let mut line = CommandLine::new();
        line.push_str(&text).ok()?;
        Some(line)
    }

    fn reply(&mut self, source: CommandSource, line: &str) {
        self.replies.push((source, line.into()));
    }
}

#[derive(Default)]
pub struct RecordingEvents {
    pub events: Vec<(ControlEvent, Millis)>,
}

impl RecordingEvents {
    pub fn count(&self, event: ControlEvent) -> usize {
        self.events
            .iter()
            .filter(|(recorded, _)| *recorded == event)
            .count()
    }
}

impl EventSink for RecordingEvents {
    fn record(&mut self, event: ControlEvent, timestamp_ms: Millis) {
        self.events.push((event, timestamp_ms));
    }
}

pub type TestController = FlowController<
    MockReceiver,
    MockReceiver,
    RecordingRelays,
    RecordingPump,
    MockWatchdog,
    FixedMemory,
>;

/// Rig defaults with a flow filter fast enough to follow a step within one sample.
pub fn test_config() -> ControllerConfig {
    ControllerConfig {
        flow_channel: ChannelConfig::from_millis(25, 1_000.0),
        ..ControllerConfig::default()
    }
}

/// Controller, clock, command links and event recorder for one scenario.
pub struct Rig {
    pub controller: TestController,
    pub clock: MockClock,
    pub port: QueuePort,
    pub events: RecordingEvents,
}

impl Rig {
    pub fn new(config: ControllerConfig, pressure_code: u32, flow_code: u32) -> Self {
        let peripherals = Peripherals {
            pressure: MockReceiver::new(pressure_code),
            flow: MockReceiver::new(flow_code),
            relays: RecordingRelays::default(),
            pump: RecordingPump::default(),
            watchdog: MockWatchdog::default(),
            memory: FixedMemory,
        };
        let mut controller = FlowController::new(config, peripherals).expect("valid config");
        let mut events = RecordingEvents::default();
        controller.start(0, &mut events);

        Self {
            controller,
            clock: MockClock::default(),
            port: QueuePort::default(),
            events,
        }
    }

    pub fn started() -> Self {
        Self::new(test_config(), 763, 758)
    }

    /// Advances the clock and runs one pass.
    pub fn step(&mut self, ms: u64) -> PassSummary {
        self.clock.advance_ms(ms);
        self.controller.peripherals_mut().watchdog.clock_ms = self.clock.ms();
        self.controller
            .poll(&self.clock, &mut self.port, &mut self.events)
    }

    /// Runs passes `interval_ms` apart until `duration_ms` has elapsed.
    pub fn run_for(&mut self, duration_ms: u64, interval_ms: u64) {
        let mut elapsed = 0;
        while elapsed < duration_ms {
            self.step(interval_ms);
            elapsed += interval_ms;
        }
    }

    /// Sends a host line and runs the pass that applies it.
    pub fn host(&mut self, line: &str) -> PassSummary {
        self.port.host(line);
        self.step(1)
    }

    pub fn debug(&mut self, line: &str) -> PassSummary {
        self.port.debug(line);
        self.step(1)
    }

    /// Keeps the interlock fresh.
    pub fn okay(&mut self) {
        self.host("otp_okay");
    }

    pub fn relays(&self) -> &RecordingRelays {
        &self.controller.peripherals().relays
    }

    pub fn pump(&self) -> &RecordingPump {
        &self.controller.peripherals().pump
    }

    pub fn watchdog(&self) -> &MockWatchdog {
        &self.controller.peripherals().watchdog
    }

    pub fn set_flow_code(&mut self, code: u32) {
        self.controller.peripherals_mut().flow.code = code;
    }
}

/// Receiver code producing `m3h` on the default flow meter, rounded to the nearest code.
pub fn flow_code_for(m3h: f32) -> u32 {
    let config = ControllerConfig::default();
    let ma = 4.0 + m3h / config.flow_full_scale_m3h * 16.0;
    let calibration = config.flow_calibration;
    let code = f32::from(calibration.p1_code)
        + (ma - calibration.p1_ma) * f32::from(calibration.p2_code - calibration.p1_code)
            / (calibration.p2_ma - calibration.p1_ma);
    code.round() as u32
}
