//! Emulated controller session: the core loop wired to the simulated rig.

use std::collections::VecDeque;
use std::fs::{self, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::time::{Duration, Instant};

use controller_core::clock::MonotonicClock;
use controller_core::commands::{CommandLine, CommandSource};
use controller_core::config::ControllerConfig;
use controller_core::controller::{CommandPort, FlowController, Peripherals};
use controller_core::relays::{HEATER_PSU_RELAYS, RelayId};
use controller_core::report::NoMemoryProbe;
use controller_core::telemetry::{EventId, EventLog};

use crate::plant::{
    EmulatedWatchdog, HostClock, Plant, PlantPump, PlantRelays, PlantSensor, SensorKind,
    SharedPlant,
};

/// Events kept for display between ticks.
const EVENT_RING_CAPACITY: usize = 64;

type EmulatedController = FlowController<
    PlantSensor,
    PlantSensor,
    PlantRelays,
    PlantPump,
    EmulatedWatchdog,
    NoMemoryProbe,
>;

/// In-memory stand-in for the two USB links.
#[derive(Debug, Default)]
pub struct EmulatorPort {
    pending: VecDeque<(CommandSource, CommandLine)>,
    replies: Vec<(CommandSource, String)>,
}

impl EmulatorPort {
    /// Queues a line as if it had arrived on `source`.
    ///
    /// # Errors
    ///
    /// Returns the line back when it exceeds the firmware line buffer.
    pub fn send<'a>(&mut self, source: CommandSource, line: &'a str) -> Result<(), &'a str> {
        let line = CommandLine::try_from(line).map_err(|_| line)?;
        self.pending.push_back((source, line));
        Ok(())
    }

    pub fn take_replies(&mut self) -> Vec<(CommandSource, String)> {
        std::mem::take(&mut self.replies)
    }
}

impl CommandPort for EmulatorPort {
    fn next_line(&mut self, source: CommandSource) -> Option<CommandLine> {
        let index = self
            .pending
            .iter()
            .position(|(pending, _)| *pending == source)?;
        self.pending.remove(index).map(|(_, line)| line)
    }

    fn reply(&mut self, source: CommandSource, line: &str) {
        self.replies.push((source, line.to_string()));
    }
}

pub struct Session {
    controller: EmulatedController,
    plant: SharedPlant,
    clock: HostClock,
    port: EmulatorPort,
    events: EventLog<EVENT_RING_CAPACITY>,
    next_unreported: EventId,
    last_tick: Instant,
    restarts: u32,
    transcript: Option<TranscriptLogger>,
}

impl Session {
    /// Builds a running controller around a fresh plant.
    ///
    /// # Errors
    ///
    /// Fails when the transcript file cannot be created or the default
    /// configuration is rejected.
    pub fn new(transcript: Option<&Path>) -> io::Result<Self> {
        let transcript = transcript.map(TranscriptLogger::new).transpose()?;
        let plant = Plant::shared();
        let clock = HostClock::new();
        let mut events = EventLog::new();
        let mut controller = build_controller(&plant)?;
        controller.start(clock.now_ms(), &mut events);

        Ok(Self {
            controller,
            plant,
            clock,
            port: EmulatorPort::default(),
            events,
            next_unreported: 0,
            last_tick: Instant::now(),
            restarts: 0,
            transcript,
        })
    }

    /// Queues a command line on `source`.
    ///
    /// # Errors
    ///
    /// Fails only when writing the transcript fails.
    pub fn submit(&mut self, source: CommandSource, line: &str) -> io::Result<Vec<String>> {
        let role = TranscriptRole::from(source);
        self.log(role, line)?;
        match self.port.send(source, line) {
            Ok(()) => Ok(Vec::new()),
            Err(rejected) => {
                let message = format!("line dropped, {} bytes is too long", rejected.len());
                self.log(TranscriptRole::Emulator, &message)?;
                Ok(vec![message])
            }
        }
    }

    /// Advances the plant and runs one controller pass.
    ///
    /// Returns replies and events produced since the previous tick.
    ///
    /// # Errors
    ///
    /// Fails when writing the transcript or restarting the controller fails.
    pub fn tick(&mut self) -> io::Result<Vec<String>> {
        let now = Instant::now();
        self.plant
            .borrow_mut()
            .advance(now.duration_since(self.last_tick));
        self.last_tick = now;

        self.controller
            .poll(&self.clock, &mut self.port, &mut self.events);

        let mut output = Vec::new();
        for (source, reply) in self.port.take_replies() {
            output.push(format!("{} {reply}", reply_prefix(source)));
        }
        for record in self
            .events
            .oldest_first()
            .filter(|record| record.id >= self.next_unreported)
        {
            output.push(format!(
                "event #{} {} t={}ms",
                record.id, record.event, record.timestamp_ms
            ));
        }
        if let Some(latest) = self.events.latest() {
            self.next_unreported = latest.id.wrapping_add(1);
        }

        if self.controller.peripherals().watchdog.has_expired() {
            output.push(self.restart()?);
        }

        for line in &output {
            self.log(TranscriptRole::Emulator, line)?;
        }
        Ok(output)
    }

    /// One-line summary of the simulated rig.
    pub fn status_line(&self) -> String {
        let plant = self.plant.borrow();
        let heaters = HEATER_PSU_RELAYS
            .iter()
            .filter(|relay| plant.relay(**relay))
            .count();
        format!(
            "flow {:.2} m3/h, dp {:.1} mbar, pump {:.1}% ({}), heaters {heaters}/3, restarts {}",
            plant.flow_m3h(),
            plant.pressure_mbar(),
            plant.pump_pct(),
            if plant.relay(RelayId::PUMP_ENABLE) {
                "on"
            } else {
                "off"
            },
            self.restarts,
        )
    }

    /// Emulates the watchdog reset: outputs drop and the controller boots again.
    fn restart(&mut self) -> io::Result<String> {
        self.restarts += 1;
        *self.plant.borrow_mut() = Plant::new();
        self.controller = build_controller(&self.plant)?;
        self.controller
            .start(self.clock.now_ms(), &mut self.events);
        Ok(format!("watchdog expired, controller restarted ({})", self.restarts))
    }

    fn log(&mut self, role: TranscriptRole, line: &str) -> io::Result<()> {
        let elapsed = Duration::from_millis(u64::from(self.clock.now_ms()));
        match self.transcript.as_mut() {
            Some(transcript) => transcript.append_line(elapsed, role, line),
            None => Ok(()),
        }
    }
}

fn build_controller(plant: &SharedPlant) -> io::Result<EmulatedController> {
    let peripherals = Peripherals {
        pressure: PlantSensor::new(plant.clone(), SensorKind::Pressure),
        flow: PlantSensor::new(plant.clone(), SensorKind::Flow),
        relays: PlantRelays(plant.clone()),
        pump: PlantPump(plant.clone()),
        watchdog: EmulatedWatchdog::default(),
        memory: NoMemoryProbe,
    };
    FlowController::new(ControllerConfig::default(), peripherals)
        .map_err(|err| io::Error::other(format!("invalid rig configuration: {err}")))
}

fn reply_prefix(source: CommandSource) -> &'static str {
    match source {
        CommandSource::Host => "host <",
        CommandSource::Debug => "dbg  <",
    }
}

struct TranscriptLogger {
    writer: BufWriter<std::fs::File>,
}

impl TranscriptLogger {
    fn new(path: &Path) -> io::Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)?;

        let mut logger = Self {
            writer: BufWriter::new(file),
        };
        writeln!(logger.writer, "# Flow rig emulator transcript")?;
        writeln!(
            logger.writer,
            "# Timestamps are milliseconds since session start"
        )?;
        writeln!(logger.writer)?;
        logger.writer.flush()?;
        Ok(logger)
    }

    fn append_line(&mut self, elapsed: Duration, role: TranscriptRole, line: &str) -> io::Result<()> {
        writeln!(
            self.writer,
            "[+{:>7} ms] {} {}",
            elapsed.as_millis(),
            role.prefix(),
            line
        )?;
        self.writer.flush()
    }
}

#[derive(Copy, Clone)]
enum TranscriptRole {
    Host,
    Debug,
    Emulator,
}

impl TranscriptRole {
    fn prefix(self) -> &'static str {
        match self {
            TranscriptRole::Host => "HOST>",
            TranscriptRole::Debug => "DBG >",
            TranscriptRole::Emulator => "EMU <",
        }
    }
}

impl From<CommandSource> for TranscriptRole {
    fn from(source: CommandSource) -> Self {
        match source {
            CommandSource::Host => TranscriptRole::Host,
            CommandSource::Debug => TranscriptRole::Debug,
        }
    }
}
