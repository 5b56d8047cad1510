//! Cooperative control loop.
//!
//! [`FlowController::poll`] runs one pass of the loop. Every step either
//! finishes in bounded time or is skipped until its own interval elapses, so
//! the caller simply invokes `poll` forever:
//!
//! 1. sample the acquisition channels that are due;
//! 2. apply at most one pending command per link;
//! 3. engage or release automatic control;
//! 4. run the gain-set policy;
//! 5. evaluate the PID law and stage its pump output;
//! 6. evaluate the thermal interlock;
//! 7. write changed relays and the pump;
//! 8. refresh the watchdog when its cadence is due.
//!
//! Later steps observe the results of earlier steps within the same pass.

mod hardware;

pub use hardware::{CommandPort, HardwareWatchdog, NoopWatchdog, Peripherals};

use crate::acquisition::{FilteredChannel, ValueSource};
use crate::actuator::OutputDriver;
use crate::calibration::{LOOP_MAX_MA, LOOP_MIN_MA, flow_m3h, pressure_mbar};
use crate::clock::{Cadence, Millis, MonotonicClock};
use crate::commands::{self, Command, CommandSource, InterlockCommand};
use crate::config::{ConfigError, ControllerConfig};
use crate::gains::GainScheduler;
use crate::interlock::{InterlockEdge, ThermalInterlock};
use crate::pid::{Direction, Mode, Pid, PidConfigError};
use crate::relays::{BUBBLE_VALVE_RELAYS, HEATER_PSU_RELAYS, RelayOutputs};
use crate::report::{MemoryProbe, ReportLine, StateReport};
use crate::state::{ControlState, Reading};
use crate::telemetry::{ControlEvent, EventSink};

use hardware::PumpLine;

/// What happened during one [`FlowController::poll`] pass.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct PassSummary {
    pub pressure_sampled: bool,
    pub flow_sampled: bool,
    pub commands_applied: u8,
    pub pid_output: Option<f32>,
    pub interlock_edge: Option<InterlockEdge>,
    pub relay_writes: usize,
    pub pump_written: bool,
    pub watchdog_refreshed: bool,
}

pub struct FlowController<P, F, R, M, W, Q> {
    config: ControllerConfig,
    peripherals: Peripherals<P, F, R, M, W, Q>,
    state: ControlState,
    pressure: FilteredChannel,
    flow: FilteredChannel,
    pid: Pid,
    gains: GainScheduler,
    interlock: ThermalInterlock,
    watchdog: Cadence,
    watchdog_feeding: bool,
}

impl<P, F, R, M, W, Q> FlowController<P, F, R, M, W, Q>
where
    P: ValueSource,
    F: ValueSource,
    R: RelayOutputs,
    M: OutputDriver<u16>,
    W: HardwareWatchdog,
    Q: MemoryProbe,
{
    /// Builds a controller around validated installation parameters.
    ///
    /// # Errors
    ///
    /// Returns the [`ConfigError`] reported by [`ControllerConfig::validate`].
    pub fn new(
        config: ControllerConfig,
        peripherals: Peripherals<P, F, R, M, W, Q>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;

        let mut pid =
            Pid::new(config.gain_schedule.fast, Direction::Direct).map_err(config_error)?;
        pid.set_sample_time(config.pid_sample_time_ms)
            .map_err(config_error)?;
        pid.set_output_limits(config.pump_min_pct, config.pump_max_pct)
            .map_err(config_error)?;

        Ok(Self {
            pressure: FilteredChannel::new(config.pressure_channel),
            flow: FilteredChannel::new(config.flow_channel),
            gains: GainScheduler::new(config.gain_schedule),
            interlock: ThermalInterlock::new(config.interlock_timeout_ms, 0),
            watchdog: Cadence::new(config.watchdog_refresh_ms, 0),
            watchdog_feeding: true,
            state: ControlState::new(),
            pid,
            config,
            peripherals,
        })
    }

    /// Writes the initial output state and arms the watchdog.
    pub fn start<E: EventSink + ?Sized>(&mut self, now_ms: Millis, events: &mut E) {
        let peripherals = &mut self.peripherals;
        self.state.relays.begin(&mut peripherals.relays);
        let mut pump = PumpLine {
            driver: &mut peripherals.pump,
            calibration: self.config.pump_calibration,
        };
        self.state.pump_mut().begin(&mut pump);

        self.interlock.reset(now_ms);
        peripherals.watchdog.enable(self.config.watchdog_timeout_ms);
        self.watchdog.restart(now_ms);
        events.record(ControlEvent::Started, now_ms);
    }

    /// Runs one pass of the control loop.
    pub fn poll<C, T, E>(&mut self, clock: &C, port: &mut T, events: &mut E) -> PassSummary
    where
        C: MonotonicClock + ?Sized,
        T: CommandPort + ?Sized,
        E: EventSink + ?Sized,
    {
        let now_ms = clock.now_ms();
        let mut summary = PassSummary::default();

        self.acquire(clock.now_us(), &mut summary);

        for source in [CommandSource::Debug, CommandSource::Host] {
            if let Some(line) = port.next_line(source)
                && self.handle_line(source, &line, now_ms, port, events)
            {
                summary.commands_applied += 1;
            }
        }

        self.update_mode(now_ms, events);
        self.schedule_gains(now_ms, events);

        summary.pid_output = self
            .pid
            .compute(self.state.flow.value, self.state.setpoint_m3h, now_ms);
        if let Some(output) = summary.pid_output {
            self.state.set_pump_pct(output);
        }

        summary.interlock_edge = self.interlock.evaluate(now_ms);
        match summary.interlock_edge {
            Some(InterlockEdge::Tripped) => {
                self.state.relays.set_all(&HEATER_PSU_RELAYS, false);
                events.record(ControlEvent::InterlockTripped, now_ms);
            }
            Some(InterlockEdge::Cleared) => {
                self.state.relays.set_all(&HEATER_PSU_RELAYS, true);
                events.record(ControlEvent::InterlockCleared, now_ms);
            }
            None => {}
        }

        let peripherals = &mut self.peripherals;
        summary.relay_writes = self.state.relays.update(&mut peripherals.relays);
        let pump = self.state.pump_mut();
        if pump.needs_update() {
            pump.update(&mut PumpLine {
                driver: &mut peripherals.pump,
                calibration: self.config.pump_calibration,
            });
            summary.pump_written = true;
        }

        if self.watchdog_feeding && self.watchdog.is_due(now_ms) {
            peripherals.watchdog.reset();
            summary.watchdog_refreshed = true;
        }

        summary
    }

    fn acquire(&mut self, now_us: u32, summary: &mut PassSummary) {
        let calibration = &self.config;

        summary.pressure_sampled = self
            .pressure
            .poll(&mut self.peripherals.pressure, now_us);
        if summary.pressure_sampled {
            let code = self.pressure.value();
            let ma = calibration.pressure_calibration.code_to_ma(code);
            self.state.pressure = Reading {
                code,
                ma,
                value: pressure_mbar(ma),
            };
        }

        summary.flow_sampled = self.flow.poll(&mut self.peripherals.flow, now_us);
        if summary.flow_sampled {
            let code = self.flow.value();
            let ma = calibration.flow_calibration.code_to_ma(code);
            self.state.flow = Reading {
                code,
                ma,
                value: flow_m3h(ma, calibration.flow_full_scale_m3h),
            };
        }
    }

    fn update_mode<E: EventSink + ?Sized>(&mut self, now_ms: Millis, events: &mut E) {
        let automatic = self.state.automatic_permitted();
        let engaged = self.pid.mode() == Mode::Automatic;
        if automatic == engaged {
            return;
        }

        if automatic {
            self.pid
                .set_mode(Mode::Automatic, self.state.flow.value, self.state.pump_pct());
            events.record(ControlEvent::AutomaticEngaged, now_ms);
        } else {
            self.pid
                .set_mode(Mode::Manual, self.state.flow.value, self.state.pump_pct());
            events.record(ControlEvent::AutomaticReleased, now_ms);
        }
    }

    fn schedule_gains<E: EventSink + ?Sized>(&mut self, now_ms: Millis, events: &mut E) {
        let granted = self.gains.evaluate(
            self.state.flow.value,
            self.state.setpoint_m3h,
            now_ms,
            self.state.auto_enabled,
        );
        if let Some(set) = granted {
            // Gain sets are validated with the configuration.
            if self.pid.set_tunings(self.config.gain_schedule.gains(set)).is_ok() {
                events.record(ControlEvent::GainSetApplied(set), now_ms);
            }
        }
    }

    /// Parses and applies one command line. Returns `false` if it was ignored.
    fn handle_line<T, E>(
        &mut self,
        source: CommandSource,
        line: &str,
        now_ms: Millis,
        port: &mut T,
        events: &mut E,
    ) -> bool
    where
        T: CommandPort + ?Sized,
        E: EventSink + ?Sized,
    {
        match commands::parse(line, source) {
            Ok(command) => {
                self.apply(command, source, now_ms, port, events);
                true
            }
            Err(_) => false,
        }
    }

    /// Applies a parsed command as if it had arrived on `source`.
    pub fn apply<T, E>(
        &mut self,
        command: Command,
        source: CommandSource,
        now_ms: Millis,
        port: &mut T,
        events: &mut E,
    ) where
        T: CommandPort + ?Sized,
        E: EventSink + ?Sized,
    {
        match command {
            Command::Identify => port.reply(source, source.identity()),
            Command::Report => {
                if let Ok(line) = self.report_line() {
                    port.reply(source, &line);
                }
            }
            Command::SoftReset => {
                self.soft_reset(now_ms);
                events.record(ControlEvent::SoftReset(source), now_ms);
            }
            Command::Reboot => {
                self.watchdog_feeding = false;
                port.reply(source, "watchdog refresh stopped, restarting");
                events.record(ControlEvent::RebootRequested, now_ms);
            }
            Command::Relay { relay, action } => self.state.relays.command(relay, action),
            Command::BubbleValves(on) => self.state.relays.set_all(&BUBBLE_VALVE_RELAYS, on),
            Command::PumpCurrent(ma) => self.state.set_pump_ma(ma.clamp(LOOP_MIN_MA, LOOP_MAX_MA)),
            Command::FlowSetpoint(setpoint) => {
                self.state.setpoint_m3h = setpoint.clamp(0.0, self.config.flow_full_scale_m3h);
            }
            Command::AutoControl(on) => self.state.auto_enabled = on,
            Command::Interlock(InterlockCommand::Enable) => {
                self.interlock.enable();
                if source == CommandSource::Debug {
                    port.reply(source, "otp enabled");
                }
                events.record(ControlEvent::InterlockEnabled, now_ms);
            }
            Command::Interlock(InterlockCommand::Disable) => {
                self.interlock.disable();
                if source == CommandSource::Debug {
                    port.reply(source, "otp disabled");
                }
                events.record(ControlEvent::InterlockDisabled, now_ms);
            }
            Command::Interlock(InterlockCommand::Okay) => self.interlock.confirm_okay(now_ms),
            Command::Interlock(InterlockCommand::Trip) => self.interlock.trip(),
        }
    }

    /// Safe defaults: relays off, pump at minimum, automatic control off,
    /// interlock armed and fresh, fast gain set.
    fn soft_reset(&mut self, now_ms: Millis) {
        self.state.relays.all_off();
        self.state.set_pump_ma(LOOP_MIN_MA);
        self.state.auto_enabled = false;
        self.state.setpoint_m3h = 0.0;
        self.interlock.reset(now_ms);
        self.gains.reset();
    }

    /// Renders the tab-delimited state report.
    ///
    /// # Errors
    ///
    /// Returns [`core::fmt::Error`] if the report does not fit its buffer.
    pub fn report_line(&self) -> Result<ReportLine, core::fmt::Error> {
        StateReport::new(
            &self.state,
            self.interlock.is_enabled(),
            self.peripherals.memory.free_bytes(),
        )
        .render()
    }

    #[must_use]
    pub const fn state(&self) -> &ControlState {
        &self.state
    }

    #[must_use]
    pub const fn interlock(&self) -> &ThermalInterlock {
        &self.interlock
    }

    #[must_use]
    pub const fn pid(&self) -> &Pid {
        &self.pid
    }

    #[must_use]
    pub const fn gains(&self) -> &GainScheduler {
        &self.gains
    }

    #[must_use]
    pub const fn config(&self) -> &ControllerConfig {
        &self.config
    }

    #[must_use]
    pub const fn pressure_channel(&self) -> &FilteredChannel {
        &self.pressure
    }

    #[must_use]
    pub const fn flow_channel(&self) -> &FilteredChannel {
        &self.flow
    }

    /// `false` once a reboot was requested and the watchdog is left to expire.
    #[must_use]
    pub const fn is_feeding_watchdog(&self) -> bool {
        self.watchdog_feeding
    }

    #[must_use]
    pub const fn peripherals(&self) -> &Peripherals<P, F, R, M, W, Q> {
        &self.peripherals
    }

    pub fn peripherals_mut(&mut self) -> &mut Peripherals<P, F, R, M, W, Q> {
        &mut self.peripherals
    }
}

fn config_error(error: PidConfigError) -> ConfigError {
    match error {
        PidConfigError::NegativeGain => ConfigError::NegativeGain,
        PidConfigError::InvalidSampleTime => ConfigError::ZeroSampleTime,
        PidConfigError::InvalidOutputLimits => ConfigError::InvalidOutputLimits,
    }
}
