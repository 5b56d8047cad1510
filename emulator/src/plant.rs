//! Simulated tunnel hydraulics and the host-side hardware seams around them.

use std::cell::RefCell;
use std::rc::Rc;
use std::time::{Duration, Instant};

use controller_core::acquisition::ValueSource;
use controller_core::actuator::OutputDriver;
use controller_core::calibration::{
    DEFAULT_FLOW_FULL_SCALE_M3H, FLOW_RECEIVER, LOOP_MAX_MA, LOOP_MIN_MA, PRESSURE_RECEIVER,
    PUMP_TRANSMITTER, pump_ma_to_pct,
};
use controller_core::clock::{Micros, Millis, MonotonicClock};
use controller_core::controller::HardwareWatchdog;
use controller_core::relays::{RELAY_COUNT, RelayId, RelayOutputs};

/// Steady-state flow per percent of pump speed.
const FLOW_PER_PUMP_PCT: f32 = 0.25;

/// Time constant of the pump and pipe run.
const FLOW_TIME_CONSTANT_S: f32 = 2.0;

/// Differential pressure across the venturi at full-scale flow.
const FULL_SCALE_PRESSURE_MBAR: f32 = 170.0;

/// First-order model of the tunnel: flow chases a target set by the pump.
#[derive(Debug)]
pub struct Plant {
    relays: [bool; RELAY_COUNT],
    pump_code: u16,
    flow_m3h: f32,
}

impl Plant {
    pub fn new() -> Self {
        Self {
            relays: [false; RELAY_COUNT],
            pump_code: 0,
            flow_m3h: 0.0,
        }
    }

    pub fn shared() -> SharedPlant {
        Rc::new(RefCell::new(Self::new()))
    }

    pub fn relay(&self, relay: RelayId) -> bool {
        self.relays[relay.index()]
    }

    pub fn pump_pct(&self) -> f32 {
        let ma = PUMP_TRANSMITTER.code_to_ma(f32::from(self.pump_code));
        pump_ma_to_pct(ma).max(0.0)
    }

    pub fn flow_m3h(&self) -> f32 {
        self.flow_m3h
    }

    pub fn pressure_mbar(&self) -> f32 {
        let ratio = self.flow_m3h / DEFAULT_FLOW_FULL_SCALE_M3H;
        FULL_SCALE_PRESSURE_MBAR * ratio * ratio
    }

    /// Advances the flow by `dt` towards what the pump currently delivers.
    pub fn advance(&mut self, dt: Duration) {
        let target = if self.relay(RelayId::PUMP_ENABLE) {
            self.pump_pct() * FLOW_PER_PUMP_PCT
        } else {
            0.0
        };
        let step = (dt.as_secs_f32() / FLOW_TIME_CONSTANT_S).min(1.0);
        self.flow_m3h += (target - self.flow_m3h) * step;
    }

    fn flow_code(&self) -> u16 {
        let span = LOOP_MAX_MA - LOOP_MIN_MA;
        let ma = LOOP_MIN_MA + self.flow_m3h / DEFAULT_FLOW_FULL_SCALE_M3H * span;
        FLOW_RECEIVER.ma_to_code(ma)
    }

    fn pressure_code(&self) -> u16 {
        let ma = self.pressure_mbar() / FULL_SCALE_PRESSURE_MBAR * 16.072 + 4.01;
        PRESSURE_RECEIVER.ma_to_code(ma)
    }
}

impl Default for Plant {
    fn default() -> Self {
        Self::new()
    }
}

pub type SharedPlant = Rc<RefCell<Plant>>;

/// Which receiver a [`PlantSensor`] emulates.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SensorKind {
    Pressure,
    Flow,
}

pub struct PlantSensor {
    plant: SharedPlant,
    kind: SensorKind,
}

impl PlantSensor {
    pub fn new(plant: SharedPlant, kind: SensorKind) -> Self {
        Self { plant, kind }
    }
}

impl ValueSource for PlantSensor {
    fn read(&mut self) -> u32 {
        let plant = self.plant.borrow();
        let code = match self.kind {
            SensorKind::Pressure => plant.pressure_code(),
            SensorKind::Flow => plant.flow_code(),
        };
        u32::from(code)
    }
}

pub struct PlantRelays(pub SharedPlant);

impl RelayOutputs for PlantRelays {
    fn write(&mut self, relay: RelayId, on: bool) {
        self.0.borrow_mut().relays[relay.index()] = on;
    }
}

pub struct PlantPump(pub SharedPlant);

impl OutputDriver<u16> for PlantPump {
    fn write(&mut self, code: u16) {
        self.0.borrow_mut().pump_code = code;
    }
}

/// Wall clock measured from emulator start.
#[derive(Copy, Clone, Debug)]
pub struct HostClock {
    origin: Instant,
}

impl HostClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for HostClock {
    fn default() -> Self {
        Self::new()
    }
}

impl MonotonicClock for HostClock {
    #[allow(clippy::cast_possible_truncation)]
    fn now_ms(&self) -> Millis {
        self.origin.elapsed().as_millis() as Millis
    }

    #[allow(clippy::cast_possible_truncation)]
    fn now_us(&self) -> Micros {
        self.origin.elapsed().as_micros() as Micros
    }
}

/// Watchdog that reports expiry instead of resetting the process.
#[derive(Debug, Default)]
pub struct EmulatedWatchdog {
    timeout: Option<Duration>,
    last_reset: Option<Instant>,
}

impl EmulatedWatchdog {
    /// Whether the watchdog would have reset the controller by now.
    pub fn has_expired(&self) -> bool {
        match (self.timeout, self.last_reset) {
            (Some(timeout), Some(last)) => last.elapsed() > timeout,
            _ => false,
        }
    }
}

impl HardwareWatchdog for EmulatedWatchdog {
    fn enable(&mut self, timeout_ms: Millis) {
        self.timeout = Some(Duration::from_millis(u64::from(timeout_ms)));
        self.last_reset = Some(Instant::now());
    }

    fn reset(&mut self) {
        self.last_reset = Some(Instant::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flow_settles_only_with_the_pump_relay_on() {
        let plant = Plant::shared();
        PlantPump(plant.clone()).write(PUMP_TRANSMITTER.ma_to_code(LOOP_MIN_MA + 0.16 * 40.0));

        plant.borrow_mut().advance(Duration::from_secs(30));
        assert!(plant.borrow().flow_m3h().abs() < f32::EPSILON);

        PlantRelays(plant.clone()).write(RelayId::PUMP_ENABLE, true);
        for _ in 0..300 {
            plant.borrow_mut().advance(Duration::from_millis(100));
        }
        let flow = plant.borrow().flow_m3h();
        assert!((flow - 10.0).abs() < 0.2, "flow {flow}");
    }

    #[test]
    fn idle_rig_reads_bottom_of_scale() {
        let plant = Plant::shared();
        let mut flow = PlantSensor::new(plant.clone(), SensorKind::Flow);
        let mut pressure = PlantSensor::new(plant, SensorKind::Pressure);

        assert_eq!(flow.read(), u32::from(FLOW_RECEIVER.ma_to_code(LOOP_MIN_MA)));
        assert_eq!(pressure.read(), u32::from(PRESSURE_RECEIVER.ma_to_code(4.01)));
    }
}
