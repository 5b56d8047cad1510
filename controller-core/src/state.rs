//! Shared control state of the rig.

use crate::actuator::Actuator;
use crate::calibration::{LOOP_MIN_MA, pump_ma_to_pct, pump_pct_to_ma};
use crate::relays::{RelayBank, RelayId};

/// One current-loop reading in its raw, loop and engineering forms.
///
/// Every field is `NaN` until the channel takes its first sample.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Reading {
    /// Filtered converter code.
    pub code: f32,
    pub ma: f32,
    /// Engineering value (mbar for pressure, m³/h for flow).
    pub value: f32,
}

impl Reading {
    pub const UNKNOWN: Self = Self {
        code: f32::NAN,
        ma: f32::NAN,
        value: f32::NAN,
    };

    #[must_use]
    pub fn is_known(&self) -> bool {
        !self.value.is_nan()
    }
}

impl Default for Reading {
    fn default() -> Self {
        Self::UNKNOWN
    }
}

/// Readings, outputs and operator flags owned by the control loop.
#[derive(Clone, Debug, PartialEq)]
pub struct ControlState {
    /// Gas-volume-fraction differential pressure, in mbar.
    pub pressure: Reading,
    /// Tunnel flow rate, in m³/h.
    pub flow: Reading,
    /// Flow setpoint in m³/h.
    pub setpoint_m3h: f32,
    /// Automatic flow control requested by the host.
    pub auto_enabled: bool,
    pub relays: RelayBank,
    pump: Actuator<f32>,
    pump_pct: f32,
}

impl ControlState {
    /// Power-on state: relays off, pump at minimum, readings unknown.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            pressure: Reading::UNKNOWN,
            flow: Reading::UNKNOWN,
            setpoint_m3h: 0.0,
            auto_enabled: false,
            relays: RelayBank::new(),
            pump: Actuator::new(LOOP_MIN_MA),
            pump_pct: 0.0,
        }
    }

    /// Pump drive as a loop current; keeps the percentage in sync.
    pub fn set_pump_ma(&mut self, ma: f32) {
        self.pump.set_desired(ma);
        self.pump_pct = pump_ma_to_pct(ma);
    }

    /// Pump drive as a speed percentage; keeps the loop current in sync.
    pub fn set_pump_pct(&mut self, pct: f32) {
        self.pump_pct = pct;
        self.pump.set_desired(pump_pct_to_ma(pct));
    }

    /// Desired pump drive current.
    #[must_use]
    pub const fn pump_ma(&self) -> f32 {
        self.pump.desired()
    }

    #[must_use]
    pub const fn pump_pct(&self) -> f32 {
        self.pump_pct
    }

    pub(crate) fn pump_mut(&mut self) -> &mut Actuator<f32> {
        &mut self.pump
    }

    /// Automatic control may only run with the pump relay energized.
    #[must_use]
    pub const fn automatic_permitted(&self) -> bool {
        self.auto_enabled && self.relays.is_on(RelayId::PUMP_ENABLE)
    }
}

impl Default for ControlState {
    fn default() -> Self {
        Self::new()
    }
}
