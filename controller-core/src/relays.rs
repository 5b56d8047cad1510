//! Relay bank of the rig.
//!
//! Relays are numbered 1 through 9 as wired on the relay boards:
//!
//! | Relay | Role |
//! |-------|------|
//! | 1–3   | heater power-supply enables, gated by the thermal interlock |
//! | 4–8   | bubble injection valves |
//! | 9     | tunnel pump enable, gates automatic flow control |

use core::fmt;

use crate::actuator::{Actuator, OutputDriver};

/// Number of relays on the rig.
pub const RELAY_COUNT: usize = 9;

/// One-based relay number.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct RelayId(u8);

impl RelayId {
    pub const HEATER_PSU_1: Self = Self(1);
    pub const HEATER_PSU_2: Self = Self(2);
    pub const HEATER_PSU_3: Self = Self(3);
    pub const PUMP_ENABLE: Self = Self(9);

    /// Returns the relay with the given number, if it exists.
    #[must_use]
    pub const fn new(number: u8) -> Option<Self> {
        if number >= 1 && number as usize <= RELAY_COUNT {
            Some(Self(number))
        } else {
            None
        }
    }

    #[must_use]
    pub const fn number(self) -> u8 {
        self.0
    }

    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize - 1
    }

    /// Iterates every relay in numeric order.
    #[allow(clippy::cast_possible_truncation)]
    pub fn all() -> impl Iterator<Item = RelayId> {
        (1..=RELAY_COUNT as u8).map(Self)
    }
}

impl fmt::Display for RelayId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "r{}", self.0)
    }
}

/// Relays switched off by the thermal interlock.
pub const HEATER_PSU_RELAYS: [RelayId; 3] = [
    RelayId::HEATER_PSU_1,
    RelayId::HEATER_PSU_2,
    RelayId::HEATER_PSU_3,
];

/// Relays driving the bubble injection valves.
pub const BUBBLE_VALVE_RELAYS: [RelayId; 5] =
    [RelayId(4), RelayId(5), RelayId(6), RelayId(7), RelayId(8)];

/// Requested change of a relay state.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum RelayAction {
    Toggle,
    On,
    Off,
}

impl RelayAction {
    /// Resolves the action against the current desired state.
    #[must_use]
    pub const fn resolve(self, current: bool) -> bool {
        match self {
            RelayAction::Toggle => !current,
            RelayAction::On => true,
            RelayAction::Off => false,
        }
    }
}

impl From<bool> for RelayAction {
    fn from(on: bool) -> Self {
        if on { RelayAction::On } else { RelayAction::Off }
    }
}

/// Digital outputs backing the relay bank.
pub trait RelayOutputs {
    /// Configures the outputs before the first write.
    fn begin(&mut self) {}

    /// Drives a single relay coil.
    fn write(&mut self, relay: RelayId, on: bool);
}

/// Adapts one relay of a [`RelayOutputs`] implementation to [`OutputDriver`].
struct RelayLine<'a, R: ?Sized> {
    outputs: &'a mut R,
    relay: RelayId,
}

impl<R: RelayOutputs + ?Sized> OutputDriver<bool> for RelayLine<'_, R> {
    fn write(&mut self, value: bool) {
        self.outputs.write(self.relay, value);
    }
}

/// Write-on-change state of every relay.
#[derive(Clone, Debug, PartialEq)]
pub struct RelayBank {
    relays: [Actuator<bool>; RELAY_COUNT],
}

impl RelayBank {
    /// Creates a bank with every relay off.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            relays: [Actuator::new(false); RELAY_COUNT],
        }
    }

    /// Updates the desired state of one relay without touching hardware.
    pub fn command(&mut self, relay: RelayId, action: RelayAction) {
        let actuator = &mut self.relays[relay.index()];
        actuator.set_desired(action.resolve(actuator.desired()));
    }

    /// Sets the desired state of several relays.
    pub fn set_all(&mut self, relays: &[RelayId], on: bool) {
        for relay in relays {
            self.relays[relay.index()].set_desired(on);
        }
    }

    /// Switches every relay off on the next update.
    pub fn all_off(&mut self) {
        for actuator in &mut self.relays {
            actuator.set_desired(false);
        }
    }

    #[must_use]
    pub const fn desired(&self, relay: RelayId) -> bool {
        self.relays[relay.index()].desired()
    }

    /// State last written to the relay output.
    #[must_use]
    pub const fn is_on(&self, relay: RelayId) -> bool {
        self.relays[relay.index()].applied()
    }

    /// Initializes the outputs and writes every relay unconditionally.
    pub fn begin<R: RelayOutputs + ?Sized>(&mut self, outputs: &mut R) {
        outputs.begin();
        for relay in RelayId::all() {
            let mut line = RelayLine {
                outputs: &mut *outputs,
                relay,
            };
            self.relays[relay.index()].apply(&mut line);
        }
    }

    /// Writes every relay whose desired state changed. Returns the number of writes.
    pub fn update<R: RelayOutputs + ?Sized>(&mut self, outputs: &mut R) -> usize {
        let mut writes = 0;
        for relay in RelayId::all() {
            let actuator = &mut self.relays[relay.index()];
            if actuator.needs_update() {
                let mut line = RelayLine {
                    outputs: &mut *outputs,
                    relay,
                };
                actuator.update(&mut line);
                writes += 1;
            }
        }
        writes
    }
}

impl Default for RelayBank {
    fn default() -> Self {
        Self::new()
    }
}
