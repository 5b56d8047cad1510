//! Dual gain-set scheduling for the flow loop.
//!
//! Two complete tuning sets are defined. The fast set settles the loop after a
//! setpoint change; the stable set holds steady state. The scheduler requests a
//! set from the relative tracking error with a hysteresis band around the switch
//! threshold, grants the fast set at once and grants the stable set only after
//! the fast set has not been requested for a full dwell period.

use core::fmt;

use crate::clock::{Millis, elapsed};
use crate::pid::Gains;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum GainSet {
    Fast,
    Stable,
}

impl GainSet {
    /// One-based number used in operator messages.
    #[must_use]
    pub const fn number(self) -> u8 {
        match self {
            GainSet::Fast => 1,
            GainSet::Stable => 2,
        }
    }
}

impl fmt::Display for GainSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GainSet::Fast => f.write_str("fast"),
            GainSet::Stable => f.write_str("stable"),
        }
    }
}

/// Switching policy parameters.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct GainScheduleConfig {
    pub fast: Gains,
    pub stable: Gains,
    /// Relative deviation, in percent, around which the sets switch.
    pub switch_threshold_pct: f32,
    /// Width of the hysteresis band centred on the threshold, in percent.
    pub deadband_pct: f32,
    /// Time the fast set must go unrequested before the stable set is granted.
    pub dwell_ms: Millis,
}

impl GainScheduleConfig {
    #[must_use]
    pub const fn gains(&self, set: GainSet) -> Gains {
        match set {
            GainSet::Fast => self.fast,
            GainSet::Stable => self.stable,
        }
    }
}

impl Default for GainScheduleConfig {
    fn default() -> Self {
        Self {
            fast: Gains::new(0.75, 0.2, 0.0),
            stable: Gains::new(0.3, 0.05, 0.0),
            switch_threshold_pct: 3.0,
            deadband_pct: 2.0,
            dwell_ms: 20_000,
        }
    }
}

/// Relative deviation of `measured` from `setpoint` in percent.
///
/// A zero (or negative) setpoint has no meaningful relative deviation and is
/// reported as infinite, which always requests the fast set. A non-finite
/// measurement yields `NaN`, which requests nothing.
#[must_use]
pub fn deviation_pct(measured: f32, setpoint: f32) -> f32 {
    if setpoint <= 0.0 {
        return if measured.is_nan() { f32::NAN } else { f32::INFINITY };
    }
    (measured - setpoint).abs() / setpoint * 100.0
}

#[derive(Clone, Debug, PartialEq)]
pub struct GainScheduler {
    config: GainScheduleConfig,
    requested: GainSet,
    granted: GainSet,
    applied: Option<GainSet>,
    fast_requested_at_ms: Millis,
}

impl GainScheduler {
    #[must_use]
    pub const fn new(config: GainScheduleConfig) -> Self {
        Self {
            config,
            requested: GainSet::Fast,
            granted: GainSet::Fast,
            applied: None,
            fast_requested_at_ms: 0,
        }
    }

    /// Returns to the fast set. The set is re-applied on the next evaluation.
    pub fn reset(&mut self) {
        *self = Self::new(self.config);
    }

    /// Runs one round of the switching policy.
    ///
    /// Grants only happen while `granting` is true (automatic control
    /// requested). Returns the newly granted set when it differs from the set
    /// that was last applied; the caller must push its gains into the PID.
    pub fn evaluate(
        &mut self,
        measured: f32,
        setpoint: f32,
        now_ms: Millis,
        granting: bool,
    ) -> Option<GainSet> {
        let deviation = deviation_pct(measured, setpoint);
        let half_band = self.config.deadband_pct / 2.0;

        if deviation > self.config.switch_threshold_pct + half_band {
            self.requested = GainSet::Fast;
            self.fast_requested_at_ms = now_ms;
        } else if deviation < self.config.switch_threshold_pct - half_band {
            self.requested = GainSet::Stable;
        }

        if granting && self.granted != self.requested {
            match self.requested {
                GainSet::Fast => self.granted = GainSet::Fast,
                GainSet::Stable => {
                    if elapsed(now_ms, self.fast_requested_at_ms) >= self.config.dwell_ms {
                        self.granted = GainSet::Stable;
                    }
                }
            }
        }

        if self.applied == Some(self.granted) {
            None
        } else {
            self.applied = Some(self.granted);
            Some(self.granted)
        }
    }

    #[must_use]
    pub const fn requested(&self) -> GainSet {
        self.requested
    }

    #[must_use]
    pub const fn granted(&self) -> GainSet {
        self.granted
    }

    #[must_use]
    pub const fn applied(&self) -> Option<GainSet> {
        self.applied
    }

    #[must_use]
    pub const fn config(&self) -> &GainScheduleConfig {
        &self.config
    }
}
