//! Installation parameters of the flow rig.

use core::fmt;

use crate::acquisition::ChannelConfig;
use crate::calibration::{
    DEFAULT_FLOW_FULL_SCALE_M3H, FLOW_RECEIVER, LinearCalibration, PRESSURE_RECEIVER,
    PUMP_TRANSMITTER,
};
use crate::clock::Millis;
use crate::gains::GainScheduleConfig;
use crate::interlock::DEFAULT_OKAY_TIMEOUT_MS;
use crate::pid::DEFAULT_SAMPLE_TIME_MS;

/// Hardware watchdog period.
pub const DEFAULT_WATCHDOG_TIMEOUT_MS: Millis = 1_000;

/// Interval at which the loop refreshes the watchdog.
pub const DEFAULT_WATCHDOG_REFRESH_MS: Millis = 800;

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct ControllerConfig {
    /// Differential pressure channel: 2 ms sampling, 1 Hz cut-off.
    pub pressure_channel: ChannelConfig,
    /// Flow channel: 25 ms sampling, 0.2 Hz cut-off.
    pub flow_channel: ChannelConfig,
    pub pressure_calibration: LinearCalibration,
    pub flow_calibration: LinearCalibration,
    pub pump_calibration: LinearCalibration,
    pub flow_full_scale_m3h: f32,
    pub pid_sample_time_ms: Millis,
    /// Pump speed range available to automatic control, in percent.
    pub pump_min_pct: f32,
    pub pump_max_pct: f32,
    pub gain_schedule: GainScheduleConfig,
    pub interlock_timeout_ms: Millis,
    pub watchdog_timeout_ms: Millis,
    pub watchdog_refresh_ms: Millis,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            pressure_channel: ChannelConfig::from_millis(2, 1.0),
            flow_channel: ChannelConfig::from_millis(25, 0.2),
            pressure_calibration: PRESSURE_RECEIVER,
            flow_calibration: FLOW_RECEIVER,
            pump_calibration: PUMP_TRANSMITTER,
            flow_full_scale_m3h: DEFAULT_FLOW_FULL_SCALE_M3H,
            pid_sample_time_ms: DEFAULT_SAMPLE_TIME_MS,
            pump_min_pct: 0.0,
            pump_max_pct: 81.0,
            gain_schedule: GainScheduleConfig::default(),
            interlock_timeout_ms: DEFAULT_OKAY_TIMEOUT_MS,
            watchdog_timeout_ms: DEFAULT_WATCHDOG_TIMEOUT_MS,
            watchdog_refresh_ms: DEFAULT_WATCHDOG_REFRESH_MS,
        }
    }
}

/// Inconsistent installation parameters.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ConfigError {
    ZeroChannelInterval,
    InvalidCutoff,
    InvalidCalibration,
    InvalidFlowRange,
    ZeroSampleTime,
    InvalidOutputLimits,
    NegativeGain,
    InvalidSwitchBand,
    ZeroInterlockTimeout,
    WatchdogRefreshTooSlow,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::ZeroChannelInterval => f.write_str("channel interval must be positive"),
            ConfigError::InvalidCutoff => f.write_str("cut-off frequency must be positive"),
            ConfigError::InvalidCalibration => f.write_str("calibration points must differ"),
            ConfigError::InvalidFlowRange => f.write_str("flow full scale must be positive"),
            ConfigError::ZeroSampleTime => f.write_str("pid sample time must be positive"),
            ConfigError::InvalidOutputLimits => {
                f.write_str("pump minimum must be below the maximum")
            }
            ConfigError::NegativeGain => f.write_str("gains must be finite and non-negative"),
            ConfigError::InvalidSwitchBand => {
                f.write_str("switch threshold and deadband must be non-negative")
            }
            ConfigError::ZeroInterlockTimeout => f.write_str("interlock timeout must be positive"),
            ConfigError::WatchdogRefreshTooSlow => {
                f.write_str("watchdog refresh must be shorter than its timeout")
            }
        }
    }
}

impl ControllerConfig {
    /// Checks internal consistency.
    ///
    /// # Errors
    ///
    /// Returns the first [`ConfigError`] found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for channel in [&self.pressure_channel, &self.flow_channel] {
            if channel.interval_us == 0 {
                return Err(ConfigError::ZeroChannelInterval);
            }
            if !(channel.cutoff_hz.is_finite() && channel.cutoff_hz > 0.0) {
                return Err(ConfigError::InvalidCutoff);
            }
        }

        let calibrations = [
            &self.pressure_calibration,
            &self.flow_calibration,
            &self.pump_calibration,
        ];
        if !calibrations.iter().all(|calibration| calibration.is_valid()) {
            return Err(ConfigError::InvalidCalibration);
        }

        if !(self.flow_full_scale_m3h.is_finite() && self.flow_full_scale_m3h > 0.0) {
            return Err(ConfigError::InvalidFlowRange);
        }
        if self.pid_sample_time_ms == 0 {
            return Err(ConfigError::ZeroSampleTime);
        }
        if !(self.pump_min_pct.is_finite()
            && self.pump_max_pct.is_finite()
            && self.pump_min_pct < self.pump_max_pct)
        {
            return Err(ConfigError::InvalidOutputLimits);
        }

        let schedule = &self.gain_schedule;
        if !(schedule.fast.is_valid() && schedule.stable.is_valid()) {
            return Err(ConfigError::NegativeGain);
        }
        if !(schedule.switch_threshold_pct >= 0.0 && schedule.deadband_pct >= 0.0) {
            return Err(ConfigError::InvalidSwitchBand);
        }

        if self.interlock_timeout_ms == 0 {
            return Err(ConfigError::ZeroInterlockTimeout);
        }
        if self.watchdog_refresh_ms >= self.watchdog_timeout_ms {
            return Err(ConfigError::WatchdogRefreshTooSlow);
        }
        Ok(())
    }
}
