//! Discrete PID law with anti-windup, derivative-on-measurement, and bumpless
//! manual to automatic transfer.
//!
//! The law is evaluated at a fixed logical sample period. The working integral
//! and derivative coefficients are pre-scaled by that period, so changing the
//! period rescales them to keep the continuous-time behavior unchanged.

use core::fmt;

use crate::clock::{Millis, elapsed};

/// Proportional, integral and derivative gains as entered by an operator.
///
/// `ki` is per second and `kd` is in seconds.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Gains {
    pub kp: f32,
    pub ki: f32,
    pub kd: f32,
}

impl Gains {
    #[must_use]
    pub const fn new(kp: f32, ki: f32, kd: f32) -> Self {
        Self { kp, ki, kd }
    }

    /// Gains must be finite and non-negative; direction is configured separately.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        [self.kp, self.ki, self.kd]
            .iter()
            .all(|gain| gain.is_finite() && *gain >= 0.0)
    }
}

/// Whether the law drives the output or leaves it to the operator.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Mode {
    Manual,
    Automatic,
}

/// Sign relation between error and output.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Direction {
    /// Output increases to raise the measured value.
    Direct,
    /// Output increases to lower the measured value.
    Reverse,
}

/// Rejected configuration changes. State is left untouched.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum PidConfigError {
    NegativeGain,
    InvalidSampleTime,
    InvalidOutputLimits,
}

impl fmt::Display for PidConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PidConfigError::NegativeGain => f.write_str("gains must be finite and non-negative"),
            PidConfigError::InvalidSampleTime => f.write_str("sample time must be positive"),
            PidConfigError::InvalidOutputLimits => {
                f.write_str("output minimum must be below the maximum")
            }
        }
    }
}

/// Contribution of each term to the most recent output.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct Terms {
    pub proportional: f32,
    pub integral: f32,
    pub derivative: f32,
}

/// Default logical sample period.
pub const DEFAULT_SAMPLE_TIME_MS: Millis = 1_000;

#[derive(Clone, Debug, PartialEq)]
pub struct Pid {
    display: Gains,
    kp: f32,
    ki: f32,
    kd: f32,
    direction: Direction,
    mode: Mode,
    sample_time_ms: Millis,
    out_min: f32,
    out_max: f32,
    integral: f32,
    last_input: f32,
    last_output: f32,
    last_compute_ms: Option<Millis>,
    terms: Terms,
}

impl Pid {
    /// Creates a controller in manual mode with output limits `0..=100`.
    ///
    /// # Errors
    ///
    /// Returns [`PidConfigError::NegativeGain`] if any gain is negative or not finite.
    pub fn new(gains: Gains, direction: Direction) -> Result<Self, PidConfigError> {
        let mut pid = Self {
            display: Gains::new(0.0, 0.0, 0.0),
            kp: 0.0,
            ki: 0.0,
            kd: 0.0,
            direction,
            mode: Mode::Manual,
            sample_time_ms: DEFAULT_SAMPLE_TIME_MS,
            out_min: 0.0,
            out_max: 100.0,
            integral: 0.0,
            last_input: 0.0,
            last_output: 0.0,
            last_compute_ms: None,
            terms: Terms::default(),
        };
        pid.set_tunings(gains)?;
        Ok(pid)
    }

    /// Evaluates the law if in automatic mode and the sample period has elapsed.
    ///
    /// Returns the new output, always within the output limits. Non-finite
    /// inputs are skipped so the previous output stays in force.
    pub fn compute(&mut self, input: f32, setpoint: f32, now_ms: Millis) -> Option<f32> {
        if self.mode != Mode::Automatic {
            return None;
        }
        if let Some(last) = self.last_compute_ms
            && elapsed(now_ms, last) < self.sample_time_ms
        {
            return None;
        }
        if !input.is_finite() || !setpoint.is_finite() {
            return None;
        }

        let error = setpoint - input;
        let input_change = input - self.last_input;

        let proportional = self.kp * error;
        self.integral = self.clamp(self.integral + self.ki * error);
        let derivative = -self.kd * input_change;
        let output = self.clamp(proportional + self.integral + derivative);

        self.terms = Terms {
            proportional,
            integral: self.integral,
            derivative,
        };
        self.last_input = input;
        self.last_output = output;
        self.last_compute_ms = Some(now_ms);
        Some(output)
    }

    /// Switches mode. Entering automatic seeds the integral from
    /// `current_output` and the derivative history from `input`.
    pub fn set_mode(&mut self, mode: Mode, input: f32, current_output: f32) {
        if mode == Mode::Automatic && self.mode == Mode::Manual {
            self.initialize(input, current_output);
        }
        self.mode = mode;
    }

    fn initialize(&mut self, input: f32, current_output: f32) {
        let seed = if current_output.is_finite() {
            current_output
        } else {
            self.out_min
        };
        self.integral = self.clamp(seed);
        self.last_output = self.integral;
        if input.is_finite() {
            self.last_input = input;
        }
    }

    /// Replaces the gains.
    ///
    /// # Errors
    ///
    /// Returns [`PidConfigError::NegativeGain`] and keeps the previous gains if
    /// any gain is negative or not finite.
    pub fn set_tunings(&mut self, gains: Gains) -> Result<(), PidConfigError> {
        if !gains.is_valid() {
            return Err(PidConfigError::NegativeGain);
        }
        self.display = gains;
        self.derive_working_gains();
        Ok(())
    }

    /// Changes the logical sample period, rescaling the working coefficients.
    ///
    /// # Errors
    ///
    /// Returns [`PidConfigError::InvalidSampleTime`] for a zero period.
    pub fn set_sample_time(&mut self, sample_time_ms: Millis) -> Result<(), PidConfigError> {
        if sample_time_ms == 0 {
            return Err(PidConfigError::InvalidSampleTime);
        }
        #[allow(clippy::cast_precision_loss)]
        let ratio = sample_time_ms as f32 / self.sample_time_ms as f32;
        self.ki *= ratio;
        self.kd /= ratio;
        self.sample_time_ms = sample_time_ms;
        Ok(())
    }

    /// Changes the output bounds. In automatic mode the integral and the last
    /// output are pulled inside the new bounds immediately.
    ///
    /// # Errors
    ///
    /// Returns [`PidConfigError::InvalidOutputLimits`] unless `min < max`.
    pub fn set_output_limits(&mut self, min: f32, max: f32) -> Result<(), PidConfigError> {
        if !min.is_finite() || !max.is_finite() || min >= max {
            return Err(PidConfigError::InvalidOutputLimits);
        }
        self.out_min = min;
        self.out_max = max;
        if self.mode == Mode::Automatic {
            self.integral = self.clamp(self.integral);
            self.last_output = self.clamp(self.last_output);
        }
        Ok(())
    }

    /// Changes the control direction. The working coefficients always carry the
    /// sign of the current direction.
    pub fn set_direction(&mut self, direction: Direction) {
        if direction != self.direction {
            self.kp = -self.kp;
            self.ki = -self.ki;
            self.kd = -self.kd;
            self.direction = direction;
        }
    }

    fn derive_working_gains(&mut self) {
        #[allow(clippy::cast_precision_loss)]
        let sample_time_s = self.sample_time_ms as f32 / 1_000.0;
        let sign = match self.direction {
            Direction::Direct => 1.0,
            Direction::Reverse => -1.0,
        };
        self.kp = sign * self.display.kp;
        self.ki = sign * self.display.ki * sample_time_s;
        self.kd = sign * self.display.kd / sample_time_s;
    }

    fn clamp(&self, value: f32) -> f32 {
        value.clamp(self.out_min, self.out_max)
    }

    /// Gains as last passed to [`Pid::set_tunings`].
    #[must_use]
    pub const fn gains(&self) -> Gains {
        self.display
    }

    #[must_use]
    pub const fn mode(&self) -> Mode {
        self.mode
    }

    #[must_use]
    pub const fn direction(&self) -> Direction {
        self.direction
    }

    #[must_use]
    pub const fn sample_time_ms(&self) -> Millis {
        self.sample_time_ms
    }

    #[must_use]
    pub const fn output_limits(&self) -> (f32, f32) {
        (self.out_min, self.out_max)
    }

    #[must_use]
    pub const fn integral(&self) -> f32 {
        self.integral
    }

    #[must_use]
    pub const fn last_output(&self) -> f32 {
        self.last_output
    }

    #[must_use]
    pub const fn terms(&self) -> Terms {
        self.terms
    }
}
