//! Interval-gated, time-aware low-pass acquisition channels.
//!
//! A [`FilteredChannel`] samples its [`ValueSource`] only once its configured
//! interval has elapsed and folds the reading into an exponentially weighted
//! running value. The smoothing factor is derived from the actual time between
//! samples, so scheduling jitter changes the weight of a sample rather than the
//! effective cut-off frequency.

use crate::clock::{Micros, elapsed};

/// Raw reader backing one acquisition channel.
pub trait ValueSource {
    /// Returns the latest raw sample. Must complete quickly and never block.
    fn read(&mut self) -> u32;
}

impl<F> ValueSource for F
where
    F: FnMut() -> u32,
{
    fn read(&mut self) -> u32 {
        self()
    }
}

/// Sampling parameters of a channel.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct ChannelConfig {
    /// Minimum time between accepted samples.
    pub interval_us: Micros,
    /// Low-pass cut-off frequency.
    pub cutoff_hz: f32,
}

impl ChannelConfig {
    #[must_use]
    pub const fn new(interval_us: Micros, cutoff_hz: f32) -> Self {
        Self {
            interval_us,
            cutoff_hz,
        }
    }

    /// Convenience constructor for millisecond intervals.
    #[must_use]
    pub const fn from_millis(interval_ms: u32, cutoff_hz: f32) -> Self {
        Self::new(interval_ms.saturating_mul(1_000), cutoff_hz)
    }
}

/// Exponentially smoothed reading of a single raw source.
#[derive(Clone, Debug, PartialEq)]
pub struct FilteredChannel {
    config: ChannelConfig,
    value: f32,
    alpha: f32,
    last_sample_us: Micros,
    startup: bool,
}

impl FilteredChannel {
    #[must_use]
    pub const fn new(config: ChannelConfig) -> Self {
        Self {
            config,
            value: 0.0,
            alpha: 1.0,
            last_sample_us: 0,
            startup: true,
        }
    }

    /// Takes a sample if the channel interval has elapsed since the last one.
    ///
    /// Returns `true` when a sample was read and folded into the running value.
    pub fn poll<S>(&mut self, source: &mut S, now_us: Micros) -> bool
    where
        S: ValueSource + ?Sized,
    {
        let elapsed_us = elapsed(now_us, self.last_sample_us);
        if elapsed_us < self.config.interval_us {
            return false;
        }

        self.alpha = smoothing_factor(elapsed_us, self.config.cutoff_hz);
        #[allow(clippy::cast_precision_loss)]
        let raw = source.read() as f32;

        if self.startup {
            self.value = raw;
            self.startup = false;
        } else {
            self.value += self.alpha * (raw - self.value);
        }

        self.last_sample_us = now_us;
        true
    }

    /// Most recently computed filtered value.
    #[must_use]
    pub const fn value(&self) -> f32 {
        self.value
    }

    /// Smoothing factor used for the most recent sample.
    #[must_use]
    pub const fn alpha(&self) -> f32 {
        self.alpha
    }

    /// `true` until the first sample seeds the filter.
    #[must_use]
    pub const fn is_starting(&self) -> bool {
        self.startup
    }

    #[must_use]
    pub const fn config(&self) -> &ChannelConfig {
        &self.config
    }
}

/// `1 - exp(-dt * fc)` for an elapsed time in microseconds.
#[must_use]
pub fn smoothing_factor(elapsed_us: Micros, cutoff_hz: f32) -> f32 {
    #[allow(clippy::cast_precision_loss)]
    let elapsed_s = elapsed_us as f32 * 1e-6;
    1.0 - libm::expf(-elapsed_s * cutoff_hz)
}
