//! Monotonic time source shared by every timed subsystem.
//!
//! Timestamps are plain `u32` counters in milliseconds or microseconds. Both
//! wrap at `u32::MAX` (about 49.7 days for milliseconds and 71.6 minutes for
//! microseconds), so every elapsed-time computation in this crate goes through
//! [`elapsed`], which performs wrapping subtraction and stays correct across a
//! single wrap of the counter.

/// Millisecond timestamp, wraps at `u32::MAX`.
pub type Millis = u32;

/// Microsecond timestamp, wraps at `u32::MAX`.
pub type Micros = u32;

/// Monotonic clock with millisecond and microsecond resolution.
///
/// Implementations must be non-decreasing apart from the defined wraparound
/// and must not block.
pub trait MonotonicClock {
    /// Milliseconds since an arbitrary epoch.
    fn now_ms(&self) -> Millis;

    /// Microseconds since an arbitrary epoch.
    fn now_us(&self) -> Micros;
}

impl<C: MonotonicClock + ?Sized> MonotonicClock for &C {
    fn now_ms(&self) -> Millis {
        (**self).now_ms()
    }

    fn now_us(&self) -> Micros {
        (**self).now_us()
    }
}

/// Elapsed ticks between `since` and `now`, tolerant of a single counter wrap.
#[must_use]
pub const fn elapsed(now: u32, since: u32) -> u32 {
    now.wrapping_sub(since)
}

/// Fixed-period cadence gate driven by a millisecond clock.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Cadence {
    period_ms: Millis,
    last_ms: Millis,
}

impl Cadence {
    /// Creates a cadence whose first period starts at `start_ms`.
    #[must_use]
    pub const fn new(period_ms: Millis, start_ms: Millis) -> Self {
        Self {
            period_ms,
            last_ms: start_ms,
        }
    }

    /// Returns `true` and restarts the period once at least `period_ms` has elapsed.
    pub fn is_due(&mut self, now_ms: Millis) -> bool {
        if elapsed(now_ms, self.last_ms) >= self.period_ms {
            self.last_ms = now_ms;
            true
        } else {
            false
        }
    }

    /// Restarts the current period at `now_ms`.
    pub fn restart(&mut self, now_ms: Millis) {
        self.last_ms = now_ms;
    }

    #[must_use]
    pub const fn period_ms(&self) -> Millis {
        self.period_ms
    }
}
