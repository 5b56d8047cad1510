//! Over-temperature interlock for the heater power supplies.
//!
//! The host reads the heater thermocouples and sends a periodic okay signal.
//! If the signal goes stale, or the host reports a trip, the interlock trips and
//! the protected relays are switched off. When the interlock clears they are
//! switched back on. Both actions are edge-triggered so the relays can still
//! be commanded directly while the state is steady.

use crate::clock::{Millis, elapsed};

/// Default freshness timeout of the okay signal.
pub const DEFAULT_OKAY_TIMEOUT_MS: Millis = 3_000;

/// Transition reported by [`ThermalInterlock::evaluate`].
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum InterlockEdge {
    /// Newly tripped: force the protected outputs off.
    Tripped,
    /// Newly cleared: restore the protected outputs.
    Cleared,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ThermalInterlock {
    timeout_ms: Millis,
    enabled: bool,
    tripped: bool,
    previous_tripped: bool,
    last_okay_ms: Millis,
}

impl ThermalInterlock {
    /// Creates an enabled, untripped interlock whose okay signal is fresh at `now_ms`.
    #[must_use]
    pub const fn new(timeout_ms: Millis, now_ms: Millis) -> Self {
        Self {
            timeout_ms,
            enabled: true,
            tripped: false,
            previous_tripped: false,
            last_okay_ms: now_ms,
        }
    }

    /// Enables enforcement and an untripped, fresh state.
    pub fn reset(&mut self, now_ms: Millis) {
        *self = Self::new(self.timeout_ms, now_ms);
    }

    /// Host reports all heater temperatures within range.
    pub fn confirm_okay(&mut self, now_ms: Millis) {
        self.tripped = false;
        self.last_okay_ms = now_ms;
    }

    /// Host reports an out-of-range temperature or lost its readout.
    pub fn trip(&mut self) {
        self.tripped = true;
    }

    /// Resumes enforcement. A trip that is still latched is re-applied on the
    /// next evaluation.
    pub fn enable(&mut self) {
        self.enabled = true;
        self.previous_tripped = false;
    }

    /// Suspends enforcement so the protected relays can be driven manually.
    pub fn disable(&mut self) {
        self.enabled = false;
    }

    /// Applies the freshness timeout and reports an edge, if any.
    ///
    /// Does nothing while disabled.
    pub fn evaluate(&mut self, now_ms: Millis) -> Option<InterlockEdge> {
        if !self.enabled {
            return None;
        }

        if elapsed(now_ms, self.last_okay_ms) >= self.timeout_ms {
            self.tripped = true;
        }

        if self.tripped == self.previous_tripped {
            return None;
        }
        self.previous_tripped = self.tripped;
        Some(if self.tripped {
            InterlockEdge::Tripped
        } else {
            InterlockEdge::Cleared
        })
    }

    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        self.enabled
    }

    #[must_use]
    pub const fn is_tripped(&self) -> bool {
        self.tripped
    }

    #[must_use]
    pub const fn timeout_ms(&self) -> Millis {
        self.timeout_ms
    }
}
