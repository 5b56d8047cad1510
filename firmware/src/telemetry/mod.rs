//! Control event recorder.
//!
//! Keeps the most recent [`ControlEvent`]s in a fixed-capacity ring, tracks the
//! time elapsed between successive events, and mirrors each one to defmt (or
//! stdout on the host) for inspection during bring-up.

use controller_core::clock::{Millis, elapsed};
use controller_core::telemetry::{ControlEvent, EventId, EventLog, EventRecord, EventSink};

/// Total number of events retained in memory.
pub const TELEMETRY_RING_CAPACITY: usize = 128;

pub struct TelemetryRecorder {
    log: EventLog<TELEMETRY_RING_CAPACITY>,
    last_event_ms: Option<Millis>,
}

impl TelemetryRecorder {
    pub const fn new() -> Self {
        Self {
            log: EventLog::new(),
            last_event_ms: None,
        }
    }

    /// Recorded events in chronological order.
    pub fn oldest_first(&self) -> impl Iterator<Item = &EventRecord> {
        self.log.oldest_first()
    }

    pub fn latest(&self) -> Option<&EventRecord> {
        self.log.latest()
    }

    pub fn len(&self) -> usize {
        self.log.len()
    }

    /// Records an event and logs it with the time since the previous one.
    pub fn push(&mut self, event: ControlEvent, timestamp_ms: Millis) -> EventId {
        let since_previous = self
            .last_event_ms
            .map(|previous| elapsed(timestamp_ms, previous));
        self.last_event_ms = Some(timestamp_ms);

        let id = self.log.push(event, timestamp_ms);
        emit_log(id, event, timestamp_ms, since_previous);
        id
    }
}

impl Default for TelemetryRecorder {
    fn default() -> Self {
        Self::new()
    }
}

impl EventSink for TelemetryRecorder {
    fn record(&mut self, event: ControlEvent, timestamp_ms: Millis) {
        self.push(event, timestamp_ms);
    }
}

#[cfg(target_os = "none")]
fn emit_log(id: EventId, event: ControlEvent, timestamp_ms: Millis, delta_ms: Option<u32>) {
    let warning = event.is_warning();
    let event = defmt::Display2Format(&event);
    match (delta_ms, warning) {
        (Some(delta), true) => {
            defmt::warn!("telemetry:control #{} {} t={}ms Δ={}ms", id, event, timestamp_ms, delta);
        }
        (Some(delta), false) => {
            defmt::info!("telemetry:control #{} {} t={}ms Δ={}ms", id, event, timestamp_ms, delta);
        }
        (None, true) => defmt::warn!("telemetry:control #{} {} t={}ms", id, event, timestamp_ms),
        (None, false) => defmt::info!("telemetry:control #{} {} t={}ms", id, event, timestamp_ms),
    }
}

#[cfg(not(target_os = "none"))]
fn emit_log(id: EventId, event: ControlEvent, timestamp_ms: Millis, delta_ms: Option<u32>) {
    let level = if event.is_warning() { "warn" } else { "info" };
    if let Some(delta) = delta_ms {
        println!("{level} telemetry:control #{id} {event} t={timestamp_ms}ms Δ={delta}ms");
    } else {
        println!("{level} telemetry:control #{id} {event} t={timestamp_ms}ms");
    }
}
