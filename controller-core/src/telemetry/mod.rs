//! Control event catalog shared by firmware and host targets.
//!
//! The control loop reports noteworthy transitions as [`ControlEvent`] values
//! through an [`EventSink`]. Each event encodes to a compact numeric code so it
//! can travel over diagnostics channels, and [`EventLog`] keeps the most recent
//! ones in a fixed-size ring without allocating.

use core::fmt;

use heapless::HistoryBuf;

use crate::clock::Millis;
use crate::commands::CommandSource;
use crate::gains::GainSet;

/// Identifier assigned to each recorded event; wraps at `u32::MAX`.
pub type EventId = u32;

/// Events emitted by the control loop.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ControlEvent {
    /// Outputs initialized and the watchdog armed.
    Started,
    /// New PID tuning pushed from the gain scheduler.
    GainSetApplied(GainSet),
    AutomaticEngaged,
    AutomaticReleased,
    /// Okay signal went stale or the host tripped the interlock.
    InterlockTripped,
    InterlockCleared,
    InterlockEnabled,
    InterlockDisabled,
    SoftReset(CommandSource),
    /// Watchdog refresh stopped on operator request.
    RebootRequested,
    /// Application-defined event, encoded above [`ControlEvent::CUSTOM_BASE`].
    Custom(u8),
}

impl fmt::Display for ControlEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControlEvent::Started => f.write_str("started"),
            ControlEvent::GainSetApplied(set) => write!(f, "pid set {}", set.number()),
            ControlEvent::AutomaticEngaged => f.write_str("automatic engaged"),
            ControlEvent::AutomaticReleased => f.write_str("automatic released"),
            ControlEvent::InterlockTripped => f.write_str("otp tripped"),
            ControlEvent::InterlockCleared => f.write_str("otp okay"),
            ControlEvent::InterlockEnabled => f.write_str("otp enabled"),
            ControlEvent::InterlockDisabled => f.write_str("otp disabled"),
            ControlEvent::SoftReset(source) => write!(f, "soft reset ({source:?})"),
            ControlEvent::RebootRequested => f.write_str("reboot requested"),
            ControlEvent::Custom(code) => write!(f, "custom({code})"),
        }
    }
}

impl ControlEvent {
    const STARTED_CODE: u16 = 0x0001;
    const GAIN_SET_BASE: u16 = 0x0010;
    const AUTOMATIC_ENGAGED_CODE: u16 = 0x0020;
    const AUTOMATIC_RELEASED_CODE: u16 = 0x0021;
    const INTERLOCK_TRIPPED_CODE: u16 = 0x0030;
    const INTERLOCK_CLEARED_CODE: u16 = 0x0031;
    const INTERLOCK_ENABLED_CODE: u16 = 0x0032;
    const INTERLOCK_DISABLED_CODE: u16 = 0x0033;
    const SOFT_RESET_BASE: u16 = 0x0040;
    const REBOOT_REQUESTED_CODE: u16 = 0x0050;

    /// First code of the range reserved for [`ControlEvent::Custom`]; built-in
    /// events stay below it.
    pub const CUSTOM_BASE: u16 = 0x0100;

    /// Encodes the event into a compact transport-friendly discriminant.
    #[must_use]
    pub fn to_raw(self) -> u16 {
        match self {
            ControlEvent::Started => Self::STARTED_CODE,
            ControlEvent::GainSetApplied(set) => Self::GAIN_SET_BASE + u16::from(set.number()),
            ControlEvent::AutomaticEngaged => Self::AUTOMATIC_ENGAGED_CODE,
            ControlEvent::AutomaticReleased => Self::AUTOMATIC_RELEASED_CODE,
            ControlEvent::InterlockTripped => Self::INTERLOCK_TRIPPED_CODE,
            ControlEvent::InterlockCleared => Self::INTERLOCK_CLEARED_CODE,
            ControlEvent::InterlockEnabled => Self::INTERLOCK_ENABLED_CODE,
            ControlEvent::InterlockDisabled => Self::INTERLOCK_DISABLED_CODE,
            ControlEvent::SoftReset(source) => Self::SOFT_RESET_BASE + source_index(source),
            ControlEvent::RebootRequested => Self::REBOOT_REQUESTED_CODE,
            ControlEvent::Custom(code) => Self::CUSTOM_BASE + u16::from(code),
        }
    }

    /// Decodes a raw discriminant; `None` for codes no event maps to.
    #[must_use]
    pub fn from_raw(code: u16) -> Option<Self> {
        let event = match code {
            Self::STARTED_CODE => ControlEvent::Started,
            0x0011 => ControlEvent::GainSetApplied(GainSet::Fast),
            0x0012 => ControlEvent::GainSetApplied(GainSet::Stable),
            Self::AUTOMATIC_ENGAGED_CODE => ControlEvent::AutomaticEngaged,
            Self::AUTOMATIC_RELEASED_CODE => ControlEvent::AutomaticReleased,
            Self::INTERLOCK_TRIPPED_CODE => ControlEvent::InterlockTripped,
            Self::INTERLOCK_CLEARED_CODE => ControlEvent::InterlockCleared,
            Self::INTERLOCK_ENABLED_CODE => ControlEvent::InterlockEnabled,
            Self::INTERLOCK_DISABLED_CODE => ControlEvent::InterlockDisabled,
            0x0040 => ControlEvent::SoftReset(CommandSource::Host),
            0x0041 => ControlEvent::SoftReset(CommandSource::Debug),
            Self::REBOOT_REQUESTED_CODE => ControlEvent::RebootRequested,
            other => {
                let custom = other.checked_sub(Self::CUSTOM_BASE)?;
                ControlEvent::Custom(u8::try_from(custom).ok()?)
            }
        };
        Some(event)
    }

    /// Events that indicate the rig left its normal operating state.
    #[must_use]
    pub const fn is_warning(self) -> bool {
        matches!(
            self,
            ControlEvent::InterlockTripped
                | ControlEvent::InterlockDisabled
                | ControlEvent::RebootRequested
        )
    }
}

fn source_index(source: CommandSource) -> u16 {
    match source {
        CommandSource::Host => 0,
        CommandSource::Debug => 1,
    }
}

/// Receiver of control events.
pub trait EventSink {
    fn record(&mut self, event: ControlEvent, timestamp_ms: Millis);
}

/// Sink that drops every event.
#[derive(Copy, Clone, Debug, Default)]
pub struct NoopEventSink;

impl EventSink for NoopEventSink {
    fn record(&mut self, _event: ControlEvent, _timestamp_ms: Millis) {}
}

/// Event stored in an [`EventLog`].
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct EventRecord {
    pub id: EventId,
    pub timestamp_ms: Millis,
    pub event: ControlEvent,
}

/// Number of events retained by default.
pub const EVENT_LOG_CAPACITY: usize = 64;

/// Fixed-capacity ring of the most recent events.
pub struct EventLog<const CAPACITY: usize = EVENT_LOG_CAPACITY> {
    ring: HistoryBuf<EventRecord, CAPACITY>,
    next_event_id: EventId,
}

impl<const CAPACITY: usize> EventLog<CAPACITY> {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            ring: HistoryBuf::new(),
            next_event_id: 0,
        }
    }

    /// Stores an event and returns its identifier.
    pub fn push(&mut self, event: ControlEvent, timestamp_ms: Millis) -> EventId {
        let id = self.next_event_id;
        self.next_event_id = self.next_event_id.wrapping_add(1);
        self.ring.write(EventRecord {
            id,
            timestamp_ms,
            event,
        });
        id
    }

    /// Recorded events in chronological order.
    pub fn oldest_first(&self) -> impl Iterator<Item = &EventRecord> {
        self.ring.oldest_ordered()
    }

    #[must_use]
    pub fn latest(&self) -> Option<&EventRecord> {
        self.ring.recent()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.ring.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }
}

impl<const CAPACITY: usize> Default for EventLog<CAPACITY> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const CAPACITY: usize> EventSink for EventLog<CAPACITY> {
    fn record(&mut self, event: ControlEvent, timestamp_ms: Millis) {
        self.push(event, timestamp_ms);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_codes_round_trip() {
        let fixtures = [
            ControlEvent::Started,
            ControlEvent::GainSetApplied(GainSet::Fast),
            ControlEvent::GainSetApplied(GainSet::Stable),
            ControlEvent::AutomaticEngaged,
            ControlEvent::AutomaticReleased,
            ControlEvent::InterlockTripped,
            ControlEvent::InterlockCleared,
            ControlEvent::InterlockEnabled,
            ControlEvent::InterlockDisabled,
            ControlEvent::SoftReset(CommandSource::Host),
            ControlEvent::SoftReset(CommandSource::Debug),
            ControlEvent::RebootRequested,
        ];

        for event in fixtures {
            assert_eq!(ControlEvent::from_raw(event.to_raw()), Some(event));
        }
        assert_eq!(ControlEvent::from_raw(0xBEEF), None);
        assert_eq!(ControlEvent::from_raw(0x0002), None);
    }

    #[test]
    fn custom_codes_never_alias_built_in_events() {
        for code in [0x00, 0x01, 0x11, 0x30, 0x50, 0xFF] {
            let event = ControlEvent::Custom(code);
            assert!(event.to_raw() >= ControlEvent::CUSTOM_BASE);
            assert_eq!(ControlEvent::from_raw(event.to_raw()), Some(event));
        }
        assert_eq!(
            ControlEvent::from_raw(ControlEvent::Custom(0x01).to_raw()),
            Some(ControlEvent::Custom(0x01))
        );
        assert_ne!(ControlEvent::Custom(0x01).to_raw(), ControlEvent::Started.to_raw());
    }

    #[test]
    fn gain_set_codes_follow_the_set_number() {
        assert_eq!(ControlEvent::GainSetApplied(GainSet::Fast).to_raw(), 0x0011);
        assert_eq!(ControlEvent::GainSetApplied(GainSet::Stable).to_raw(), 0x0012);
    }

    #[test]
    fn log_keeps_most_recent_events_in_order() {
        let mut log = EventLog::<4>::new();
        for tick in 0..6 {
            log.push(ControlEvent::Custom(tick), u32::from(tick) * 10);
        }

        assert_eq!(log.len(), 4);
        let latest = log.latest().copied().expect("latest event");
        assert_eq!(latest.id, 5);
        assert_eq!(latest.timestamp_ms, 50);

        let codes: heapless::Vec<u16, 4> = log
            .oldest_first()
            .map(|record| record.event.to_raw())
            .collect();
        assert_eq!(codes.as_slice(), &[0x0102, 0x0103, 0x0104, 0x0105]);
    }

    #[test]
    fn display_matches_operator_messages() {
        let mut text: heapless::String<32> = heapless::String::new();
        core::fmt::Write::write_fmt(
            &mut text,
            format_args!("{}", ControlEvent::GainSetApplied(GainSet::Stable)),
        )
        .expect("fits");
        assert_eq!(text.as_str(), "pid set 2");
    }
}
