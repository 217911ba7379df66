//! Event ingest: raw device messages to timestamped note events.
//!
//! Only note messages survive. Everything else (controllers, clock, sysex,
//! running-status fragments) is dropped without error.

use std::sync::Arc;

use tracing::debug;

use crate::clock::Clock;
use crate::note::NoteEvent;

/// A raw channel message as delivered by the device: `(status, data1, data2)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawMessage {
    pub status: u8,
    pub data1: u8,
    pub data2: u8,
}

impl RawMessage {
    pub fn new(status: u8, data1: u8, data2: u8) -> Self {
        Self {
            status,
            data1,
            data2,
        }
    }

    /// Take the first three bytes of a packet. Shorter packets can't be note
    /// messages.
    pub fn from_bytes(data: &[u8]) -> Option<Self> {
        match data {
            [status, data1, data2, ..] => Some(Self::new(*status, *data1, *data2)),
            _ => None,
        }
    }
}

/// What a raw message means for the tutor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoteKind {
    On { pitch: u8, velocity: u8 },
    Off { pitch: u8 },
}

/// Classify a raw message, on any channel.
///
/// Note-on with velocity 0 is a note-off. Data bytes must be 7-bit.
pub fn classify(msg: RawMessage) -> Option<NoteKind> {
    if msg.data1 > 0x7F || msg.data2 > 0x7F {
        return None;
    }

    match msg.status & 0xF0 {
        0x90 if msg.data2 > 0 => Some(NoteKind::On {
            pitch: msg.data1,
            velocity: msg.data2,
        }),
        0x90 | 0x80 => Some(NoteKind::Off { pitch: msg.data1 }),
        _ => None,
    }
}

/// Which consumers an event goes to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Route {
    pub recorder: bool,
    pub learner: bool,
}

impl Route {
    pub fn is_empty(&self) -> bool {
        !self.recorder && !self.learner
    }
}

/// Decide the consumers for an event given the active modes.
pub fn route(recording: bool, learning_pending: bool) -> Route {
    Route {
        recorder: recording,
        learner: learning_pending,
    }
}

/// Stamps classified messages with the injected clock.
pub struct EventIngest {
    clock: Arc<dyn Clock>,
    received: u64,
    dropped: u64,
}

impl EventIngest {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            received: 0,
            dropped: 0,
        }
    }

    /// Normalize a raw message into a `NoteEvent` stamped `now`.
    pub fn normalize(&mut self, msg: RawMessage) -> Option<NoteEvent> {
        self.received += 1;

        let Some(kind) = classify(msg) else {
            self.dropped += 1;
            debug!(status = msg.status, "dropping non-note message");
            return None;
        };

        let timestamp_ms = self.clock.now_ms();
        let event = match kind {
            NoteKind::On { pitch, velocity } => NoteEvent {
                pitch,
                velocity,
                timestamp_ms,
            },
            NoteKind::Off { pitch } => NoteEvent {
                pitch,
                velocity: 0,
                timestamp_ms,
            },
        };

        debug!(
            pitch = event.pitch,
            velocity = event.velocity,
            timestamp_ms,
            "note event"
        );
        Some(event)
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn received(&self) -> u64 {
        self.received
    }

    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    #[test]
    fn test_note_on() {
        let kind = classify(RawMessage::new(0x90, 60, 100));
        assert_eq!(kind, Some(NoteKind::On { pitch: 60, velocity: 100 }));
    }

    #[test]
    fn test_note_on_velocity_zero_is_note_off() {
        let kind = classify(RawMessage::new(0x90, 60, 0));
        assert_eq!(kind, Some(NoteKind::Off { pitch: 60 }));
    }

    #[test]
    fn test_explicit_note_off_ignores_release_velocity() {
        let kind = classify(RawMessage::new(0x80, 60, 64));
        assert_eq!(kind, Some(NoteKind::Off { pitch: 60 }));
    }

    #[test]
    fn test_any_channel_is_accepted() {
        assert_eq!(
            classify(RawMessage::new(0x93, 48, 20)),
            Some(NoteKind::On { pitch: 48, velocity: 20 })
        );
        assert_eq!(
            classify(RawMessage::new(0x8F, 48, 0)),
            Some(NoteKind::Off { pitch: 48 })
        );
    }

    #[test]
    fn test_non_note_messages_are_dropped() {
        assert_eq!(classify(RawMessage::new(0xB0, 64, 127)), None); // sustain
        assert_eq!(classify(RawMessage::new(0xE0, 0, 64)), None); // pitch bend
        assert_eq!(classify(RawMessage::new(0xF8, 0, 0)), None); // clock
        assert_eq!(classify(RawMessage::new(0x3C, 60, 100)), None); // data byte as status
    }

    #[test]
    fn test_out_of_range_data_is_dropped() {
        assert_eq!(classify(RawMessage::new(0x90, 200, 100)), None);
        assert_eq!(classify(RawMessage::new(0x90, 60, 128)), None);
    }

    #[test]
    fn test_from_bytes() {
        assert_eq!(
            RawMessage::from_bytes(&[0x90, 60, 100]),
            Some(RawMessage::new(0x90, 60, 100))
        );
        assert_eq!(RawMessage::from_bytes(&[0xC0, 5]), None);
        assert_eq!(RawMessage::from_bytes(&[]), None);
    }

    #[test]
    fn test_route() {
        assert!(route(false, false).is_empty());
        assert_eq!(route(true, false), Route { recorder: true, learner: false });
        assert_eq!(route(true, true), Route { recorder: true, learner: true });
    }

    #[test]
    fn test_normalize_stamps_with_clock() {
        let clock = Arc::new(ManualClock::new(42_000));
        let mut ingest = EventIngest::new(clock.clone());

        let on = ingest.normalize(RawMessage::new(0x90, 64, 90)).unwrap();
        assert_eq!(on, NoteEvent { pitch: 64, velocity: 90, timestamp_ms: 42_000 });

        clock.advance(300);
        let off = ingest.normalize(RawMessage::new(0x80, 64, 40)).unwrap();
        assert_eq!(off, NoteEvent { pitch: 64, velocity: 0, timestamp_ms: 42_300 });

        assert!(ingest.normalize(RawMessage::new(0xB0, 1, 1)).is_none());
        assert_eq!(ingest.received(), 3);
        assert_eq!(ingest.dropped(), 1);
    }
}
