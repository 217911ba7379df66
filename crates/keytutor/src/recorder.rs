//! Performance capture.
//!
//! While a capture window is open the recorder keeps every note-on and
//! note-off in arrival order. Pairing happens once, when the window closes:
//! each note-on takes the first unclaimed note-off of the same pitch. A
//! note-on without a note-off is dropped.

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::note::{NoteEvent, RecordedNote};

/// Why the capture was started, which decides where the take goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaptureMode {
    /// Score against the loaded reference
    Test,
    /// Serialize to a MIDI file
    Export,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaptureState {
    Inactive,
    Active,
}

/// A finished capture, handed off by value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Take {
    pub mode: CaptureMode,
    pub started_at_ms: i64,
    pub notes: Vec<RecordedNote>,
}

pub struct Recorder {
    song_delay_ms: f64,
    state: CaptureState,
    mode: CaptureMode,
    started_at_ms: i64,
    on_stack: Vec<NoteEvent>,
    off_stack: Vec<NoteEvent>,
}

impl Recorder {
    /// `song_delay_ms` is the playback lead-in; it is subtracted from every
    /// onset so the take lines up with the reference's time zero.
    pub fn new(song_delay_ms: f64) -> Self {
        Self {
            song_delay_ms,
            state: CaptureState::Inactive,
            mode: CaptureMode::Test,
            started_at_ms: 0,
            on_stack: Vec::new(),
            off_stack: Vec::new(),
        }
    }

    pub fn state(&self) -> CaptureState {
        self.state
    }

    pub fn is_active(&self) -> bool {
        self.state == CaptureState::Active
    }

    pub fn mode(&self) -> CaptureMode {
        self.mode
    }

    pub fn song_delay_ms(&self) -> f64 {
        self.song_delay_ms
    }

    /// Open a capture window. Anything left from an earlier window is cleared.
    pub fn start(&mut self, mode: CaptureMode, now_ms: i64) {
        self.on_stack.clear();
        self.off_stack.clear();
        self.mode = mode;
        self.started_at_ms = now_ms;
        self.state = CaptureState::Active;
        info!(?mode, started_at_ms = now_ms, "capture started");
    }

    /// Append an event to the matching stack. Returns false when no capture
    /// is open.
    pub fn ingest(&mut self, event: NoteEvent) -> bool {
        if !self.is_active() {
            return false;
        }

        if event.is_note_on() {
            self.on_stack.push(event);
        } else {
            self.off_stack.push(event);
        }
        true
    }

    /// Number of (note-on, note-off) events captured so far.
    pub fn pending(&self) -> (usize, usize) {
        (self.on_stack.len(), self.off_stack.len())
    }

    /// Close the window and pair the captured events. `None` when no capture
    /// was open.
    pub fn stop(&mut self) -> Option<Take> {
        if !self.is_active() {
            return None;
        }
        self.state = CaptureState::Inactive;

        let on_stack = std::mem::take(&mut self.on_stack);
        let off_stack = std::mem::take(&mut self.off_stack);
        let notes = pair_notes(&on_stack, &off_stack, self.started_at_ms, self.song_delay_ms);

        info!(
            mode = ?self.mode,
            note_ons = on_stack.len(),
            note_offs = off_stack.len(),
            notes = notes.len(),
            "capture stopped"
        );

        Some(Take {
            mode: self.mode,
            started_at_ms: self.started_at_ms,
            notes,
        })
    }
}

/// Pair note-ons with note-offs.
///
/// Note-ons are visited in arrival order; each claims the first unclaimed
/// note-off with the same pitch, wherever it sits in the off stack. Pure in
/// its inputs, so the same stacks always give the same notes.
pub fn pair_notes(
    on_stack: &[NoteEvent],
    off_stack: &[NoteEvent],
    capture_start_ms: i64,
    song_delay_ms: f64,
) -> Vec<RecordedNote> {
    let mut claimed = vec![false; off_stack.len()];
    let mut notes = Vec::with_capacity(on_stack.len());

    for on in on_stack {
        let found = off_stack
            .iter()
            .enumerate()
            .position(|(i, off)| !claimed[i] && off.pitch == on.pitch);

        let Some(idx) = found else {
            debug!(pitch = on.pitch, at = on.timestamp_ms, "note-on never released, dropped");
            continue;
        };
        claimed[idx] = true;
        let off = &off_stack[idx];

        notes.push(RecordedNote {
            pitch: on.pitch,
            start_offset_seconds: ((on.timestamp_ms - capture_start_ms) as f64 - song_delay_ms)
                / 1000.0,
            duration_seconds: (off.timestamp_ms - on.timestamp_ms) as f64 / 1000.0,
            velocity_normalized: on.velocity as f64 / 127.0,
        });
    }

    notes
}
