use serde::{Deserialize, Serialize};

const NOTE_NAMES: [&str; 12] = [
    "C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B",
];

/// Scientific pitch name with sharps, middle C (60) = "C4".
pub fn pitch_name(pitch: u8) -> String {
    let name = NOTE_NAMES[(pitch % 12) as usize];
    let octave = pitch as i32 / 12 - 1;
    format!("{}{}", name, octave)
}

/// A single normalized key event from a live device.
///
/// Note-offs always carry velocity 0, whichever wire form they arrived in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NoteEvent {
    pub pitch: u8,
    pub velocity: u8,
    /// Wall clock, milliseconds since the Unix epoch
    pub timestamp_ms: i64,
}

impl NoteEvent {
    pub fn is_note_on(&self) -> bool {
        self.velocity > 0
    }
}

/// A note reconstructed from a recorded on/off pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordedNote {
    pub pitch: u8,
    /// Seconds from the reference's time zero; negative when the key went
    /// down during the lead-in.
    pub start_offset_seconds: f64,
    pub duration_seconds: f64,
    /// 0.0–1.0
    pub velocity_normalized: f64,
}

/// Reading an exported take back from a file.
impl From<&ReferenceNote> for RecordedNote {
    fn from(note: &ReferenceNote) -> Self {
        Self {
            pitch: note.pitch,
            start_offset_seconds: note.time_seconds,
            duration_seconds: note.duration_seconds,
            velocity_normalized: note.velocity,
        }
    }
}

/// A note of the loaded reference file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferenceNote {
    pub pitch: u8,
    pub name: String,
    pub time_seconds: f64,
    pub duration_seconds: f64,
    /// 0.0–1.0
    pub velocity: f64,
    pub ticks: u64,
    pub duration_ticks: u64,
}

impl ReferenceNote {
    /// Build a note directly in seconds. Tick fields stay zero.
    pub fn new(pitch: u8, time_seconds: f64, duration_seconds: f64) -> Self {
        Self {
            pitch,
            name: pitch_name(pitch),
            time_seconds,
            duration_seconds,
            velocity: 0.8,
            ticks: 0,
            duration_ticks: 0,
        }
    }

    pub fn end_seconds(&self) -> f64 {
        self.time_seconds + self.duration_seconds
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pitch_names() {
        assert_eq!(pitch_name(60), "C4");
        assert_eq!(pitch_name(61), "C#4");
        assert_eq!(pitch_name(69), "A4");
        assert_eq!(pitch_name(21), "A0");
        assert_eq!(pitch_name(0), "C-1");
        assert_eq!(pitch_name(127), "G9");
    }

    #[test]
    fn note_off_has_zero_velocity() {
        let on = NoteEvent { pitch: 60, velocity: 90, timestamp_ms: 0 };
        let off = NoteEvent { pitch: 60, velocity: 0, timestamp_ms: 5 };
        assert!(on.is_note_on());
        assert!(!off.is_note_on());
    }
}
