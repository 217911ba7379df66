//! Keytutor: piano practice against a reference MIDI file
//!
//! Live key events come in through `ingest`, are captured by the `recorder`
//! and scored against the reference by `scoring`. The `learning` engine walks
//! the reference one chord at a time, cueing keys on the output device, and
//! the `playback` scheduler plays the reference back in wall-clock time.
//! `session` ties the modes together for one connected keyboard.

pub mod clock;
pub mod export;
pub mod ingest;
pub mod learning;
pub mod midi_io;
pub mod note;
pub mod playback;
pub mod recorder;
pub mod reference;
pub mod scoring;
pub mod session;
pub mod synth;

pub use clock::{Clock, ManualClock, SystemClock};
pub use export::{export_file_name, take_to_midi, ExportOptions};
pub use ingest::{classify, EventIngest, NoteKind, RawMessage};
pub use learning::{group_chords, ChordGroup, Cue, LearningCursor, LearningEngine, LearningState};
pub use midi_io::{
    list_input_ports, list_output_ports, ActiveMidiInput, ActiveMidiOutput, MemoryOutput,
    MidiError, MidiPortInfo, NoteOutput, OutboundNote,
};
pub use note::{pitch_name, NoteEvent, RecordedNote, ReferenceNote};
pub use playback::{parse_tempo, PlaybackScheduler, PlaybackState, ScheduledNote};
pub use recorder::{pair_notes, CaptureMode, CaptureState, Recorder, Take};
pub use reference::{load_reference, ReferenceSong, ReferenceTrack, SongHeader, TempoMap};
pub use scoring::{
    score, score_with, DurationResult, ScoreReport, ScoreSummary, ScoredNote, TimingResult,
    Tolerances, MAX_NOTE_SCORE,
};
pub use session::{RecordingOutcome, Session};
pub use synth::{LoggingSynth, Synthesizer};

/// Errors from tutor operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("MIDI parse error: {0}")]
    MidiParse(String),

    #[error("no reference loaded")]
    NoReference,

    #[error("reference has no notes")]
    EmptyReference,

    #[error("no recording in progress")]
    NotRecording,
}

pub type Result<T> = std::result::Result<T, Error>;
