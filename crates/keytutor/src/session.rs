//! One keyboard's practice session.
//!
//! The session is the only consumer of inbound MIDI. Each message is
//! normalized once and handed to the recorder and the learning engine in
//! the order it arrived. Learning cues go straight to the output device.

use std::sync::Arc;

use keyconf::TutorConfig;
use tracing::{debug, info};

use crate::clock::Clock;
use crate::export::{export_file_name, take_to_midi, ExportOptions};
use crate::ingest::{route, EventIngest, RawMessage};
use crate::learning::{Cue, LearningCursor, LearningEngine, LearningState};
use crate::midi_io::NoteOutput;
use crate::note::{NoteEvent, RecordedNote};
use crate::recorder::{CaptureMode, Recorder};
use crate::reference::{load_reference, ReferenceSong};
use crate::scoring::{score_with, ScoreReport, Tolerances};
use crate::{Error, Result};

/// What a finished capture produced.
#[derive(Debug, Clone, PartialEq)]
pub enum RecordingOutcome {
    /// Export capture: a MIDI file ready to be written out
    Exported {
        file_name: String,
        bytes: Vec<u8>,
        notes: Vec<RecordedNote>,
    },
    /// Test capture scored against the reference
    Scored(ScoreReport),
}

pub struct Session {
    ingest: EventIngest,
    recorder: Recorder,
    learner: LearningEngine,
    reference: Option<ReferenceSong>,
    output: Option<Arc<dyn NoteOutput>>,
    tolerances: Tolerances,
    cue_velocity: u8,
    export: ExportOptions,
}

impl Session {
    /// Session with default timing, tolerances and cue velocity.
    pub fn new(clock: Arc<dyn Clock>, output: Option<Arc<dyn NoteOutput>>) -> Self {
        Self::from_config(&TutorConfig::default(), clock, output)
    }

    pub fn from_config(
        config: &TutorConfig,
        clock: Arc<dyn Clock>,
        output: Option<Arc<dyn NoteOutput>>,
    ) -> Self {
        Self {
            ingest: EventIngest::new(clock),
            recorder: Recorder::new(config.timing.song_delay_ms()),
            learner: LearningEngine::new(),
            reference: None,
            output,
            tolerances: Tolerances::from(&config.scoring),
            cue_velocity: config.midi.cue_velocity,
            export: ExportOptions::default(),
        }
    }

    pub fn set_reference(&mut self, song: ReferenceSong) {
        info!(
            tracks = song.tracks.len(),
            notes = song.note_count(),
            bpm = song.header.bpm,
            "reference loaded"
        );
        self.reference = Some(song);
    }

    /// Parse and install a reference file.
    pub fn load_reference_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        let song = load_reference(bytes)?;
        self.set_reference(song);
        Ok(())
    }

    pub fn reference(&self) -> Option<&ReferenceSong> {
        self.reference.as_ref()
    }

    pub fn reference_mut(&mut self) -> Option<&mut ReferenceSong> {
        self.reference.as_mut()
    }

    pub fn is_recording(&self) -> bool {
        self.recorder.is_active()
    }

    pub fn learning_state(&self) -> LearningState {
        self.learner.state()
    }

    pub fn learning_cursor(&self) -> Option<LearningCursor> {
        self.learner.cursor()
    }

    pub fn ingest(&self) -> &EventIngest {
        &self.ingest
    }

    /// Feed one raw inbound message. Returns the normalized event, or `None`
    /// when the message was not a note.
    pub fn handle_raw(&mut self, msg: RawMessage) -> Option<NoteEvent> {
        let event = self.ingest.normalize(msg)?;
        let target = route(self.recorder.is_active(), self.learner.is_pending());
        if target.is_empty() {
            debug!(pitch = event.pitch, "no active consumer");
            return Some(event);
        }

        if target.recorder {
            self.recorder.ingest(event);
        }
        if target.learner && !event.is_note_on() {
            let cues = self.learner.on_note_off(event.pitch);
            self.send_cues(&cues);
        }
        Some(event)
    }

    /// Like `handle_raw`, from a device packet.
    pub fn handle_bytes(&mut self, data: &[u8]) -> Option<NoteEvent> {
        RawMessage::from_bytes(data).and_then(|msg| self.handle_raw(msg))
    }

    /// Open a capture window now.
    pub fn start_recording(&mut self, mode: CaptureMode) {
        let now = self.ingest.clock().now_ms();
        self.recorder.start(mode, now);
    }

    /// Close the capture window and deliver the take.
    ///
    /// A test capture needs a loaded reference; the take is discarded with
    /// `Error::NoReference` otherwise.
    pub fn stop_recording(&mut self) -> Result<RecordingOutcome> {
        let take = self.recorder.stop().ok_or(Error::NotRecording)?;

        match take.mode {
            CaptureMode::Export => {
                let bytes = take_to_midi(&take.notes, &self.export);
                let file_name = export_file_name(self.ingest.clock().now_ms());
                info!(file_name = %file_name, notes = take.notes.len(), bytes = bytes.len(), "take exported");
                Ok(RecordingOutcome::Exported {
                    file_name,
                    bytes,
                    notes: take.notes,
                })
            }
            CaptureMode::Test => {
                let reference = self.reference.as_ref().ok_or(Error::NoReference)?;
                let report = score_with(
                    reference.first_track_notes(),
                    &take.notes,
                    &self.tolerances,
                );
                info!(
                    total = report.summary.total_score,
                    max = report.summary.max_score(),
                    perfect = report.summary.perfect,
                    early = report.summary.early,
                    late = report.summary.late,
                    miss = report.summary.miss,
                    "take scored"
                );
                Ok(RecordingOutcome::Scored(report))
            }
        }
    }

    /// Start step learning on the reference's first track.
    pub fn start_learning(&mut self) -> Result<()> {
        let reference = self.reference.as_ref().ok_or(Error::NoReference)?;
        let cues = self.learner.start(reference.first_track_notes())?;
        self.send_cues(&cues);
        Ok(())
    }

    pub fn stop_learning(&mut self) {
        let cues = self.learner.stop();
        self.send_cues(&cues);
    }

    fn send_cues(&self, cues: &[Cue]) {
        let Some(output) = &self.output else {
            return;
        };
        for cue in cues {
            match *cue {
                Cue::Arm(pitch) => output.note_on(pitch, self.cue_velocity),
                Cue::Disarm(pitch) => output.note_off(pitch, 0),
            }
        }
    }
}
