//! Reference MIDI loading.
//!
//! Parses a Standard MIDI File into per-track note lists timed in seconds.
//! Scoring and learning read the first non-empty track; playback reads every
//! track merged by tick.

use std::collections::HashMap;

use midly::{MetaMessage, MidiMessage, Smf, TrackEventKind};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::note::{pitch_name, ReferenceNote};
use crate::{Error, Result};

const DEFAULT_BPM: f64 = 120.0;

/// Tempo change at a specific tick
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TempoChange {
    pub tick: u64,
    pub bpm: f64,
}

/// Tick-to-seconds conversion through every tempo change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TempoMap {
    pub ppq: u16,
    /// Sorted by tick, always starting at tick 0
    pub changes: Vec<TempoChange>,
}

impl TempoMap {
    pub fn new(ppq: u16, mut changes: Vec<TempoChange>) -> Self {
        changes.sort_by_key(|c| c.tick);
        // A later change at the same tick wins
        let mut deduped: Vec<TempoChange> = Vec::with_capacity(changes.len());
        for change in changes {
            match deduped.last_mut() {
                Some(last) if last.tick == change.tick => *last = change,
                _ => deduped.push(change),
            }
        }
        if deduped.first().map_or(true, |c| c.tick > 0) {
            deduped.insert(0, TempoChange { tick: 0, bpm: DEFAULT_BPM });
        }
        Self {
            ppq: ppq.max(1),
            changes: deduped,
        }
    }

    /// Constant-tempo map
    pub fn constant(ppq: u16, bpm: f64) -> Self {
        Self::new(ppq, vec![TempoChange { tick: 0, bpm }])
    }

    /// Tempo in effect at `tick`
    pub fn tempo_at(&self, tick: u64) -> f64 {
        self.changes
            .iter()
            .rev()
            .find(|tc| tc.tick <= tick)
            .map(|tc| tc.bpm)
            .unwrap_or(DEFAULT_BPM)
    }

    pub fn ticks_to_seconds(&self, tick: u64) -> f64 {
        let ppq = self.ppq as f64;
        let mut seconds = 0.0;

        for (i, change) in self.changes.iter().enumerate() {
            if change.tick >= tick {
                break;
            }
            let segment_end = self
                .changes
                .get(i + 1)
                .map_or(tick, |next| next.tick.min(tick));
            let ticks = (segment_end - change.tick) as f64;
            seconds += ticks / ppq * 60.0 / change.bpm;
        }

        seconds
    }
}

/// File-level timing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SongHeader {
    pub ppq: u16,
    pub tempo_map: TempoMap,
    /// Initial tempo as written in the file
    pub default_bpm: f64,
    /// Initial tempo after the playback multiplier
    pub bpm: f64,
}

impl SongHeader {
    pub(crate) fn new(tempo_map: TempoMap) -> Self {
        let default_bpm = tempo_map.tempo_at(0);
        Self {
            ppq: tempo_map.ppq,
            tempo_map,
            default_bpm,
            bpm: default_bpm,
        }
    }

    /// Rescale the playback tempo. Rejects non-positive and non-finite
    /// multipliers and keeps the previous tempo; returns whether it applied.
    pub fn apply_tempo_multiplier(&mut self, multiplier: f64) -> bool {
        if !multiplier.is_finite() || multiplier <= 0.0 {
            return false;
        }
        self.bpm = self.default_bpm * multiplier;
        true
    }

    pub fn tempo_multiplier(&self) -> f64 {
        self.bpm / self.default_bpm
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferenceTrack {
    pub index: usize,
    pub name: Option<String>,
    pub notes: Vec<ReferenceNote>,
}

/// A loaded reference file. Notes are read-only once loaded; only the
/// header's tempo multiplier changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferenceSong {
    pub header: SongHeader,
    pub tracks: Vec<ReferenceTrack>,
}

impl ReferenceSong {
    /// Notes of the first track that has any.
    pub fn first_track_notes(&self) -> &[ReferenceNote] {
        self.tracks
            .iter()
            .find(|t| !t.notes.is_empty())
            .map(|t| t.notes.as_slice())
            .unwrap_or(&[])
    }

    /// Notes of every track, stably sorted by tick.
    pub fn merged_notes(&self) -> Vec<ReferenceNote> {
        let mut merged: Vec<ReferenceNote> = self
            .tracks
            .iter()
            .flat_map(|t| t.notes.iter().cloned())
            .collect();
        merged.sort_by_key(|n| n.ticks);
        merged
    }

    pub fn note_count(&self) -> usize {
        self.tracks.iter().map(|t| t.notes.len()).sum()
    }

    /// End of the last sounding note, in seconds.
    pub fn duration_seconds(&self) -> f64 {
        self.tracks
            .iter()
            .flat_map(|t| t.notes.iter())
            .map(|n| n.end_seconds())
            .fold(0.0, f64::max)
    }

    pub fn header_mut(&mut self) -> &mut SongHeader {
        &mut self.header
    }
}

/// An open note waiting for its note-off.
struct Pending {
    tick: u64,
    velocity: u8,
    /// Position of the note-on among the track's note-ons
    seq: usize,
}

/// Parse a MIDI file from bytes.
pub fn load_reference(bytes: &[u8]) -> Result<ReferenceSong> {
    let smf = Smf::parse(bytes).map_err(|e| Error::MidiParse(e.to_string()))?;

    let ppq = match smf.header.timing {
        midly::Timing::Metrical(t) => t.as_int(),
        // SMPTE timing - use reasonable default
        midly::Timing::Timecode(_, _) => 480,
    };

    // Tempo events may live in any track (track 0 in format 1)
    let mut tempo_changes = Vec::new();
    for track in &smf.tracks {
        let mut tick = 0u64;
        for event in track {
            tick += event.delta.as_int() as u64;
            if let TrackEventKind::Meta(MetaMessage::Tempo(tempo)) = event.kind {
                tempo_changes.push(TempoChange {
                    tick,
                    bpm: 60_000_000.0 / tempo.as_int() as f64,
                });
            }
        }
    }
    let tempo_map = TempoMap::new(ppq, tempo_changes);

    let tracks: Vec<ReferenceTrack> = smf
        .tracks
        .iter()
        .enumerate()
        .map(|(index, track)| extract_track(index, track, &tempo_map))
        .collect();

    let song = ReferenceSong {
        header: SongHeader::new(tempo_map),
        tracks,
    };

    info!(
        ppq,
        bpm = song.header.default_bpm,
        tracks = song.tracks.len(),
        notes = song.note_count(),
        "loaded reference"
    );
    Ok(song)
}

fn extract_track(
    index: usize,
    track: &[midly::TrackEvent<'_>],
    tempo_map: &TempoMap,
) -> ReferenceTrack {
    let mut name = None;
    let mut tick = 0u64;
    // (channel, pitch) → open notes, oldest first
    let mut pending: HashMap<(u8, u8), Vec<Pending>> = HashMap::new();
    // (onset, offset, pitch, velocity, seq)
    let mut spans: Vec<(u64, u64, u8, u8, usize)> = Vec::new();
    let mut seq = 0usize;

    for event in track {
        tick += event.delta.as_int() as u64;

        match event.kind {
            TrackEventKind::Meta(MetaMessage::TrackName(bytes)) => {
                name = String::from_utf8(bytes.to_vec()).ok();
            }
            TrackEventKind::Midi { channel, message } => {
                let ch = channel.as_int();
                match message {
                    MidiMessage::NoteOn { key, vel } if vel.as_int() > 0 => {
                        pending.entry((ch, key.as_int())).or_default().push(Pending {
                            tick,
                            velocity: vel.as_int(),
                            seq,
                        });
                        seq += 1;
                    }
                    // vel=0 NoteOn is NoteOff
                    MidiMessage::NoteOff { key, .. } | MidiMessage::NoteOn { key, .. } => {
                        let open = pending.get_mut(&(ch, key.as_int()));
                        if let Some(open) = open.filter(|o| !o.is_empty()) {
                            let start = open.remove(0);
                            spans.push((start.tick, tick, key.as_int(), start.velocity, start.seq));
                        }
                    }
                    _ => {}
                }
            }
            _ => {}
        }
    }

    // Close any unclosed notes at the track's final tick
    for ((_, pitch), open) in pending {
        for start in open {
            debug!(track = index, pitch, "closing unterminated note at end of track");
            spans.push((start.tick, tick, pitch, start.velocity, start.seq));
        }
    }

    // Onset, then pitch, then note-on order in the file
    spans.sort_by_key(|&(onset, _, pitch, _, seq)| (onset, pitch, seq));

    let notes = spans
        .into_iter()
        .map(|(onset, offset, pitch, velocity, _)| {
            let time_seconds = tempo_map.ticks_to_seconds(onset);
            ReferenceNote {
                pitch,
                name: pitch_name(pitch),
                time_seconds,
                duration_seconds: tempo_map.ticks_to_seconds(offset) - time_seconds,
                velocity: velocity as f64 / 127.0,
                ticks: onset,
                duration_ticks: offset - onset,
            }
        })
        .collect();

    ReferenceTrack { index, name, notes }
}
