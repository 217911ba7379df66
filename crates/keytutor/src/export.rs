//! Recorded take → Standard MIDI File bytes.

use serde::{Deserialize, Serialize};

use crate::note::RecordedNote;

/// Options for take export.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportOptions {
    /// Ticks per quarter note. Default: 480.
    pub ppq: u16,
    /// Tempo written to the tempo track. Default: 120.
    pub bpm: f64,
    /// Name meta event for the take track.
    pub track_name: String,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self {
            ppq: 480,
            bpm: 120.0,
            track_name: "Recording".to_string(),
        }
    }
}

/// Download name for a take exported at `epoch_ms`.
pub fn export_file_name(epoch_ms: i64) -> String {
    format!("output_{}.mid", epoch_ms)
}

/// Write a take as a format 1 file.
///
/// Track 0: tempo. Track 1: the take on channel 0. Onsets before time zero
/// are clamped to the start of the file.
pub fn take_to_midi(notes: &[RecordedNote], options: &ExportOptions) -> Vec<u8> {
    let ticks_per_second = options.ppq as f64 * options.bpm / 60.0;
    let to_tick = |seconds: f64| (seconds.max(0.0) * ticks_per_second).round() as u64;

    let tracks = vec![
        build_tempo_track(options.bpm),
        build_take_track(notes, &options.track_name, to_tick),
    ];

    build_midi_file(options.ppq, &tracks)
}

fn build_tempo_track(bpm: f64) -> Vec<u8> {
    let usec = (60_000_000.0 / bpm).round() as u32;
    let mut track_data = Vec::new();

    write_vlq(&mut track_data, 0);
    track_data.extend_from_slice(&[
        0xFF,
        0x51,
        0x03,
        (usec >> 16) as u8,
        (usec >> 8) as u8,
        usec as u8,
    ]);

    // End of track
    write_vlq(&mut track_data, 0);
    track_data.extend_from_slice(&[0xFF, 0x2F, 0x00]);

    track_data
}

fn build_take_track<F>(notes: &[RecordedNote], name: &str, to_tick: F) -> Vec<u8>
where
    F: Fn(f64) -> u64,
{
    let mut events: Vec<(u64, Vec<u8>)> = Vec::new();

    let name_bytes = name.as_bytes();
    let mut name_event = vec![0xFF, 0x03];
    write_vlq(&mut name_event, name_bytes.len() as u32);
    name_event.extend_from_slice(name_bytes);
    events.push((0, name_event));

    for note in notes {
        let onset = to_tick(note.start_offset_seconds);
        let offset = to_tick(note.start_offset_seconds + note.duration_seconds.max(0.0)).max(onset);
        let velocity = (note.velocity_normalized * 127.0).round().clamp(1.0, 127.0) as u8;
        let pitch = note.pitch & 0x7F;

        events.push((onset, vec![0x90, pitch, velocity]));
        events.push((offset, vec![0x80, pitch, 0]));
    }

    // Sort by tick, with note-offs before note-ons at the same tick
    events.sort_by(|a, b| {
        a.0.cmp(&b.0).then_with(|| {
            let a_is_off = a.1.first().is_some_and(|b| b & 0xF0 == 0x80);
            let b_is_off = b.1.first().is_some_and(|b| b & 0xF0 == 0x80);
            b_is_off.cmp(&a_is_off)
        })
    });

    let mut track_data = Vec::new();
    let mut last_tick = 0u64;

    for (tick, data) in events {
        let delta = tick.saturating_sub(last_tick);
        write_vlq(&mut track_data, delta as u32);
        track_data.extend_from_slice(&data);
        last_tick = tick;
    }

    write_vlq(&mut track_data, 0);
    track_data.extend_from_slice(&[0xFF, 0x2F, 0x00]);

    track_data
}

/// Assemble a complete MIDI file from track data blobs.
fn build_midi_file(ppq: u16, tracks: &[Vec<u8>]) -> Vec<u8> {
    let mut buf = Vec::new();

    buf.extend_from_slice(b"MThd");
    buf.extend_from_slice(&6u32.to_be_bytes());
    buf.extend_from_slice(&1u16.to_be_bytes()); // format 1
    buf.extend_from_slice(&(tracks.len() as u16).to_be_bytes());
    buf.extend_from_slice(&ppq.to_be_bytes());

    for track_data in tracks {
        buf.extend_from_slice(b"MTrk");
        buf.extend_from_slice(&(track_data.len() as u32).to_be_bytes());
        buf.extend_from_slice(track_data);
    }

    buf
}

/// Write a variable-length quantity to a byte buffer.
fn write_vlq(buf: &mut Vec<u8>, mut value: u32) {
    let mut bytes = vec![(value & 0x7F) as u8];
    value >>= 7;

    while value > 0 {
        bytes.push((value & 0x7F) as u8 | 0x80);
        value >>= 7;
    }

    bytes.reverse();
    buf.extend_from_slice(&bytes);
}

#[cfg(test)]
mod tests {
    use super::*;
    use midly::{MidiMessage, Smf, TrackEventKind};

    fn note(pitch: u8, start: f64, duration: f64) -> RecordedNote {
        RecordedNote {
            pitch,
            start_offset_seconds: start,
            duration_seconds: duration,
            velocity_normalized: 0.75,
        }
    }

    fn note_ticks(bytes: &[u8]) -> Vec<(u64, bool, u8)> {
        let smf = Smf::parse(bytes).expect("Generated MIDI should be valid");
        let mut tick = 0u64;
        let mut out = Vec::new();
        for event in &smf.tracks[1] {
            tick += event.delta.as_int() as u64;
            if let TrackEventKind::Midi { message, .. } = event.kind {
                match message {
                    MidiMessage::NoteOn { key, .. } => out.push((tick, true, key.as_int())),
                    MidiMessage::NoteOff { key, .. } => out.push((tick, false, key.as_int())),
                    _ => {}
                }
            }
        }
        out
    }

    #[test]
    fn file_name_uses_epoch_millis() {
        assert_eq!(export_file_name(1_700_000_000_123), "output_1700000000123.mid");
    }

    #[test]
    fn writes_two_track_format_one() {
        let bytes = take_to_midi(&[note(60, 0.0, 0.5)], &ExportOptions::default());
        let smf = Smf::parse(&bytes).unwrap();
        assert_eq!(smf.header.format, midly::Format::Parallel);
        assert_eq!(smf.tracks.len(), 2);
    }

    #[test]
    fn seconds_become_ticks() {
        let bytes = take_to_midi(
            &[note(60, 0.0, 0.5), note(64, 0.5, 0.25)],
            &ExportOptions::default(),
        );
        assert_eq!(
            note_ticks(&bytes),
            vec![(0, true, 60), (480, false, 60), (480, true, 64), (720, false, 64)]
        );
    }

    #[test]
    fn negative_onsets_clamp_to_zero() {
        let bytes = take_to_midi(&[note(60, -0.25, 0.5)], &ExportOptions::default());
        assert_eq!(note_ticks(&bytes), vec![(0, true, 60), (240, false, 60)]);
    }

    #[test]
    fn empty_take_is_still_valid() {
        let bytes = take_to_midi(&[], &ExportOptions::default());
        let smf = Smf::parse(&bytes).unwrap();
        assert_eq!(smf.tracks.len(), 2);
    }

    #[test]
    fn vlq_encoding() {
        let mut buf = Vec::new();
        write_vlq(&mut buf, 0);
        assert_eq!(buf, vec![0x00]);

        buf.clear();
        write_vlq(&mut buf, 127);
        assert_eq!(buf, vec![0x7F]);

        buf.clear();
        write_vlq(&mut buf, 128);
        assert_eq!(buf, vec![0x81, 0x00]);

        buf.clear();
        write_vlq(&mut buf, 480);
        assert_eq!(buf, vec![0x83, 0x60]);
    }
}
