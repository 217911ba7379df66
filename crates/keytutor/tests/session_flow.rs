//! End-to-end tests: reference file in, simulated keyboard, scores and cues out.
//!
//! Reference files are built with the exporter so the tests need no fixtures
//! on disk.

use std::sync::Arc;
use std::time::Duration;

use keytutor::{
    load_reference, score, take_to_midi, CaptureMode, Cue, ExportOptions, LearningState,
    LoggingSynth, ManualClock, MemoryOutput, OutboundNote, PlaybackScheduler, PlaybackState,
    RawMessage, RecordedNote, RecordingOutcome, Session, TimingResult,
};
use pretty_assertions::assert_eq;

const START_MS: i64 = 1_700_000_000_000;
const SONG_DELAY_MS: i64 = 1600;

/// C4, E4, G4, then C4+E4 together, half a second each.
fn reference_bytes() -> Vec<u8> {
    let note = |pitch, start| RecordedNote {
        pitch,
        start_offset_seconds: start,
        duration_seconds: 0.5,
        velocity_normalized: 100.0 / 127.0,
    };
    take_to_midi(
        &[
            note(60, 0.0),
            note(64, 0.5),
            note(67, 1.0),
            note(60, 1.5),
            note(64, 1.5),
        ],
        &ExportOptions::default(),
    )
}

fn new_session() -> (Session, Arc<ManualClock>, Arc<MemoryOutput>) {
    let clock = Arc::new(ManualClock::new(START_MS));
    let output = Arc::new(MemoryOutput::new());
    let mut session = Session::new(clock.clone(), Some(output.clone()));
    session
        .load_reference_bytes(&reference_bytes())
        .expect("reference should load");
    (session, clock, output)
}

/// Press `pitch` at `at_ms` into the song and release it `hold_ms` later.
/// Events are delivered in timestamp order across all presses.
fn perform(session: &mut Session, clock: &ManualClock, capture_start: i64, presses: &[(u8, i64, i64)]) {
    let mut events: Vec<(i64, RawMessage)> = Vec::new();
    for &(pitch, at_ms, hold_ms) in presses {
        let on = capture_start + SONG_DELAY_MS + at_ms;
        events.push((on, RawMessage::new(0x90, pitch, 100)));
        events.push((on + hold_ms, RawMessage::new(0x80, pitch, 0)));
    }
    events.sort_by_key(|(t, _)| *t);

    for (t, msg) in events {
        clock.set(t);
        session.handle_raw(msg);
    }
}

#[test]
fn reference_loads_from_exported_file() {
    let song = load_reference(&reference_bytes()).unwrap();
    let notes = song.first_track_notes();

    let summary: Vec<(u8, f64, f64)> = notes
        .iter()
        .map(|n| (n.pitch, n.time_seconds, n.duration_seconds))
        .collect();
    assert_eq!(
        summary,
        vec![
            (60, 0.0, 0.5),
            (64, 0.5, 0.5),
            (67, 1.0, 0.5),
            (60, 1.5, 0.5),
            (64, 1.5, 0.5),
        ]
    );
    assert_eq!(notes[0].name, "C4");
    assert_eq!(song.header.bpm, 120.0);
}

#[test]
fn faithful_performance_scores_full_marks() {
    let (mut session, clock, _) = new_session();
    session.start_recording(CaptureMode::Test);

    perform(
        &mut session,
        &clock,
        START_MS,
        &[(60, 0, 500), (64, 500, 500), (67, 1000, 500), (60, 1500, 500), (64, 1500, 500)],
    );

    let RecordingOutcome::Scored(report) = session.stop_recording().unwrap() else {
        panic!("test capture should be scored");
    };
    assert_eq!(report.summary.total_score, 20);
    assert_eq!(report.summary.max_score(), 20);
    assert_eq!(report.summary.perfect, 5);
    assert!(report
        .notes
        .iter()
        .all(|n| n.timing_result == TimingResult::Perfect));
}

#[test]
fn sloppy_performance_is_bucketed() {
    let (mut session, clock, _) = new_session();
    session.start_recording(CaptureMode::Test);

    // C4 300ms early (into the lead-in), E4 400ms late and short, G4 skipped,
    // the chord spot on, plus a stray key nobody asked for
    perform(
        &mut session,
        &clock,
        START_MS,
        &[
            (60, -300, 500),
            (64, 900, 300),
            (60, 1500, 500),
            (64, 1500, 500),
            (71, 1600, 100),
        ],
    );

    let RecordingOutcome::Scored(report) = session.stop_recording().unwrap() else {
        panic!("test capture should be scored");
    };
    let scores: Vec<u8> = report.notes.iter().map(|n| n.score).collect();
    assert_eq!(scores, vec![3, 2, 0, 4, 4]);
    assert_eq!(report.summary.early, 1);
    assert_eq!(report.summary.late, 1);
    assert_eq!(report.summary.miss, 1);
    assert_eq!(report.summary.perfect, 2);
    assert_eq!(report.summary.note_count(), 5);
}

#[test]
fn exported_take_scores_the_same_offline() {
    let (mut session, clock, _) = new_session();
    session.start_recording(CaptureMode::Export);

    perform(
        &mut session,
        &clock,
        START_MS,
        &[(60, 100, 500), (64, 500, 400), (67, 1000, 500)],
    );

    let RecordingOutcome::Exported {
        file_name,
        bytes,
        notes,
    } = session.stop_recording().unwrap()
    else {
        panic!("export capture should produce a file");
    };
    assert_eq!(file_name, format!("output_{}.mid", START_MS + SONG_DELAY_MS + 1500));
    assert_eq!(notes.len(), 3);

    let reference = load_reference(&reference_bytes()).unwrap();
    let take = load_reference(&bytes).unwrap();
    let replayed: Vec<RecordedNote> = take
        .first_track_notes()
        .iter()
        .map(RecordedNote::from)
        .collect();

    let live = score(reference.first_track_notes(), &notes);
    let offline = score(reference.first_track_notes(), &replayed);
    assert_eq!(live.summary, offline.summary);
    assert_eq!(live.summary.total_score, 12);
}

#[test]
fn learning_walks_the_whole_song() {
    let (mut session, _, output) = new_session();
    session.start_learning().unwrap();

    for pitch in [60, 64, 67, 64] {
        session.handle_raw(RawMessage::new(0x90, pitch, 90));
        session.handle_raw(RawMessage::new(0x80, pitch, 0));
    }

    assert_eq!(session.learning_state(), LearningState::Completed);
    assert_eq!(
        output.sent(),
        vec![
            OutboundNote::On { pitch: 60, velocity: 1 },
            OutboundNote::Off { pitch: 60, velocity: 0 },
            OutboundNote::On { pitch: 64, velocity: 1 },
            OutboundNote::Off { pitch: 64, velocity: 0 },
            OutboundNote::On { pitch: 67, velocity: 1 },
            OutboundNote::Off { pitch: 67, velocity: 0 },
            OutboundNote::On { pitch: 60, velocity: 1 },
            OutboundNote::On { pitch: 64, velocity: 1 },
            OutboundNote::Off { pitch: 60, velocity: 0 },
            OutboundNote::Off { pitch: 64, velocity: 0 },
        ]
    );

    // Nothing left to cue
    output.clear();
    session.stop_learning();
    assert!(output.sent().is_empty());
    assert_eq!(session.learning_state(), LearningState::Idle);
}

#[test]
fn learning_cues_follow_the_groups() {
    let cues = {
        let song = load_reference(&reference_bytes()).unwrap();
        let mut engine = keytutor::LearningEngine::new();
        let mut cues = engine.start(song.first_track_notes()).unwrap();
        cues.extend(engine.on_note_off(60));
        cues
    };
    assert_eq!(cues, vec![Cue::Arm(60), Cue::Disarm(60), Cue::Arm(64)]);
}

#[tokio::test(start_paused = true)]
async fn playback_at_double_speed() {
    let mut song = load_reference(&reference_bytes()).unwrap();
    let output = Arc::new(MemoryOutput::new());
    let synth = Arc::new(LoggingSynth::new());
    let mut playback = PlaybackScheduler::new(
        Some(output.clone()),
        synth.clone(),
        SONG_DELAY_MS as f64,
        Duration::from_millis(1000),
    );

    assert!(playback.configure(song.header_mut(), 2.0));
    assert!(!playback.configure(song.header_mut(), -1.0));
    assert_eq!(song.header.bpm, 240.0);
    assert_eq!(song.header.tempo_multiplier(), 2.0);

    playback.play(&song.merged_notes());
    assert_eq!(playback.state(), PlaybackState::Playing);

    // Chord lands at 1600 + 750ms
    tokio::time::sleep(Duration::from_millis(2351)).await;
    let ons = output
        .sent()
        .iter()
        .filter(|n| matches!(n, OutboundNote::On { .. }))
        .count();
    assert_eq!(ons, 5);

    playback.wait_stopped().await;
    assert_eq!(output.sent().len(), 10);
    assert_eq!(synth.voices_started(), 5);
}
