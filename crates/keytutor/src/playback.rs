//! Reference playback in wall-clock time.
//!
//! Every note becomes its own task in a `JoinSet` owned by the scheduler.
//! A task sleeps until its onset, sends note-on to the output and the synth,
//! sleeps for the note's length, then sends note-off. The task for the last
//! note also waits out the settle delay and flips the state to `Stopped`.
//! `stop` aborts the whole set at once.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::midi_io::NoteOutput;
use crate::note::ReferenceNote;
use crate::reference::SongHeader;
use crate::synth::Synthesizer;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaybackState {
    Stopped,
    Playing,
}

/// One note's timing relative to playback start.
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduledNote {
    pub pitch: u8,
    pub name: String,
    pub velocity: u8,
    pub on_at: Duration,
    pub hold: Duration,
    pub is_last: bool,
}

/// Parse user tempo input. Only finite, positive numbers are accepted.
pub fn parse_tempo(input: &str) -> Option<f64> {
    input
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|t| t.is_finite() && *t > 0.0)
}

/// Lay out note timings: onset at `song_delay + time / tempo`, held for
/// `duration / tempo`. `None` when a timing does not fit in a `Duration`.
pub fn schedule(
    notes: &[ReferenceNote],
    tempo: f64,
    song_delay_ms: f64,
) -> Option<Vec<ScheduledNote>> {
    let last = notes.len().saturating_sub(1);
    notes
        .iter()
        .enumerate()
        .map(|(i, note)| {
            let on_ms = song_delay_ms + note.time_seconds * 1000.0 / tempo;
            let hold_ms = note.duration_seconds.max(0.0) * 1000.0 / tempo;
            Some(ScheduledNote {
                pitch: note.pitch,
                name: note.name.clone(),
                velocity: (note.velocity * 127.0).round().clamp(1.0, 127.0) as u8,
                on_at: Duration::try_from_secs_f64(on_ms.max(0.0) / 1000.0).ok()?,
                hold: Duration::try_from_secs_f64(hold_ms / 1000.0).ok()?,
                is_last: i == last,
            })
        })
        .collect()
}

/// A tempo is usable when one second of song, after the lead-in, still lands
/// on a reachable instant.
fn tempo_fits(tempo: f64, song_delay_ms: f64) -> bool {
    if !tempo.is_finite() || tempo <= 0.0 {
        return false;
    }
    Duration::try_from_secs_f64((song_delay_ms.max(0.0) + 1000.0 / tempo) / 1000.0)
        .ok()
        .and_then(|d| Instant::now().checked_add(d))
        .is_some()
}

/// Shared between the scheduler and its note tasks.
struct Shared {
    output: Option<Arc<dyn NoteOutput>>,
    synth: Arc<dyn Synthesizer>,
    state: watch::Sender<PlaybackState>,
    /// Pitches with a note-on sent and no note-off yet
    sounding: Mutex<BTreeSet<u8>>,
    /// Bumped on every play/stop so tasks from an old session can't finish it
    generation: AtomicU64,
}

pub struct PlaybackScheduler {
    shared: Arc<Shared>,
    tasks: JoinSet<()>,
    tempo: f64,
    song_delay_ms: f64,
    settle: Duration,
}

impl PlaybackScheduler {
    pub fn new(
        output: Option<Arc<dyn NoteOutput>>,
        synth: Arc<dyn Synthesizer>,
        song_delay_ms: f64,
        settle: Duration,
    ) -> Self {
        let (state, _) = watch::channel(PlaybackState::Stopped);
        Self {
            shared: Arc::new(Shared {
                output,
                synth,
                state,
                sounding: Mutex::new(BTreeSet::new()),
                generation: AtomicU64::new(0),
            }),
            tasks: JoinSet::new(),
            tempo: 1.0,
            song_delay_ms,
            settle,
        }
    }

    pub fn state(&self) -> PlaybackState {
        *self.shared.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<PlaybackState> {
        self.shared.state.subscribe()
    }

    pub fn tempo(&self) -> f64 {
        self.tempo
    }

    /// Number of note tasks not yet finished or aborted.
    pub fn pending(&mut self) -> usize {
        while self.tasks.try_join_next().is_some() {}
        self.tasks.len()
    }

    /// Set the tempo multiplier. Invalid values are ignored and the previous
    /// tempo stays.
    pub fn set_tempo(&mut self, tempo: f64) -> bool {
        if !tempo_fits(tempo, self.song_delay_ms) {
            warn!(tempo, current = self.tempo, "ignoring invalid tempo");
            return false;
        }
        self.tempo = tempo;
        true
    }

    /// Like `set_tempo`, from user text.
    pub fn set_tempo_str(&mut self, input: &str) -> bool {
        match parse_tempo(input) {
            Some(tempo) => self.set_tempo(tempo),
            None => {
                warn!(input, current = self.tempo, "ignoring invalid tempo");
                false
            }
        }
    }

    /// Apply a tempo to the song header and adopt it for playback.
    pub fn configure(&mut self, header: &mut SongHeader, tempo: f64) -> bool {
        if !tempo_fits(tempo, self.song_delay_ms) || !header.apply_tempo_multiplier(tempo) {
            warn!(tempo, current = self.tempo, "ignoring invalid tempo");
            return false;
        }
        self.tempo = tempo;
        info!(tempo, bpm = header.bpm, "playback tempo set");
        true
    }

    /// Start playing `notes` at the current tempo. Any running playback is
    /// stopped first. Must be called inside a tokio runtime.
    pub fn play(&mut self, notes: &[ReferenceNote]) -> usize {
        self.stop();
        if notes.is_empty() {
            return 0;
        }

        let start = Instant::now();
        let plan = schedule(notes, self.tempo, self.song_delay_ms).and_then(|plan| {
            plan.into_iter()
                .map(|note| Some((start.checked_add(note.on_at)?, note)))
                .collect::<Option<Vec<_>>>()
        });
        let Some(plan) = plan else {
            warn!(tempo = self.tempo, "note times out of range at this tempo, not playing");
            return 0;
        };

        let generation = self.shared.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.shared.state.send_replace(PlaybackState::Playing);
        info!(notes = plan.len(), tempo = self.tempo, "playback started");

        for (on_at, note) in plan {
            let shared = self.shared.clone();
            let settle = self.settle;
            self.tasks
                .spawn(play_note(shared, note, on_at, settle, generation));
        }
        self.tasks.len()
    }

    /// Cancel every scheduled note and report stopped now. Keys still sounding
    /// are released.
    pub fn stop(&mut self) {
        self.shared.generation.fetch_add(1, Ordering::SeqCst);
        let cancelled = self.tasks.len();
        self.tasks.abort_all();
        self.tasks.detach_all();

        let sounding = std::mem::take(
            &mut *self
                .shared
                .sounding
                .lock()
                .expect("sounding set mutex poisoned"),
        );
        if let Some(output) = &self.shared.output {
            for pitch in &sounding {
                output.note_off(*pitch, 0);
            }
        }

        let was = self.shared.state.send_replace(PlaybackState::Stopped);
        if was == PlaybackState::Playing {
            self.shared.synth.stop();
            info!(cancelled, released = sounding.len(), "playback stopped");
        }
    }

    /// Resolve once playback reaches `Stopped`.
    pub async fn wait_stopped(&self) {
        let mut rx = self.subscribe();
        let _ = rx.wait_for(|s| *s == PlaybackState::Stopped).await;
    }
}

async fn play_note(
    shared: Arc<Shared>,
    note: ScheduledNote,
    on_at: Instant,
    settle: Duration,
    generation: u64,
) {
    tokio::time::sleep_until(on_at).await;

    {
        // `stop` bumps the generation before draining under this lock
        let mut sounding = shared.sounding.lock().expect("sounding set mutex poisoned");
        if shared.generation.load(Ordering::SeqCst) != generation {
            return;
        }
        sounding.insert(note.pitch);
        if let Some(output) = &shared.output {
            output.note_on(note.pitch, note.velocity);
        }
        shared.synth.play(&note.name, 0.0, note.hold.as_secs_f64());
    }
    debug!(pitch = note.pitch, name = %note.name, "note on");

    tokio::time::sleep(note.hold).await;

    {
        let mut sounding = shared.sounding.lock().expect("sounding set mutex poisoned");
        if shared.generation.load(Ordering::SeqCst) != generation {
            return;
        }
        sounding.remove(&note.pitch);
        if let Some(output) = &shared.output {
            output.note_off(note.pitch, 0);
        }
    }

    if !note.is_last {
        return;
    }

    tokio::time::sleep(settle).await;
    if shared.generation.load(Ordering::SeqCst) != generation {
        return;
    }
    shared.state.send_replace(PlaybackState::Stopped);
    shared.synth.stop();
    info!("playback finished");
}
