//! Step learning.
//!
//! The reference is cut into chord groups: all notes sharing exactly the
//! same onset time. The engine arms the keys of the current group and waits.
//! Releasing any key of that group clears it: keys not needed next are
//! disarmed, the next group's keys are armed, and the cursor moves on by one
//! group. Clearing the last group disarms everything and completes the run.
//!
//! Onsets are compared with `==`. Two notes a rounding error apart land in
//! different groups.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::note::ReferenceNote;
use crate::{Error, Result};

/// Notes that share one onset time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChordGroup {
    pub time_seconds: f64,
    pub pitches: Vec<u8>,
}

impl ChordGroup {
    pub fn contains(&self, pitch: u8) -> bool {
        self.pitches.contains(&pitch)
    }
}

/// Feedback for the output device (key lights or a quiet sound).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Cue {
    Arm(u8),
    Disarm(u8),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LearningState {
    Idle,
    AwaitingChord,
    /// The last group was cleared; note-offs are ignored until `stop`.
    Completed,
}

/// Snapshot of where the learner is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LearningCursor {
    pub group_index: usize,
    pub group_count: usize,
    pub required: Vec<u8>,
    pub armed: BTreeSet<u8>,
}

/// Group notes by exact onset equality, in onset order.
pub fn group_chords(notes: &[ReferenceNote]) -> Vec<ChordGroup> {
    let mut ordered: Vec<&ReferenceNote> = notes.iter().collect();
    ordered.sort_by(|a, b| a.time_seconds.total_cmp(&b.time_seconds));

    let mut groups: Vec<ChordGroup> = Vec::new();
    for note in ordered {
        match groups.last_mut() {
            Some(group) if group.time_seconds == note.time_seconds => {
                if !group.contains(note.pitch) {
                    group.pitches.push(note.pitch);
                }
            }
            _ => groups.push(ChordGroup {
                time_seconds: note.time_seconds,
                pitches: vec![note.pitch],
            }),
        }
    }
    groups
}

pub struct LearningEngine {
    state: LearningState,
    groups: Vec<ChordGroup>,
    cursor: usize,
    armed: BTreeSet<u8>,
}

impl LearningEngine {
    pub fn new() -> Self {
        Self {
            state: LearningState::Idle,
            groups: Vec::new(),
            cursor: 0,
            armed: BTreeSet::new(),
        }
    }

    pub fn state(&self) -> LearningState {
        self.state
    }

    /// True while a group is waiting to be played.
    pub fn is_pending(&self) -> bool {
        self.state == LearningState::AwaitingChord
    }

    pub fn groups(&self) -> &[ChordGroup] {
        &self.groups
    }

    pub fn cursor(&self) -> Option<LearningCursor> {
        if self.state != LearningState::AwaitingChord {
            return None;
        }
        let group = self.groups.get(self.cursor)?;
        Some(LearningCursor {
            group_index: self.cursor,
            group_count: self.groups.len(),
            required: group.pitches.clone(),
            armed: self.armed.clone(),
        })
    }

    /// Begin at the first group and arm its keys.
    pub fn start(&mut self, notes: &[ReferenceNote]) -> Result<Vec<Cue>> {
        let groups = group_chords(notes);
        let Some(first) = groups.first() else {
            return Err(Error::EmptyReference);
        };

        let cues: Vec<Cue> = first.pitches.iter().map(|&p| Cue::Arm(p)).collect();
        self.armed = first.pitches.iter().copied().collect();
        info!(groups = groups.len(), first = ?first.pitches, "learning started");

        self.groups = groups;
        self.cursor = 0;
        self.state = LearningState::AwaitingChord;
        Ok(cues)
    }

    /// Feed a key release. Returns the cues to send, empty when the release
    /// doesn't clear the current group.
    pub fn on_note_off(&mut self, pitch: u8) -> Vec<Cue> {
        if self.state != LearningState::AwaitingChord {
            return Vec::new();
        }
        let Some(current) = self.groups.get(self.cursor) else {
            return Vec::new();
        };
        if !current.contains(pitch) {
            debug!(pitch, expected = ?current.pitches, "release outside current group");
            return Vec::new();
        }

        let next_index = self
            .groups
            .iter()
            .position(|g| g.time_seconds > current.time_seconds);

        let Some(next_index) = next_index else {
            let cues: Vec<Cue> = current.pitches.iter().map(|&p| Cue::Disarm(p)).collect();
            self.armed.clear();
            self.state = LearningState::Completed;
            info!(groups = self.groups.len(), "learning completed");
            return cues;
        };

        let next = &self.groups[next_index];
        let mut cues: Vec<Cue> = current
            .pitches
            .iter()
            .filter(|p| !next.contains(**p))
            .map(|&p| Cue::Disarm(p))
            .collect();
        cues.extend(next.pitches.iter().map(|&p| Cue::Arm(p)));

        debug!(from = self.cursor, to = next_index, next = ?next.pitches, "group cleared");
        self.armed = next.pitches.iter().copied().collect();
        self.cursor = next_index;
        cues
    }

    /// Leave learning mode. Returns disarm cues for keys still armed.
    pub fn stop(&mut self) -> Vec<Cue> {
        let cues = self.armed.iter().map(|&p| Cue::Disarm(p)).collect();
        if self.state != LearningState::Idle {
            info!("learning stopped");
        }
        self.state = LearningState::Idle;
        self.groups.clear();
        self.cursor = 0;
        self.armed.clear();
        cues
    }
}

impl Default for LearningEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn notes(layout: &[(u8, f64)]) -> Vec<ReferenceNote> {
        layout.iter()
            .map(|&(pitch, time)| ReferenceNote::new(pitch, time, 0.25))
            .collect()
    }

    #[test]
    fn groups_by_exact_onset() {
        let groups = group_chords(&notes(&[(60, 0.0), (62, 0.5), (64, 0.5), (65, 1.0)]));
        assert_eq!(
            groups,
            vec![
                ChordGroup { time_seconds: 0.0, pitches: vec![60] },
                ChordGroup { time_seconds: 0.5, pitches: vec![62, 64] },
                ChordGroup { time_seconds: 1.0, pitches: vec![65] },
            ]
        );
    }

    #[test]
    fn near_equal_onsets_stay_apart() {
        let groups = group_chords(&notes(&[(60, 0.1 + 0.2), (64, 0.3)]));
        assert_eq!(groups.len(), 2);
    }

    #[test]
    fn start_arms_whole_first_group() {
        let mut engine = LearningEngine::new();
        let cues = engine.start(&notes(&[(60, 0.0), (67, 0.0), (62, 0.5)])).unwrap();
        assert_eq!(cues, vec![Cue::Arm(60), Cue::Arm(67)]);
        assert_eq!(engine.state(), LearningState::AwaitingChord);

        let cursor = engine.cursor().unwrap();
        assert_eq!(cursor.group_index, 0);
        assert_eq!(cursor.required, vec![60, 67]);
    }

    #[test]
    fn start_requires_notes() {
        let mut engine = LearningEngine::new();
        assert!(matches!(engine.start(&[]), Err(Error::EmptyReference)));
        assert_eq!(engine.state(), LearningState::Idle);
    }

    #[test]
    fn releasing_member_advances_one_group() {
        let mut engine = LearningEngine::new();
        engine.start(&notes(&[(60, 0.0), (62, 0.5), (64, 0.5)])).unwrap();

        let cues = engine.on_note_off(60);
        assert_eq!(cues, vec![Cue::Disarm(60), Cue::Arm(62), Cue::Arm(64)]);

        let cursor = engine.cursor().unwrap();
        assert_eq!(cursor.group_index, 1);
        assert_eq!(cursor.armed, BTreeSet::from([62, 64]));
    }

    #[test]
    fn shared_pitch_stays_armed() {
        let mut engine = LearningEngine::new();
        engine.start(&notes(&[(48, 0.0), (60, 0.0), (48, 1.0), (64, 1.0)])).unwrap();

        let cues = engine.on_note_off(48);
        assert_eq!(cues, vec![Cue::Disarm(60), Cue::Arm(48), Cue::Arm(64)]);
    }

    #[test]
    fn wrong_key_does_nothing() {
        let mut engine = LearningEngine::new();
        engine.start(&notes(&[(60, 0.0), (62, 0.5)])).unwrap();

        assert!(engine.on_note_off(61).is_empty());
        assert_eq!(engine.cursor().unwrap().group_index, 0);
    }

    #[test]
    fn clearing_last_group_completes() {
        let mut engine = LearningEngine::new();
        engine.start(&notes(&[(60, 0.0), (62, 0.5)])).unwrap();
        engine.on_note_off(60);

        let cues = engine.on_note_off(62);
        assert_eq!(cues, vec![Cue::Disarm(62)]);
        assert_eq!(engine.state(), LearningState::Completed);
        assert!(engine.cursor().is_none());

        // Further releases are ignored
        assert!(engine.on_note_off(62).is_empty());
    }

    #[test]
    fn stop_disarms_and_resets() {
        let mut engine = LearningEngine::new();
        engine.start(&notes(&[(60, 0.0), (64, 0.0)])).unwrap();

        let cues = engine.stop();
        assert_eq!(cues, vec![Cue::Disarm(60), Cue::Disarm(64)]);
        assert_eq!(engine.state(), LearningState::Idle);
        assert!(engine.on_note_off(60).is_empty());
        assert!(engine.groups().is_empty());
    }

    #[test]
    fn restart_begins_at_first_group() {
        let mut engine = LearningEngine::new();
        let reference = notes(&[(60, 0.0), (62, 0.5), (64, 1.0)]);
        engine.start(&reference).unwrap();
        engine.on_note_off(60);
        engine.stop();

        engine.start(&reference).unwrap();
        assert_eq!(engine.cursor().unwrap().group_index, 0);
    }
}
