//! Performance scoring.
//!
//! Reference notes are visited in order. Each one takes the first played
//! note (in played order) with the same pitch whose onset lies strictly
//! inside the match window, and that played note is consumed. The match is
//! greedy: an earlier, worse-fitting played note wins over a later, better
//! one. Timing and duration are rated independently, two points each.

use keyconf::ScoringConfig;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::note::{RecordedNote, ReferenceNote};

/// Points per reference note when both timing and duration are perfect.
pub const MAX_NOTE_SCORE: u8 = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimingResult {
    Perfect,
    Early,
    Late,
    Miss,
}

impl TimingResult {
    pub fn points(self) -> u8 {
        match self {
            TimingResult::Perfect => 2,
            TimingResult::Early | TimingResult::Late => 1,
            TimingResult::Miss => 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DurationResult {
    Perfect,
    Good,
    Miss,
}

impl DurationResult {
    pub fn points(self) -> u8 {
        match self {
            DurationResult::Perfect => 2,
            DurationResult::Good => 1,
            DurationResult::Miss => 0,
        }
    }
}

/// Scoring windows in seconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Tolerances {
    /// Half-width of the open onset window
    pub match_window: f64,
    pub perfect_timing: f64,
    pub perfect_duration: f64,
    pub good_duration: f64,
}

impl Default for Tolerances {
    fn default() -> Self {
        Self {
            match_window: 0.5,
            perfect_timing: 0.25,
            perfect_duration: 0.15,
            good_duration: 0.25,
        }
    }
}

impl From<&ScoringConfig> for Tolerances {
    fn from(config: &ScoringConfig) -> Self {
        Self {
            match_window: config.match_window,
            perfect_timing: config.perfect_timing,
            perfect_duration: config.perfect_duration,
            good_duration: config.good_duration,
        }
    }
}

/// Result for one reference note.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredNote {
    pub pitch: u8,
    pub name: String,
    pub time_seconds: f64,
    /// 0–4
    pub score: u8,
    pub timing_result: TimingResult,
    pub duration_result: DurationResult,
    /// Index of the consumed played note, if any
    pub played_index: Option<usize>,
}

/// Aggregate counts, bucketed by timing result.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoreSummary {
    pub total_score: u32,
    pub perfect: u32,
    pub early: u32,
    pub late: u32,
    pub miss: u32,
}

impl ScoreSummary {
    fn record(&mut self, note: &ScoredNote) {
        self.total_score += note.score as u32;
        match note.timing_result {
            TimingResult::Perfect => self.perfect += 1,
            TimingResult::Early => self.early += 1,
            TimingResult::Late => self.late += 1,
            TimingResult::Miss => self.miss += 1,
        }
    }

    /// Number of reference notes scored.
    pub fn note_count(&self) -> u32 {
        self.perfect + self.early + self.late + self.miss
    }

    pub fn max_score(&self) -> u32 {
        self.note_count() * MAX_NOTE_SCORE as u32
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreReport {
    pub notes: Vec<ScoredNote>,
    pub summary: ScoreSummary,
}

/// Score with the default windows.
pub fn score(reference: &[ReferenceNote], played: &[RecordedNote]) -> ScoreReport {
    score_with(reference, played, &Tolerances::default())
}

pub fn score_with(
    reference: &[ReferenceNote],
    played: &[RecordedNote],
    tolerances: &Tolerances,
) -> ScoreReport {
    let mut consumed = vec![false; played.len()];
    let mut summary = ScoreSummary::default();
    let mut notes = Vec::with_capacity(reference.len());

    for curr in reference {
        let window_start = curr.time_seconds - tolerances.match_window;
        let window_end = curr.time_seconds + tolerances.match_window;

        let found = played.iter().enumerate().position(|(i, p)| {
            !consumed[i]
                && p.pitch == curr.pitch
                && window_start < p.start_offset_seconds
                && p.start_offset_seconds < window_end
        });

        let scored = match found {
            Some(idx) => {
                consumed[idx] = true;
                let p = &played[idx];
                let timing_result = rate_timing(curr, p, tolerances);
                let duration_result = rate_duration(curr, p, tolerances);
                ScoredNote {
                    pitch: curr.pitch,
                    name: curr.name.clone(),
                    time_seconds: curr.time_seconds,
                    score: timing_result.points() + duration_result.points(),
                    timing_result,
                    duration_result,
                    played_index: Some(idx),
                }
            }
            None => ScoredNote {
                pitch: curr.pitch,
                name: curr.name.clone(),
                time_seconds: curr.time_seconds,
                score: 0,
                timing_result: TimingResult::Miss,
                duration_result: DurationResult::Miss,
                played_index: None,
            },
        };

        debug!(
            pitch = scored.pitch,
            name = %scored.name,
            score = scored.score,
            timing = ?scored.timing_result,
            duration = ?scored.duration_result,
            "scored note"
        );

        summary.record(&scored);
        notes.push(scored);
    }

    ScoreReport { notes, summary }
}

fn rate_timing(curr: &ReferenceNote, p: &RecordedNote, tolerances: &Tolerances) -> TimingResult {
    let time_diff = (curr.time_seconds - p.start_offset_seconds).abs();

    if time_diff <= tolerances.perfect_timing {
        TimingResult::Perfect
    } else if time_diff <= tolerances.match_window && p.start_offset_seconds < curr.time_seconds {
        TimingResult::Early
    } else if time_diff <= tolerances.match_window && p.start_offset_seconds > curr.time_seconds {
        TimingResult::Late
    } else {
        // Only reachable through float rounding at the window edge
        TimingResult::Miss
    }
}

fn rate_duration(curr: &ReferenceNote, p: &RecordedNote, tolerances: &Tolerances) -> DurationResult {
    let duration_diff = (curr.duration_seconds - p.duration_seconds).abs();

    if duration_diff <= tolerances.perfect_duration {
        DurationResult::Perfect
    } else if duration_diff <= tolerances.good_duration {
        DurationResult::Good
    } else {
        DurationResult::Miss
    }
}
