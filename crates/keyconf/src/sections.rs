//! Configuration sections.
//!
//! Every field has a serde default so a partial file only overrides the keys
//! it names.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Lead-in geometry shared by the recorder and the playback scheduler.
///
/// The lead-in is the time a note takes to scroll from the right edge of the
/// piano roll to the strike line, plus a fixed offset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimingConfig {
    /// Fixed offset before the scroll distance, in milliseconds.
    /// Default: 100
    #[serde(default = "TimingConfig::default_delay_offset_ms")]
    pub delay_offset_ms: f64,

    /// Piano-roll width in pixels.
    /// Default: 800
    #[serde(default = "TimingConfig::default_canvas_width")]
    pub canvas_width: f64,

    /// X position of the strike line in pixels.
    /// Default: 500
    #[serde(default = "TimingConfig::default_note_start_offset")]
    pub note_start_offset: f64,

    /// Scroll speed.
    /// Default: 200
    #[serde(default = "TimingConfig::default_pixels_per_second")]
    pub pixels_per_second: f64,
}

impl TimingConfig {
    fn default_delay_offset_ms() -> f64 {
        100.0
    }

    fn default_canvas_width() -> f64 {
        800.0
    }

    fn default_note_start_offset() -> f64 {
        500.0
    }

    fn default_pixels_per_second() -> f64 {
        200.0
    }

    /// Playback lead-in in milliseconds (1600 with the defaults).
    pub fn song_delay_ms(&self) -> f64 {
        self.delay_offset_ms
            + (self.canvas_width - self.note_start_offset) / self.pixels_per_second * 1000.0
    }
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            delay_offset_ms: Self::default_delay_offset_ms(),
            canvas_width: Self::default_canvas_width(),
            note_start_offset: Self::default_note_start_offset(),
            pixels_per_second: Self::default_pixels_per_second(),
        }
    }
}

/// Scoring tolerances, all in seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoringConfig {
    /// Half-width of the open onset window a played note must fall in.
    #[serde(default = "ScoringConfig::default_match_window")]
    pub match_window: f64,

    /// Largest onset difference still rated perfect.
    #[serde(default = "ScoringConfig::default_perfect_timing")]
    pub perfect_timing: f64,

    /// Largest duration difference still rated perfect.
    #[serde(default = "ScoringConfig::default_perfect_duration")]
    pub perfect_duration: f64,

    /// Largest duration difference still rated good.
    #[serde(default = "ScoringConfig::default_good_duration")]
    pub good_duration: f64,
}

impl ScoringConfig {
    fn default_match_window() -> f64 {
        0.5
    }

    fn default_perfect_timing() -> f64 {
        0.25
    }

    fn default_perfect_duration() -> f64 {
        0.15
    }

    fn default_good_duration() -> f64 {
        0.25
    }
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            match_window: Self::default_match_window(),
            perfect_timing: Self::default_perfect_timing(),
            perfect_duration: Self::default_perfect_duration(),
            good_duration: Self::default_good_duration(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaybackConfig {
    /// Initial tempo multiplier (1.0 = file tempo).
    #[serde(default = "PlaybackConfig::default_tempo")]
    pub tempo: f64,

    /// Delay after the final note-off before playback reports stopped.
    /// Default: 1000
    #[serde(default = "PlaybackConfig::default_settle_ms")]
    pub settle_ms: u64,
}

impl PlaybackConfig {
    fn default_tempo() -> f64 {
        1.0
    }

    fn default_settle_ms() -> u64 {
        1000
    }
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            tempo: Self::default_tempo(),
            settle_ms: Self::default_settle_ms(),
        }
    }
}

/// MIDI device selection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MidiConfig {
    /// Substring of the input port name to open.
    #[serde(default)]
    pub input: Option<String>,

    /// Substring of the output port name to open.
    #[serde(default)]
    pub output: Option<String>,

    /// Velocity used for learning cues. Keyboards with key lights treat any
    /// note-on as "light this key", so the default is nearly silent.
    /// Default: 1
    #[serde(default = "MidiConfig::default_cue_velocity")]
    pub cue_velocity: u8,
}

impl MidiConfig {
    fn default_cue_velocity() -> u8 {
        1
    }
}

impl Default for MidiConfig {
    fn default() -> Self {
        Self {
            input: None,
            output: None,
            cue_velocity: Self::default_cue_velocity(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Where exported takes are written.
    /// Default: current directory
    #[serde(default = "PathsConfig::default_export_dir")]
    pub export_dir: PathBuf,
}

impl PathsConfig {
    fn default_export_dir() -> PathBuf {
        PathBuf::from(".")
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            export_dir: Self::default_export_dir(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Log filter (trace, debug, info, warn, error, or an EnvFilter directive).
    /// Default: info
    #[serde(default = "TelemetryConfig::default_log_level")]
    pub log_level: String,
}

impl TelemetryConfig {
    fn default_log_level() -> String {
        "info".to_string()
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: Self::default_log_level(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn song_delay_matches_default_geometry() {
        assert_eq!(TimingConfig::default().song_delay_ms(), 1600.0);
    }

    #[test]
    fn song_delay_follows_scroll_speed() {
        let timing = TimingConfig {
            pixels_per_second: 100.0,
            ..TimingConfig::default()
        };
        assert_eq!(timing.song_delay_ms(), 3100.0);
    }
}
