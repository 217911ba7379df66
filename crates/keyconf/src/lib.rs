//! Configuration loading for keytutor.
//!
//! # Config File Locations
//!
//! Files are loaded in order (later wins):
//! 1. `/etc/keytutor/config.toml` (system)
//! 2. `~/.config/keytutor/config.toml` (user)
//! 3. `./keytutor.toml` (local override, replaced by `--config` when given)
//! 4. Environment variables (`KEYTUTOR_*`)
//!
//! Files are merged table by table, so a local file that only sets
//! `[midi] input` keeps every other value from the files before it.
//!
//! # Example Config
//!
//! ```toml
//! [timing]
//! delay_offset_ms = 100
//! canvas_width = 800
//! note_start_offset = 500
//! pixels_per_second = 200
//!
//! [scoring]
//! match_window = 0.5
//! perfect_timing = 0.25
//!
//! [playback]
//! tempo = 1.0
//!
//! [midi]
//! input = "Digital Piano"
//! output = "Digital Piano"
//!
//! [paths]
//! export_dir = "~/midi/takes"
//!
//! [telemetry]
//! log_level = "debug"
//! ```

pub mod loader;
pub mod sections;

pub use loader::{discover_config_files_with_override, ConfigSources};
pub use sections::{
    MidiConfig, PathsConfig, PlaybackConfig, ScoringConfig, TelemetryConfig, TimingConfig,
};

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Configuration loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {message}")]
    Parse { path: PathBuf, message: String },
}

/// Complete keytutor configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct TutorConfig {
    #[serde(default)]
    pub timing: TimingConfig,

    #[serde(default)]
    pub scoring: ScoringConfig,

    #[serde(default)]
    pub playback: PlaybackConfig,

    #[serde(default)]
    pub midi: MidiConfig,

    #[serde(default)]
    pub paths: PathsConfig,

    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

impl TutorConfig {
    /// Load configuration from all standard sources.
    pub fn load() -> Result<Self, ConfigError> {
        let (config, _sources) = Self::load_with_sources_from(None)?;
        Ok(config)
    }

    /// Load configuration with an explicit file taking the place of
    /// `./keytutor.toml`. System and user configs still load first.
    pub fn load_from(config_path: Option<&Path>) -> Result<Self, ConfigError> {
        let (config, _sources) = Self::load_with_sources_from(config_path)?;
        Ok(config)
    }

    /// Load configuration and report which files and env vars contributed.
    pub fn load_with_sources_from(
        config_path: Option<&Path>,
    ) -> Result<(Self, ConfigSources), ConfigError> {
        let mut sources = ConfigSources::default();
        let mut merged = toml::Table::new();

        for path in loader::discover_config_files_with_override(config_path) {
            let table = loader::read_table(&path)?;
            loader::merge_tables(&mut merged, table);
            sources.files.push(path);
        }

        let mut config = loader::from_table(merged, config_path.unwrap_or(Path::new("<merged>")))?;
        loader::apply_env_overrides(&mut config, &mut sources);

        Ok((config, sources))
    }

    /// Serialize config to a TOML string.
    pub fn to_toml(&self) -> String {
        let mut output = String::from("# keytutor configuration\n\n");
        // Every section is a plain struct of scalars, so serialization cannot fail.
        output.push_str(&toml::to_string_pretty(self).unwrap_or_default());
        output
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = TutorConfig::default();
        assert_eq!(config.timing.song_delay_ms(), 1600.0);
        assert_eq!(config.scoring.match_window, 0.5);
        assert_eq!(config.playback.settle_ms, 1000);
        assert_eq!(config.midi.cue_velocity, 1);
    }

    #[test]
    fn test_to_toml() {
        let config = TutorConfig::default();
        let toml = config.to_toml();
        assert!(toml.contains("[timing]"));
        assert!(toml.contains("[scoring]"));
        assert!(toml.contains("log_level = \"info\""));
    }

    #[test]
    fn test_load_explicit_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keytutor.toml");
        std::fs::write(&path, "[playback]\nsettle_ms = 250\n").unwrap();

        let (config, sources) = TutorConfig::load_with_sources_from(Some(&path)).unwrap();
        assert_eq!(config.playback.settle_ms, 250);
        assert!(sources.files.contains(&path));
    }
}
