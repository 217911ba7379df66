//! Config file discovery, loading, and environment variable overlay.

use crate::{ConfigError, TutorConfig};
use std::env;
use std::path::{Path, PathBuf};

/// Information about where config values came from.
#[derive(Debug, Clone, Default)]
pub struct ConfigSources {
    /// Config files that were loaded (in order)
    pub files: Vec<PathBuf>,
    /// Environment variables that overrode config values
    pub env_overrides: Vec<String>,
}

/// Discover config files, optionally with a CLI override path.
///
/// If `cli_path` is provided and exists, it replaces the local override.
/// Returns paths in load order (system, user, local/cli).
pub fn discover_config_files_with_override(cli_path: Option<&Path>) -> Vec<PathBuf> {
    let mut files = Vec::new();

    let system = PathBuf::from("/etc/keytutor/config.toml");
    if system.exists() {
        files.push(system);
    }

    // User config (XDG_CONFIG_HOME or ~/.config)
    if let Some(config_dir) = directories::BaseDirs::new().map(|d| d.config_dir().to_path_buf()) {
        let user = config_dir.join("keytutor/config.toml");
        if user.exists() {
            files.push(user);
        }
    }

    if let Some(path) = cli_path {
        if path.exists() {
            files.push(path.to_path_buf());
            return files;
        }
    }

    let local = PathBuf::from("keytutor.toml");
    if local.exists() {
        files.push(local);
    }

    files
}

/// Read a TOML file into a raw table.
pub fn read_table(path: &Path) -> Result<toml::Table, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
        path: path.to_path_buf(),
        source: e,
    })?;

    parse_table(&contents, path)
}

fn parse_table(contents: &str, path: &Path) -> Result<toml::Table, ConfigError> {
    contents
        .parse()
        .map_err(|e: toml::de::Error| ConfigError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
}

/// Deep-merge `overlay` into `base`. Nested tables merge key by key; any
/// other value in `overlay` replaces the one in `base`.
pub fn merge_tables(base: &mut toml::Table, overlay: toml::Table) {
    for (key, value) in overlay {
        match (base.get_mut(&key), value) {
            (Some(toml::Value::Table(existing)), toml::Value::Table(incoming)) => {
                merge_tables(existing, incoming);
            }
            (_, value) => {
                base.insert(key, value);
            }
        }
    }
}

/// Deserialize a merged table, filling every missing key with its default.
pub fn from_table(table: toml::Table, path: &Path) -> Result<TutorConfig, ConfigError> {
    let mut config: TutorConfig =
        toml::Value::Table(table)
            .try_into()
            .map_err(|e: toml::de::Error| ConfigError::Parse {
                path: path.to_path_buf(),
                message: e.to_string(),
            })?;

    config.paths.export_dir = expand_path(&config.paths.export_dir.to_string_lossy());
    Ok(config)
}

/// Apply `KEYTUTOR_*` environment variable overrides to config.
pub fn apply_env_overrides(config: &mut TutorConfig, sources: &mut ConfigSources) {
    apply_overrides_with(config, sources, |key| env::var(key).ok());
}

/// Apply overrides from an arbitrary lookup (the environment in production).
pub fn apply_overrides_with<F>(config: &mut TutorConfig, sources: &mut ConfigSources, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(v) = lookup("KEYTUTOR_LOG_LEVEL") {
        config.telemetry.log_level = v;
        sources.env_overrides.push("KEYTUTOR_LOG_LEVEL".to_string());
    }
    if let Some(v) = lookup("KEYTUTOR_MIDI_INPUT") {
        config.midi.input = Some(v);
        sources.env_overrides.push("KEYTUTOR_MIDI_INPUT".to_string());
    }
    if let Some(v) = lookup("KEYTUTOR_MIDI_OUTPUT") {
        config.midi.output = Some(v);
        sources.env_overrides.push("KEYTUTOR_MIDI_OUTPUT".to_string());
    }
    if let Some(v) = lookup("KEYTUTOR_EXPORT_DIR") {
        config.paths.export_dir = expand_path(&v);
        sources.env_overrides.push("KEYTUTOR_EXPORT_DIR".to_string());
    }
    if let Some(v) = lookup("KEYTUTOR_TEMPO") {
        // Same rule as the tempo input: positive numbers only
        if let Ok(tempo) = v.trim().parse::<f64>() {
            if tempo.is_finite() && tempo > 0.0 {
                config.playback.tempo = tempo;
                sources.env_overrides.push("KEYTUTOR_TEMPO".to_string());
            }
        }
    }
}

/// Expand a leading `~/` to the home directory.
pub fn expand_path(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = directories::BaseDirs::new().map(|d| d.home_dir().to_path_buf()) {
            return home.join(stripped);
        }
    }
    PathBuf::from(path)
}
