//! Layered configuration: a packaged default file, overridden by a
//! user config file, overridden by `LOOPER_`-prefixed environment variables.

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

use std::path::PathBuf;

pub static DEFAULT_CONFIG: &str = include_str!("../Loopsmith.toml");

#[derive(Clone, Debug, Deserialize, Default, PartialEq)]
pub struct Settings {
    #[serde(default)]
    pub playback: PlaybackSettings,
    #[serde(default)]
    pub analysis: AnalysisSettings,
}

impl Settings {
    /// Loads settings from `config`, then `LOOPER_`-prefixed environment
    /// variables, applying `log_level` as a final override.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file is missing or malformed.
    pub fn init(
        config: PathBuf,
        log_level: Option<log::LevelFilter>,
    ) -> Result<Self, ConfigError> {
        let built = Config::builder()
            .add_source(File::from(config))
            .add_source(Environment::with_prefix("LOOPER"))
            .build()?;

        let mut settings: Self = built.try_deserialize()?;

        if let Some(log_level) = log_level {
            settings.playback.log_level = log_level_to_string(log_level);
        }

        Ok(settings)
    }

    /// Returns the default path to the config file, creating it with the
    /// packaged default contents if it does not already exist.
    ///
    /// See [`crate::get_config_dir`] for where this path lives.
    ///
    /// # Errors
    ///
    /// Returns an error if the config directory cannot be determined or the
    /// default file cannot be written.
    pub fn get_config_path() -> Result<PathBuf, std::io::Error> {
        match crate::get_config_dir() {
            Ok(config_dir) => {
                if !config_dir.exists() {
                    std::fs::create_dir_all(&config_dir)?;
                }
                let config_file = config_dir.join("Loopsmith.toml");

                if !config_file.exists() {
                    std::fs::write(&config_file, DEFAULT_CONFIG)?;
                }

                Ok(config_file)
            }
            Err(e) => {
                eprintln!("Error: {e}");
                Err(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    "Unable to find the config directory for loopsmith.",
                ))
            }
        }
    }
}

fn log_level_to_string(level: log::LevelFilter) -> String {
    level.to_string()
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct PlaybackSettings {
    /// Default loop policy: `0` means infinite, matching [`LoopPolicy`]'s
    /// `maxIterations` encoding.
    #[serde(default = "default_max_iterations")]
    pub default_max_iterations: u32,
    /// Minimum interval, in milliseconds, between published position
    /// updates; see §4.8's "no faster than every 10 ms" requirement.
    #[serde(default = "default_position_update_interval_ms")]
    pub position_update_interval_ms: u64,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for PlaybackSettings {
    fn default() -> Self {
        Self {
            default_max_iterations: default_max_iterations(),
            position_update_interval_ms: default_position_update_interval_ms(),
            log_level: default_log_level(),
        }
    }
}

fn default_max_iterations() -> u32 {
    0
}

fn default_position_update_interval_ms() -> u64 {
    10
}

fn default_log_level() -> String {
    "info".to_owned()
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct AnalysisSettings {
    #[serde(default = "default_window_size")]
    pub window_size: usize,
    #[serde(default = "default_hop_size")]
    pub hop_size: usize,
    #[serde(default = "default_min_section_duration_secs")]
    pub min_section_duration_secs: f64,
}

impl Default for AnalysisSettings {
    fn default() -> Self {
        Self {
            window_size: default_window_size(),
            hop_size: default_hop_size(),
            min_section_duration_secs: default_min_section_duration_secs(),
        }
    }
}

fn default_window_size() -> usize {
    loopsmith_analysis::features::WINDOW_SIZE
}

fn default_hop_size() -> usize {
    loopsmith_analysis::features::HOP_SIZE
}

fn default_min_section_duration_secs() -> f64 {
    loopsmith_analysis::sections::MIN_SECTION_DURATION_SECS
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    fn write_config(contents: &str) -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Loopsmith.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        (dir, path)
    }

    #[test]
    fn loads_defaults_from_an_empty_file() {
        let (_dir, path) = write_config("");
        let settings = Settings::init(path, None).unwrap();
        assert_eq!(settings.playback.default_max_iterations, 0);
        assert_eq!(settings.analysis.window_size, 8192);
        assert_eq!(settings.analysis.hop_size, 4096);
    }

    #[test]
    fn overrides_playback_settings_from_file() {
        let (_dir, path) = write_config(
            "[playback]\ndefault_max_iterations = 5\nposition_update_interval_ms = 20\n",
        );
        let settings = Settings::init(path, None).unwrap();
        assert_eq!(settings.playback.default_max_iterations, 5);
        assert_eq!(settings.playback.position_update_interval_ms, 20);
    }

    #[test]
    fn log_level_override_takes_precedence() {
        let (_dir, path) = write_config("[playback]\nlog_level = \"warn\"\n");
        let settings = Settings::init(path, Some(log::LevelFilter::Debug)).unwrap();
        assert_eq!(settings.playback.log_level, "DEBUG");
    }
}
