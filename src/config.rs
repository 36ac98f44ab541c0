//! Configuration for the NotPortable agent.

use crate::parser::Game;
use crate::sensor::baseline::{DEFAULT_CHECK_INTERVAL, DEFAULT_THRESHOLD};
use crate::sensor::SensorKind;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Main configuration for the agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Player name used when a log format carries none
    pub player: String,

    /// Base URL of the score collector
    pub collector_url: String,

    /// How often score logs are checked for changes
    #[serde(with = "duration_secs")]
    pub poll_interval: Duration,

    /// Sensor and anomaly detection settings
    pub sensor: SensorConfig,

    /// Score log locations
    pub logs: LogPaths,

    /// Path for stats and the session journal
    pub data_path: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("notportable-agent");

        Self {
            player: whoami_fallback(),
            collector_url: "http://127.0.0.1:5000".to_string(),
            poll_interval: Duration::from_secs(10),
            sensor: SensorConfig::default(),
            logs: LogPaths::default(),
            data_path: data_dir,
        }
    }
}

impl Config {
    /// Load configuration from the default location.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::config_path())
    }

    /// Load configuration from an explicit file, falling back to defaults
    /// when it does not exist.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        let config = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to the default location.
    pub fn save(&self) -> Result<(), ConfigError> {
        self.save_to(&Self::config_path())
    }

    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Get the path to the configuration file.
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("notportable-agent")
            .join("config.json")
    }

    /// Ensure all required directories exist.
    pub fn ensure_directories(&self) -> Result<(), ConfigError> {
        std::fs::create_dir_all(&self.data_path)?;
        Ok(())
    }

    pub fn stats_path(&self) -> PathBuf {
        self.data_path.join("dispatch_stats.json")
    }

    pub fn journal_path(&self) -> PathBuf {
        self.data_path.join("sessions.log")
    }
}

/// Sensor selection and detection tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SensorConfig {
    pub kind: SensorKind,
    pub trigger_pin: u32,
    pub echo_pin: u32,
    pub i2c_address: u16,

    /// Deviation from the baseline that counts as an anomaly
    pub threshold: f64,

    /// Minimum time between two deviation checks
    #[serde(with = "duration_secs")]
    pub check_interval: Duration,

    /// Scheduling period of the sampling loop
    #[serde(with = "duration_millis")]
    pub tick: Duration,
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            kind: SensorKind::Rangefinder,
            trigger_pin: 23,
            echo_pin: 24,
            i2c_address: crate::sensor::accelerometer::DEFAULT_ADDRESS,
            threshold: DEFAULT_THRESHOLD,
            check_interval: DEFAULT_CHECK_INTERVAL,
            tick: Duration::from_millis(200),
        }
    }
}

/// Per-game score log locations.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogPaths {
    pub neverball: PathBuf,
    pub supertux: PathBuf,
    pub etr: PathBuf,
}

impl Default for LogPaths {
    fn default() -> Self {
        let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
        Self {
            neverball: home.join(".neverball/game_log.txt"),
            supertux: home.join(".local/share/supertux2/profile/game_log.txt"),
            etr: home.join(".config/etr/game_log.txt"),
        }
    }
}

impl LogPaths {
    pub fn get(&self, game: Game) -> &Path {
        match game {
            Game::Neverball => &self.neverball,
            Game::SuperTux => &self.supertux,
            Game::ExtremeTuxRacer => &self.etr,
        }
    }

    /// All `(game, path)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (Game, PathBuf)> + '_ {
        Game::ALL
            .into_iter()
            .map(move |game| (game, self.get(game).to_path_buf()))
    }
}

fn whoami_fallback() -> String {
    std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_else(|_| "player".to_string())
}

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Parse error: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Serde support for Duration as whole seconds.
mod duration_secs {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_secs().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

/// Serde support for Duration as milliseconds.
mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (duration.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
