//! Engine settings
//!
//! Settings are read from `<config dir>/controlmapper/engine.toml`. A missing
//! file is not an error: the defaults are written out and used, so the engine
//! always starts with a usable configuration.

use std::fmt;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::{debug, info, warn};

use crate::mapping::CombinePolicy;

const CONFIG_DIR: &str = "controlmapper";
const CONFIG_FILE: &str = "engine.toml";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to access config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Invalid config value: {0}")]
    Invalid(String),

    #[error("No user config directory available on this system")]
    NoConfigDir,
}

/// Which virtual device implementation the output sink talks to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputBackend {
    /// Kernel uinput devices (Linux)
    Uinput,
    /// Target devices created by the InputPlumber daemon over D-Bus (Linux)
    InputPlumber,
    /// In-memory recorder, nothing reaches the OS
    Recording,
}

impl fmt::Display for OutputBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputBackend::Uinput => write!(f, "uinput"),
            OutputBackend::InputPlumber => write!(f, "input_plumber"),
            OutputBackend::Recording => write!(f, "recording"),
        }
    }
}

impl FromStr for OutputBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "uinput" => Ok(OutputBackend::Uinput),
            "input_plumber" | "inputplumber" => Ok(OutputBackend::InputPlumber),
            "recording" | "dry_run" => Ok(OutputBackend::Recording),
            other => Err(format!("unknown output backend '{}'", other)),
        }
    }
}

/// Engine settings
///
/// # Examples
///
/// ```rust
/// use controlmapper::config::EngineConfig;
///
/// let config: EngineConfig = toml::from_str("tick_interval_ms = 5").unwrap();
/// assert_eq!(config.tick_interval_ms, 5);
/// assert_eq!(config.poll_timeout_ms, 4);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Scheduler period in milliseconds
    pub tick_interval_ms: u64,

    /// Upper bound for a single device poll
    pub poll_timeout_ms: u64,

    /// First retry delay after a device failed to open
    pub open_retry_initial_ms: u64,

    /// Retry delays double up to this value
    pub open_retry_max_ms: u64,

    /// How analog contributions to the same virtual axis are combined
    pub analog_combine: CombinePolicy,

    pub output_backend: OutputBackend,

    /// Prefix for the names of created virtual devices
    pub virtual_device_name: String,

    /// Capacity of the engine event broadcast channel
    pub event_capacity: usize,

    /// Capacity of the control request queue
    pub command_capacity: usize,

    /// Ask the desktop screen saver to stay off while the engine runs
    pub inhibit_screensaver: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 10,
            poll_timeout_ms: 4,
            open_retry_initial_ms: 250,
            open_retry_max_ms: 5000,
            analog_combine: CombinePolicy::SumClamp,
            output_backend: OutputBackend::Uinput,
            virtual_device_name: "controlmapper".to_string(),
            event_capacity: 256,
            command_capacity: 64,
            inhibit_screensaver: false,
        }
    }
}

impl EngineConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }

    pub fn open_retry_initial(&self) -> Duration {
        Duration::from_millis(self.open_retry_initial_ms)
    }

    pub fn open_retry_max(&self) -> Duration {
        Duration::from_millis(self.open_retry_max_ms)
    }

    /// Location of the settings file in the user's config directory
    pub fn default_path() -> Result<PathBuf, ConfigError> {
        let mut path = dirs::config_dir().ok_or(ConfigError::NoConfigDir)?;
        path.push(CONFIG_DIR);
        path.push(CONFIG_FILE);
        Ok(path)
    }

    /// Rejects values the scheduler cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tick_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "tick_interval_ms must be greater than 0".into(),
            ));
        }
        if self.poll_timeout_ms > self.tick_interval_ms {
            return Err(ConfigError::Invalid(format!(
                "poll_timeout_ms ({}) must not exceed tick_interval_ms ({})",
                self.poll_timeout_ms, self.tick_interval_ms
            )));
        }
        if self.open_retry_initial_ms == 0 || self.open_retry_max_ms < self.open_retry_initial_ms
        {
            return Err(ConfigError::Invalid(format!(
                "open retry delays must satisfy 0 < initial ({}) <= max ({})",
                self.open_retry_initial_ms, self.open_retry_max_ms
            )));
        }
        if self.event_capacity == 0 || self.command_capacity == 0 {
            return Err(ConfigError::Invalid(
                "channel capacities must be greater than 0".into(),
            ));
        }
        if self.virtual_device_name.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "virtual_device_name must not be empty".into(),
            ));
        }
        Ok(())
    }

    pub async fn load(path: &Path) -> Result<Self, ConfigError> {
        debug!("Loading engine config from {}", path.display());
        let content = fs::read_to_string(path)
            .await
            .map_err(|source| ConfigError::Io {
                path: path.to_path_buf(),
                source,
            })?;
        Self::parse(&content)
    }

    fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: EngineConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads the file at `path`, writing the defaults there first if it does not exist
    pub async fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        match fs::read_to_string(path).await {
            Ok(content) => {
                debug!("Loading engine config from {}", path.display());
                return Self::parse(&content);
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(source) => {
                return Err(ConfigError::Io {
                    path: path.to_path_buf(),
                    source,
                })
            }
        }

        warn!(
            "No engine config at {}, writing defaults",
            path.display()
        );
        let config = EngineConfig::default();
        config.save(path).await?;
        Ok(config)
    }

    pub async fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|source| ConfigError::Io {
                    path: parent.to_path_buf(),
                    source,
                })?;
        }
        let content = toml::to_string_pretty(self)?;
        fs::write(path, content)
            .await
            .map_err(|source| ConfigError::Io {
                path: path.to_path_buf(),
                source,
            })?;
        info!("Engine config written to {}", path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert!(EngineConfig::default().validate().is_ok());
    }

    #[test]
    fn partial_file_falls_back_to_defaults() {
        let config: EngineConfig =
            toml::from_str("analog_combine = \"max_magnitude\"\noutput_backend = \"recording\"")
                .unwrap();
        assert_eq!(config.analog_combine, CombinePolicy::MaxMagnitude);
        assert_eq!(config.output_backend, OutputBackend::Recording);
        assert_eq!(config.tick_interval_ms, 10);
    }

    #[test]
    fn poll_timeout_longer_than_tick_is_rejected() {
        let config = EngineConfig {
            tick_interval_ms: 5,
            poll_timeout_ms: 8,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[tokio::test]
    async fn missing_file_is_created_with_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("engine.toml");

        let config = EngineConfig::load_or_default(&path).await.unwrap();
        assert_eq!(config, EngineConfig::default());
        assert!(path.exists());

        let reloaded = EngineConfig::load(&path).await.unwrap();
        assert_eq!(reloaded, config);
    }

    #[tokio::test]
    async fn existing_file_is_loaded_not_overwritten() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.toml");
        let content = "tick_interval_ms = 4\npoll_timeout_ms = 2\ninhibit_screensaver = false\n";
        tokio::fs::write(&path, content).await.unwrap();

        let config = EngineConfig::load_or_default(&path).await.unwrap();
        assert_eq!(config.tick_interval_ms, 4);
        assert!(!config.inhibit_screensaver);
        let written = tokio::fs::read_to_string(&path).await.unwrap();
        assert_eq!(written, content);
    }

    #[tokio::test]
    async fn invalid_file_is_an_error_not_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.toml");
        tokio::fs::write(&path, "tick_interval_ms = 0\n").await.unwrap();

        assert!(matches!(
            EngineConfig::load_or_default(&path).await,
            Err(ConfigError::Invalid(_))
        ));
        let content = tokio::fs::read_to_string(&path).await.unwrap();
        assert_eq!(content, "tick_interval_ms = 0\n");
    }

    #[test]
    fn backend_names_parse() {
        assert_eq!("uinput".parse::<OutputBackend>(), Ok(OutputBackend::Uinput));
        assert_eq!(
            "input-plumber".parse::<OutputBackend>(),
            Ok(OutputBackend::InputPlumber)
        );
        assert!("vjoy".parse::<OutputBackend>().is_err());
    }
}
