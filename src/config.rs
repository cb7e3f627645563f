//! Configuration management for tscast

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::supervisor::{FrameThreshold, ReconnectPolicy, DEFAULT_CONNECT_FRAME_THRESHOLD};

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Encoder binary settings
    #[serde(default)]
    pub encoder: EncoderConfig,

    /// Supervision and reconnect settings
    #[serde(default)]
    pub supervisor: SupervisorConfig,

    /// Logging settings
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Path to config file (not serialized)
    #[serde(skip)]
    config_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncoderConfig {
    /// ffmpeg executable, looked up on PATH when not absolute
    #[serde(default = "default_ffmpeg_path")]
    pub ffmpeg_path: PathBuf,

    /// Upper bound for the device probe (ms)
    #[serde(default = "default_probe_timeout")]
    pub probe_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupervisorConfig {
    /// Delay before an automatic reconnect (ms)
    #[serde(default = "default_reconnect_delay")]
    pub reconnect_delay_ms: u64,

    /// Consecutive automatic reconnects before giving up
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,

    /// Frame count that must be exceeded before a stream counts as connected
    #[serde(default = "default_connect_frame_threshold")]
    pub connect_frame_threshold: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Also write logs to a daily rolling file
    #[serde(default = "default_true")]
    pub file_logging: bool,
}

// Default value functions
fn default_ffmpeg_path() -> PathBuf {
    PathBuf::from("ffmpeg")
}

fn default_probe_timeout() -> u64 {
    10_000
}

fn default_reconnect_delay() -> u64 {
    2_000
}

fn default_max_reconnect_attempts() -> u32 {
    3
}

fn default_connect_frame_threshold() -> u64 {
    DEFAULT_CONNECT_FRAME_THRESHOLD
}

fn default_true() -> bool {
    true
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: default_ffmpeg_path(),
            probe_timeout_ms: default_probe_timeout(),
        }
    }
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            reconnect_delay_ms: default_reconnect_delay(),
            max_reconnect_attempts: default_max_reconnect_attempts(),
            connect_frame_threshold: default_connect_frame_threshold(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            file_logging: default_true(),
        }
    }
}

impl Config {
    /// Load configuration from default location or create default
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::default_config_path()?)
    }

    /// Load configuration from `config_path`, writing defaults if it is missing
    pub fn load_from(config_path: &Path) -> Result<Self> {
        if config_path.exists() {
            let contents = std::fs::read_to_string(config_path)
                .with_context(|| format!("Failed to read config file: {:?}", config_path))?;

            let mut config: Config = toml::from_str(&contents)
                .with_context(|| format!("Failed to parse config file: {:?}", config_path))?;

            config.config_path = Some(config_path.to_path_buf());
            Ok(config)
        } else {
            let config = Config {
                config_path: Some(config_path.to_path_buf()),
                ..Config::default()
            };
            config.save()?;
            Ok(config)
        }
    }

    /// Save configuration to file
    pub fn save(&self) -> Result<()> {
        let config_path = self.config_path()?;

        // Ensure parent directory exists
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
        }

        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;

        std::fs::write(&config_path, contents)
            .with_context(|| format!("Failed to write config file: {:?}", config_path))?;

        Ok(())
    }

    /// Get the config file path
    pub fn config_path(&self) -> Result<PathBuf> {
        match &self.config_path {
            Some(path) => Ok(path.clone()),
            None => Self::default_config_path(),
        }
    }

    /// Get default config path
    fn default_config_path() -> Result<PathBuf> {
        Ok(project_dirs()?.config_dir().join("config.toml"))
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.encoder.probe_timeout_ms)
    }

    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        ReconnectPolicy::new(
            Duration::from_millis(self.supervisor.reconnect_delay_ms),
            self.supervisor.max_reconnect_attempts,
        )
    }

    pub fn connect_policy(&self) -> FrameThreshold {
        FrameThreshold::new(self.supervisor.connect_frame_threshold)
    }
}

/// Platform directories for tscast
pub fn project_dirs() -> Result<directories::ProjectDirs> {
    directories::ProjectDirs::from("dev", "tscast", "tscast")
        .context("Failed to determine project directories")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.encoder.ffmpeg_path, PathBuf::from("ffmpeg"));
        assert_eq!(config.probe_timeout(), Duration::from_secs(10));

        let policy = config.reconnect_policy();
        assert_eq!(policy.delay(), Duration::from_millis(2000));
        assert_eq!(policy.max_attempts(), 3);
        assert!(config.logging.file_logging);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config: Config = toml::from_str(
            "[supervisor]\nreconnect_delay_ms = 500\n\n[encoder]\nffmpeg_path = \"C:/ffmpeg/ffmpeg.exe\"\n",
        )
        .unwrap();

        assert_eq!(config.supervisor.reconnect_delay_ms, 500);
        assert_eq!(config.supervisor.max_reconnect_attempts, 3);
        assert_eq!(config.supervisor.connect_frame_threshold, 50);
        assert_eq!(config.encoder.ffmpeg_path, PathBuf::from("C:/ffmpeg/ffmpeg.exe"));
        assert_eq!(config.encoder.probe_timeout_ms, 10_000);
    }

    #[test]
    fn test_load_from_creates_default_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let config = Config::load_from(&path).unwrap();
        assert!(path.exists());
        assert_eq!(config.config_path().unwrap(), path);

        let reloaded = Config::load_from(&path).unwrap();
        assert_eq!(reloaded.supervisor.max_reconnect_attempts, 3);
    }

    #[test]
    fn test_load_from_rejects_invalid_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[supervisor\nreconnect_delay_ms = ").unwrap();
        assert!(Config::load_from(&path).is_err());
    }
}
