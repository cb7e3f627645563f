//! Last-used stream settings
//!
//! Stored as a flat JSON document next to the config file. The store never
//! fails outward: a missing or unreadable file means "nothing saved", and a
//! failed write is logged and leaves the previous file in place.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::encoder::StreamConfig;

const SETTINGS_FILE_NAME: &str = "settings.json";

/// Values remembered from the last successful start
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SavedSettings {
    #[serde(default)]
    pub device: Option<String>,
    #[serde(default)]
    pub fps: Option<u32>,
    #[serde(default)]
    pub bitrate_kbps: Option<u32>,
    #[serde(default)]
    pub auth: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    /// Kept for the operator; not sent to the encoder
    #[serde(default)]
    pub team: Option<String>,
    /// Kept for the operator; not sent to the encoder
    #[serde(default)]
    pub nickname: Option<String>,
    #[serde(default)]
    pub saved_at: Option<DateTime<Utc>>,
}

impl SavedSettings {
    /// Snapshot of a stream configuration plus the operator fields
    pub fn from_stream(config: &StreamConfig, team: Option<String>, nickname: Option<String>) -> Self {
        Self {
            device: Some(config.device.clone()),
            fps: Some(config.fps),
            bitrate_kbps: Some(config.bitrate_kbps),
            auth: Some(config.auth.clone()),
            url: Some(config.url.clone()),
            team,
            nickname,
            saved_at: Some(Utc::now()),
        }
    }
}

/// Reads and writes [`SavedSettings`] at a fixed path
#[derive(Debug, Clone)]
pub struct SettingsStore {
    path: PathBuf,
}

impl SettingsStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Store in the platform config directory
    pub fn default_location() -> Result<Self> {
        let dirs = crate::config::project_dirs()?;
        Ok(Self::new(dirs.config_dir().join(SETTINGS_FILE_NAME)))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load saved settings; any failure yields empty settings
    pub fn load(&self) -> SavedSettings {
        let contents = match std::fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) => {
                debug!("No saved settings at {:?}: {}", self.path, e);
                return SavedSettings::default();
            }
        };

        match serde_json::from_str(&contents) {
            Ok(settings) => {
                debug!("Loaded saved settings from {:?}", self.path);
                settings
            }
            Err(e) => {
                warn!("Ignoring unreadable settings file {:?}: {}", self.path, e);
                SavedSettings::default()
            }
        }
    }

    /// Save settings, logging instead of failing
    pub fn save(&self, settings: &SavedSettings) {
        match self.try_save(settings) {
            Ok(()) => debug!("Saved settings to {:?}", self.path),
            Err(e) => warn!("Failed to save settings: {:#}", e),
        }
    }

    /// Write to a sibling temp file, then rename over the old one
    fn try_save(&self, settings: &SavedSettings) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create settings directory: {:?}", parent))?;
        }

        let contents =
            serde_json::to_string_pretty(settings).context("Failed to serialize settings")?;

        let tmp_path = self.path.with_extension("json.tmp");
        std::fs::write(&tmp_path, contents)
            .with_context(|| format!("Failed to write settings file: {:?}", tmp_path))?;
        std::fs::rename(&tmp_path, &self.path)
            .with_context(|| format!("Failed to replace settings file: {:?}", self.path))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_stream() -> StreamConfig {
        StreamConfig {
            device: "DroidCam Source 3".to_string(),
            fps: 30,
            bitrate_kbps: 2500,
            auth: "hunter2".to_string(),
            url: "https://example.org/ingest".to_string(),
        }
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = SettingsStore::new(dir.path().join("settings.json"));

        let settings = SavedSettings::from_stream(
            &sample_stream(),
            Some("red".to_string()),
            Some("player1".to_string()),
        );
        store.save(&settings);

        assert_eq!(store.load(), settings);
        assert!(!store.path().with_extension("json.tmp").exists());
    }

    #[test]
    fn test_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = SettingsStore::new(dir.path().join("missing.json"));
        assert_eq!(store.load(), SavedSettings::default());
    }

    #[test]
    fn test_corrupt_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert_eq!(SettingsStore::new(path).load(), SavedSettings::default());
    }

    #[test]
    fn test_partial_document_is_accepted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"url": "http://host/stream", "fps": 15}"#).unwrap();

        let settings = SettingsStore::new(path).load();
        assert_eq!(settings.url.as_deref(), Some("http://host/stream"));
        assert_eq!(settings.fps, Some(15));
        assert_eq!(settings.device, None);
    }

    #[test]
    fn test_failed_save_keeps_previous_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        let store = SettingsStore::new(&path);

        let first = SavedSettings::from_stream(&sample_stream(), None, None);
        store.save(&first);

        // A directory where the temp file should go makes the write fail
        std::fs::create_dir(path.with_extension("json.tmp")).unwrap();
        let mut second = first.clone();
        second.fps = Some(60);
        store.save(&second);

        assert_eq!(store.load(), first);
    }
}
