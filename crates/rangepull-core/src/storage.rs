//! Storage layer for persistent settings

use crate::error::RangepullError;
use directories::ProjectDirs;
use rangepull_types::Settings;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, warn};

const SETTINGS_FILE: &str = "settings.json";

/// Per-user data directory, `./.rangepull` when the platform has none
pub fn default_data_dir() -> PathBuf {
    ProjectDirs::from("", "", "rangepull")
        .map(|dirs| dirs.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from(".rangepull"))
}

/// Storage manager for rangepull data
#[derive(Debug, Clone)]
pub struct Storage {
    data_dir: PathBuf,
}

impl Storage {
    /// Create a new storage instance, creating the directory if needed
    pub async fn new(data_dir: PathBuf) -> Result<Self, RangepullError> {
        fs::create_dir_all(&data_dir).await?;
        Ok(Self { data_dir })
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn settings_path(&self) -> PathBuf {
        self.data_dir.join(SETTINGS_FILE)
    }

    /// Load settings, falling back to defaults when none were saved.
    ///
    /// A corrupt file is reported and replaced by defaults in memory only.
    pub async fn load_settings(&self) -> Result<Settings, RangepullError> {
        let path = self.settings_path();

        let content = match fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No settings at {:?}, using defaults", path);
                return Ok(Settings::default());
            }
            Err(e) => return Err(e.into()),
        };

        match serde_json::from_str::<Settings>(&content) {
            Ok(settings) => Ok(settings),
            Err(e) => {
                warn!("Ignoring unreadable settings {:?}: {}", path, e);
                Ok(Settings::default())
            }
        }
    }

    /// Validate and persist settings
    pub async fn save_settings(&self, settings: &Settings) -> Result<(), RangepullError> {
        settings.validate().map_err(RangepullError::InvalidOperation)?;

        let content = serde_json::to_string_pretty(settings)?;
        fs::write(self.settings_path(), content).await?;

        debug!("Saved settings to {:?}", self.settings_path());
        Ok(())
    }

    /// Remove saved settings so defaults apply again
    pub async fn reset_settings(&self) -> Result<(), RangepullError> {
        match fs::remove_file(self.settings_path()).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
