use std::path::{Path, PathBuf};

use crate::models::{RemoteSettings, Settings};
use crate::storage::{Storage, StorageError};

pub const REMOTE_URL_ENV: &str = "TODO_SYNC_REMOTE_URL";
pub const REMOTE_TOKEN_ENV: &str = "TODO_SYNC_REMOTE_TOKEN";

/// Resolved startup configuration: the data directory plus `settings.json` with
/// environment overrides applied.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub data_dir: PathBuf,
    pub settings: Settings,
}

impl AppConfig {
    pub fn load(data_dir: &Path) -> Self {
        let storage = Storage::new(data_dir.to_path_buf());
        let settings = match storage.load_settings() {
            Ok(settings) => settings,
            Err(StorageError::Io(io)) if io.kind() == std::io::ErrorKind::NotFound => {
                Settings::default()
            }
            Err(error) => {
                log::warn!("settings unreadable, using defaults error={error}");
                Settings::default()
            }
        };
        let settings = apply_remote_overrides(
            settings,
            std::env::var(REMOTE_URL_ENV).ok(),
            std::env::var(REMOTE_TOKEN_ENV).ok(),
        );
        Self {
            data_dir: data_dir.to_path_buf(),
            settings,
        }
    }

    pub fn remote(&self) -> Option<&RemoteSettings> {
        self.settings.remote.as_ref()
    }

    pub fn storage(&self) -> Storage {
        Storage::new(self.data_dir.clone())
    }

    pub fn save(&self) -> Result<(), StorageError> {
        let storage = self.storage();
        storage.ensure_dirs()?;
        storage.save_settings(&self.settings)
    }
}

/// A non-blank URL override enables (or repoints) the remote store; a token override only
/// applies when a remote store is configured.
pub fn apply_remote_overrides(
    mut settings: Settings,
    url: Option<String>,
    token: Option<String>,
) -> Settings {
    if let Some(url) = url.map(|u| u.trim().to_string()).filter(|u| !u.is_empty()) {
        match settings.remote.as_mut() {
            Some(remote) => remote.base_url = url,
            None => settings.remote = Some(RemoteSettings::new(url)),
        }
    }
    if let Some(token) = token.map(|t| t.trim().to_string()).filter(|t| !t.is_empty()) {
        if let Some(remote) = settings.remote.as_mut() {
            remote.api_token = Some(token);
        }
    }
    settings
}
