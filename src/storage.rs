use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

use crate::models::{Settings, SettingsFile, Task, TasksFile};

pub const SCHEMA_VERSION: u32 = 1;

const DATA_FILE: &str = "data.json";
const SETTINGS_FILE: &str = "settings.json";
const BACKUP_DIR: &str = "backups";
const BACKUP_LIMIT: usize = 5;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Durable local mirror of the task collection plus the settings (theme) record.
#[derive(Debug, Clone)]
pub struct Storage {
    root: PathBuf,
}

impl Storage {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn ensure_dirs(&self) -> Result<(), StorageError> {
        fs::create_dir_all(self.root.join(BACKUP_DIR))?;
        Ok(())
    }

    pub fn load_tasks(&self) -> Result<TasksFile, StorageError> {
        self.load_json(self.root.join(DATA_FILE))
    }

    /// Missing or unreadable data is not fatal: the session starts from an empty collection.
    pub fn load_tasks_or_empty(&self) -> Vec<Task> {
        let path = self.root.join(DATA_FILE);
        if !path.exists() {
            return Vec::new();
        }
        match self.load_tasks() {
            Ok(file) => file.tasks,
            Err(error) => {
                log::warn!(
                    "local task store unreadable, starting empty path={} error={error}",
                    path.display()
                );
                Vec::new()
            }
        }
    }

    pub fn save_tasks(&self, tasks: &[Task], with_backup: bool) -> Result<(), StorageError> {
        let data = TasksFile {
            schema_version: SCHEMA_VERSION,
            tasks: tasks.to_vec(),
        };
        if with_backup {
            return self.write_with_backup(DATA_FILE, &data);
        }
        self.write_atomic(self.root.join(DATA_FILE), &data)
    }

    pub fn load_settings(&self) -> Result<Settings, StorageError> {
        let file: SettingsFile = self.load_json(self.root.join(SETTINGS_FILE))?;
        Ok(file.settings)
    }

    pub fn save_settings(&self, settings: &Settings) -> Result<(), StorageError> {
        let data = SettingsFile {
            schema_version: SCHEMA_VERSION,
            settings: settings.clone(),
        };
        self.write_atomic(self.root.join(SETTINGS_FILE), &data)
    }

    fn load_json<T: DeserializeOwned>(&self, path: PathBuf) -> Result<T, StorageError> {
        let mut file = File::open(path)?;
        let mut buf = String::new();
        file.read_to_string(&mut buf)?;
        Ok(serde_json::from_str(&buf)?)
    }

    fn write_with_backup<T: Serialize>(
        &self,
        filename: &str,
        data: &T,
    ) -> Result<(), StorageError> {
        let path = self.root.join(filename);
        if path.exists() {
            self.create_backup(&path)?;
        }
        self.write_atomic(path, data)
    }

    fn write_atomic<T: Serialize>(&self, path: PathBuf, data: &T) -> Result<(), StorageError> {
        let json = serde_json::to_vec_pretty(data)?;
        write_atomic_bytes(&path, &json)
    }

    pub fn create_backup(&self, path: &Path) -> Result<(), StorageError> {
        let timestamp = chrono::Local::now().format("%Y%m%d-%H%M%S%.3f").to_string();
        let backup_dir = self.root.join(BACKUP_DIR);
        fs::create_dir_all(&backup_dir)?;
        let mut backup_path = backup_dir.join(format!("data-{timestamp}.json"));
        let mut attempt = 1;
        while backup_path.exists() {
            backup_path = backup_dir.join(format!("data-{timestamp}-{attempt}.json"));
            attempt += 1;
        }
        fs::copy(path, backup_path)?;
        self.trim_backups()?;
        Ok(())
    }

    /// Backup names with their modification time in seconds, oldest first.
    pub fn list_backups(&self) -> Result<Vec<(String, i64)>, StorageError> {
        let dir = self.root.join(BACKUP_DIR);
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut results = Vec::new();
        for entry in sorted_entries(&dir)? {
            if let Some(name) = entry.file_name().to_str() {
                let modified = entry
                    .metadata()
                    .and_then(|m| m.modified())
                    .ok()
                    .and_then(|time| time.duration_since(std::time::UNIX_EPOCH).ok())
                    .map(|dur| dur.as_secs() as i64)
                    .unwrap_or(0);
                results.push((name.to_string(), modified));
            }
        }
        Ok(results)
    }

    pub fn restore_backup(&self, filename: &str) -> Result<Vec<Task>, StorageError> {
        let name = Path::new(filename)
            .file_name()
            .ok_or_else(|| std::io::Error::other(format!("invalid backup name: {filename}")))?;
        let path = self.root.join(BACKUP_DIR).join(name);
        let data: TasksFile = self.load_json(path)?;
        self.write_atomic(self.root.join(DATA_FILE), &data)?;
        Ok(data.tasks)
    }

    fn trim_backups(&self) -> Result<(), StorageError> {
        let entries = sorted_entries(&self.root.join(BACKUP_DIR))?;
        let to_remove = entries.len().saturating_sub(BACKUP_LIMIT);
        for entry in entries.into_iter().take(to_remove) {
            let _ = fs::remove_file(entry.path());
        }
        Ok(())
    }
}

fn sorted_entries(dir: &Path) -> Result<Vec<fs::DirEntry>, StorageError> {
    let mut entries: Vec<_> = fs::read_dir(dir)?.filter_map(|entry| entry.ok()).collect();
    entries.sort_by_key(|entry| {
        (
            entry.metadata().and_then(|m| m.modified()).ok(),
            entry.file_name(),
        )
    });
    Ok(entries)
}

pub(crate) fn write_atomic_bytes(path: &Path, bytes: &[u8]) -> Result<(), StorageError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let temp_path = path.with_extension("tmp");
    {
        let mut file = File::create(&temp_path)?;
        file.write_all(bytes)?;
        file.sync_all()?;
    }
    fs::rename(temp_path, path)?;
    Ok(())
}
