//! Task list engine with two regimes: a local-first store backed by JSON files, and a cloud
//! regime that mirrors a per-user remote collection through a live subscription.
//!
//! [`TaskController`] is the entry point. Presentation layers read [`StatePayload`]s from
//! [`TaskController::watch`] and call into [`commands`].

pub mod backend;
pub mod commands;
pub mod config;
pub mod error;
pub mod events;
pub mod logging;
pub mod models;
pub mod query;
pub mod remote;
pub mod state;
pub mod storage;
pub mod transfer;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

pub use crate::config::AppConfig;
pub use crate::error::{Result, TaskError};
pub use crate::events::StatePayload;
pub use crate::models::{Due, Identity, Priority, Regime, Status, Task, TaskDraft, TaskPatch};
pub use crate::query::{SortDirection, SortKey, TaskQuery, TaskStats};
pub use crate::remote::{RemoteChannel, RemoteError, RemoteStore, SyncStatus};
pub use crate::state::{TaskController, WriteReceipt};
pub use crate::storage::Storage;

use crate::remote::http::HttpRemoteStore;

/// Builds a controller for `config`. When a remote store is configured the HTTP transport is
/// wired in, which spawns background tasks: call this from inside a tokio runtime.
pub fn bootstrap(config: &AppConfig) -> Result<TaskController> {
    let storage = config.storage();
    storage.ensure_dirs()?;

    let channel = match config.remote() {
        Some(remote) => {
            let store = HttpRemoteStore::new(remote).map_err(TaskError::RemoteSetup)?;
            log::info!("remote store configured base_url={}", remote.base_url);
            Some(RemoteChannel::new(
                Arc::new(store),
                Duration::from_millis(remote.retry_interval_ms.max(1)),
            ))
        }
        None => {
            log::info!("no remote store configured; cloud sign-in is unavailable");
            None
        }
    };
    TaskController::new(storage, channel)
}

/// Logging, configuration and controller in one call.
pub fn start(data_dir: &Path) -> Result<TaskController> {
    if let Err(error) = logging::init_logging(data_dir) {
        eprintln!("failed to initialize logging: {error}");
    }
    let config = AppConfig::load(data_dir);
    bootstrap(&config)
}
