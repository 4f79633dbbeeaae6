//! Cloud side of the sync engine.
//!
//! [`RemoteStore`] is the transport seam (HTTP in production, in-process for embedding and
//! tests). [`channel::RemoteChannel`] sits on top of it and provides the live subscription,
//! the write outbox and the connectivity signal.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;

use crate::models::{Identity, Task, TaskPatch, Timestamp};

pub mod channel;
pub mod http;
pub mod memory;

pub use channel::{PendingWrite, RemoteChannel, SnapshotEvent, Subscription};

#[derive(Debug, Clone, Error, PartialEq)]
pub enum RemoteError {
    /// No connectivity; writes hitting this are retried by the outbox.
    #[error("offline: {0}")]
    Offline(String),
    #[error("rejected by remote store ({status}): {message}")]
    Rejected { status: u16, message: String },
    #[error("task not found on remote store: {0}")]
    NotFound(String),
    #[error("invalid response from remote store: {0}")]
    Decode(String),
    #[error("remote channel closed")]
    Closed,
    #[error("remote client setup failed: {0}")]
    Setup(String),
}

impl RemoteError {
    pub fn is_offline(&self) -> bool {
        matches!(self, RemoteError::Offline(_))
    }
}

/// Live feed of complete collection snapshots. An `Err` item ends the feed.
pub type SnapshotFeed = mpsc::UnboundedReceiver<Result<Vec<Task>, RemoteError>>;

#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// One-shot read of the user's whole collection.
    async fn fetch(&self, user: &Identity) -> Result<Vec<Task>, RemoteError>;

    /// Opens a standing feed. The first item is the current collection.
    async fn listen(&self, user: &Identity) -> Result<SnapshotFeed, RemoteError>;

    /// Stores `task` and returns the id the remote store assigned.
    async fn create(&self, user: &Identity, task: Task) -> Result<String, RemoteError>;

    /// Applies `patch`; `updated_at` is the write-time stamp chosen by the channel.
    async fn update(
        &self,
        user: &Identity,
        id: &str,
        patch: TaskPatch,
        updated_at: Timestamp,
    ) -> Result<(), RemoteError>;

    async fn delete(&self, user: &Identity, id: &str) -> Result<(), RemoteError>;

    fn is_online(&self) -> bool;
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    Offline,
    Syncing,
    Online,
}

/// Remote collections are always presented newest first.
pub(crate) fn order_snapshot(mut tasks: Vec<Task>) -> Vec<Task> {
    tasks.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    tasks
}
