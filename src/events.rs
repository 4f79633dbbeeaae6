use crate::models::{Regime, Task};
use crate::query::{TaskQuery, TaskStats};
use crate::remote::SyncStatus;

/// Everything a view needs to render, recomputed after every state change.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct StatePayload {
    pub regime: Regime,
    pub identity: Option<String>,
    /// Filtered and sorted.
    pub tasks: Vec<Task>,
    /// Over the full collection.
    pub stats: TaskStats,
    pub query: TaskQuery,
    pub sync_status: Option<SyncStatus>,
    pub last_error: Option<String>,
}

impl Default for StatePayload {
    fn default() -> Self {
        Self {
            regime: Regime::Local,
            identity: None,
            tasks: Vec::new(),
            stats: TaskStats::default(),
            query: TaskQuery::default(),
            sync_status: None,
            last_error: None,
        }
    }
}
