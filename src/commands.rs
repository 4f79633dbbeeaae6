//! Shell-facing operations. Every command flattens its outcome into a [`CommandResult`] so a
//! UI layer can forward it without knowing the error types underneath.

use std::path::Path;

use crate::error::TaskError;
use crate::events::StatePayload;
use crate::models::{Identity, Task, TaskDraft, TaskPatch};
use crate::query::TaskQuery;
use crate::state::{TaskController, WriteReceipt};

#[derive(Debug, serde::Serialize)]
pub struct CommandResult<T> {
    pub ok: bool,
    pub data: Option<T>,
    pub error: Option<String>,
}

fn ok<T>(data: T) -> CommandResult<T> {
    CommandResult {
        ok: true,
        data: Some(data),
        error: None,
    }
}

fn err<T>(message: &str) -> CommandResult<T> {
    CommandResult {
        ok: false,
        data: None,
        error: Some(message.to_string()),
    }
}

fn failed<T>(error: TaskError) -> CommandResult<T> {
    log::warn!("command failed: {error}");
    err(&error.to_string())
}

async fn settle(receipt: WriteReceipt) -> Result<Vec<String>, TaskError> {
    receipt.acknowledged().await
}

fn validate_title(title: &str) -> Option<String> {
    let title = title.trim();
    if title.is_empty() {
        None
    } else {
        Some(title.to_string())
    }
}

#[derive(Debug, serde::Serialize)]
pub struct BackupEntry {
    pub name: String,
    pub modified_at: i64,
}

pub fn load_state(controller: &TaskController) -> CommandResult<StatePayload> {
    ok(controller.snapshot())
}

/// Returns the id of the new task. In the cloud regime this waits for the remote store to
/// assign it.
pub async fn create_task(controller: &TaskController, mut draft: TaskDraft) -> CommandResult<String> {
    let Some(title) = validate_title(&draft.title) else {
        return err("title is required");
    };
    draft.title = title;

    let receipt = match controller.create(draft) {
        Ok(receipt) => receipt,
        Err(error) => return failed(error),
    };
    if receipt.is_applied() {
        return match receipt.created_id() {
            Some(id) => ok(id.to_string()),
            None => err("created task is missing"),
        };
    }
    match settle(receipt).await {
        Ok(ids) => match ids.into_iter().next() {
            Some(id) => ok(id),
            None => err("remote store returned no id"),
        },
        Err(error) => failed(error),
    }
}

pub async fn update_task(
    controller: &TaskController,
    id: &str,
    mut patch: TaskPatch,
) -> CommandResult<bool> {
    if let Some(title) = patch.title.take() {
        match validate_title(&title) {
            Some(title) => patch.title = Some(title),
            None => return err("title is required"),
        }
    }
    match controller.update(id, patch) {
        Ok(receipt) => match settle(receipt).await {
            Ok(_) => ok(true),
            Err(error) => failed(error),
        },
        Err(error) => failed(error),
    }
}

pub async fn delete_task(controller: &TaskController, id: &str) -> CommandResult<bool> {
    match controller.remove(id) {
        Ok(receipt) => match settle(receipt).await {
            Ok(_) => ok(true),
            Err(error) => failed(error),
        },
        Err(error) => failed(error),
    }
}

/// `data` is `false` when the task is not in the current collection.
pub async fn toggle_task(controller: &TaskController, id: &str) -> CommandResult<bool> {
    match controller.toggle_status(id) {
        Ok(None) => ok(false),
        Ok(Some(receipt)) => match settle(receipt).await {
            Ok(_) => ok(true),
            Err(error) => failed(error),
        },
        Err(error) => failed(error),
    }
}

pub fn set_query(controller: &TaskController, query: TaskQuery) -> CommandResult<StatePayload> {
    controller.set_query(query);
    ok(controller.snapshot())
}

pub fn sign_in(controller: &TaskController, user_id: &str) -> CommandResult<StatePayload> {
    let Some(identity) = Identity::new(user_id) else {
        return failed(TaskError::InvalidIdentity);
    };
    match controller.set_identity(Some(identity)) {
        Ok(()) => ok(controller.snapshot()),
        Err(error) => failed(error),
    }
}

pub fn sign_out(controller: &TaskController) -> CommandResult<StatePayload> {
    match controller.set_identity(None) {
        Ok(()) => ok(controller.snapshot()),
        Err(error) => failed(error),
    }
}

/// Reopens the live feed after it degraded to a one-shot snapshot.
pub fn resubscribe(controller: &TaskController) -> CommandResult<StatePayload> {
    match controller.resubscribe() {
        Ok(()) => ok(controller.snapshot()),
        Err(error) => failed(error),
    }
}

/// Returns how many records were imported.
pub async fn import_tasks(controller: &TaskController, path: &Path) -> CommandResult<usize> {
    let batch = match crate::transfer::read_import(path, crate::models::now_millis()) {
        Ok(batch) => batch,
        Err(error) => return failed(error),
    };
    let count = batch.tasks.len();
    match controller.import(batch.tasks) {
        Ok(receipt) => match settle(receipt).await {
            Ok(_) => ok(count),
            Err(error) => failed(error),
        },
        Err(error) => failed(error),
    }
}

/// Writes the full collection under `dir/exports/` (the data directory when `dir` is `None`)
/// and returns the file path.
pub fn export_tasks(controller: &TaskController, dir: Option<&Path>) -> CommandResult<String> {
    let dir = dir.unwrap_or_else(|| controller.storage().root());
    match controller.export(dir) {
        Ok(path) => ok(path.to_string_lossy().to_string()),
        Err(error) => failed(error),
    }
}

pub fn list_backups(controller: &TaskController) -> CommandResult<Vec<BackupEntry>> {
    match controller.storage().list_backups() {
        Ok(list) => ok(list
            .into_iter()
            .map(|(name, modified_at)| BackupEntry { name, modified_at })
            .collect()),
        Err(error) => err(&format!("storage error: {error}")),
    }
}

pub fn restore_backup(controller: &TaskController, filename: &str) -> CommandResult<Vec<Task>> {
    match controller.restore_backup(filename) {
        Ok(tasks) => ok(tasks),
        Err(error) => failed(error),
    }
}
