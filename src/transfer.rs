use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local, NaiveDateTime};
use serde_json::{Map, Value};

use crate::error::{Result, TaskError};
use crate::models::{Due, Priority, Status, Task, Timestamp};
use crate::storage::write_atomic_bytes;

const EXPORT_DIR: &str = "exports";

#[derive(Debug, Clone, PartialEq)]
pub struct ImportBatch {
    pub tasks: Vec<Task>,
    /// Records dropped for a missing id or title, an unreadable `due` or `created_at`, or
    /// an id repeated later in the file.
    pub skipped: usize,
}

/// Validates and normalizes an import payload.
///
/// The payload must be a JSON array; anything else rejects the whole file. Individual
/// records without a usable `id` and `title`, or with a `due` / `created_at` that cannot
/// be read, are skipped. Every other field falls back to its default. When an id repeats,
/// the last record wins.
pub fn parse_import(bytes: &[u8], now: Timestamp) -> Result<ImportBatch> {
    let value: Value = serde_json::from_slice(bytes)
        .map_err(|err| TaskError::ImportValidation(format!("malformed json: {err}")))?;
    let Value::Array(items) = value else {
        return Err(TaskError::ImportValidation(
            "expected a list of tasks at the top level".to_string(),
        ));
    };

    let mut tasks = Vec::with_capacity(items.len());
    let mut skipped = 0;
    for item in items {
        match item {
            Value::Object(map) => match task_from_record(&map, now) {
                Some(task) => tasks.push(task),
                None => skipped += 1,
            },
            _ => skipped += 1,
        }
    }
    let (tasks, duplicates) = dedupe_by_id(tasks);
    if duplicates > 0 {
        log::warn!("import merged {duplicates} record(s) with repeated ids");
    }
    let skipped = skipped + duplicates;
    if skipped > 0 {
        log::warn!("import skipped {skipped} record(s)");
    }
    Ok(ImportBatch { tasks, skipped })
}

/// Collapses repeated ids onto the last record, which takes the slot of the first one.
pub fn dedupe_by_id(tasks: Vec<Task>) -> (Vec<Task>, usize) {
    let mut slots: HashMap<String, usize> = HashMap::with_capacity(tasks.len());
    let mut unique: Vec<Task> = Vec::with_capacity(tasks.len());
    let mut dropped = 0;
    for task in tasks {
        match slots.get(&task.id) {
            Some(&slot) => {
                unique[slot] = task;
                dropped += 1;
            }
            None => {
                slots.insert(task.id.clone(), unique.len());
                unique.push(task);
            }
        }
    }
    (unique, dropped)
}

pub fn read_import(path: &Path, now: Timestamp) -> Result<ImportBatch> {
    let bytes = std::fs::read(path).map_err(|err| {
        TaskError::ImportValidation(format!("cannot read {}: {err}", path.display()))
    })?;
    parse_import(&bytes, now)
}

fn task_from_record(map: &Map<String, Value>, now: Timestamp) -> Option<Task> {
    let id = coerce_string(map.get("id"))?;
    let title = coerce_string(map.get("title"))?;

    let priority = map
        .get("priority")
        .and_then(Value::as_str)
        .and_then(Priority::parse_loose)
        .unwrap_or_default();
    let status = map
        .get("status")
        .and_then(Value::as_str)
        .and_then(Status::parse_loose)
        .unwrap_or_default();
    let notes = coerce_string(map.get("notes")).unwrap_or_default();
    let due = match map.get("due") {
        None | Some(Value::Null) => None,
        Some(Value::String(raw)) if raw.trim().is_empty() => None,
        Some(Value::String(raw)) => match raw.parse::<Due>() {
            Ok(due) => Some(due),
            Err(err) => {
                log::warn!("import skipped task id={id}: {err}");
                return None;
            }
        },
        Some(other) => {
            log::warn!("import skipped task id={id}: due must be a string, got {other}");
            return None;
        }
    };
    let created_at = match field(map, "created_at", "createdAt") {
        None | Some(Value::Null) => now,
        Some(value) => match parse_timestamp(value) {
            Some(ts) => ts,
            None => {
                log::warn!("import skipped task id={id}: unreadable created_at {value}");
                return None;
            }
        },
    };

    Some(Task {
        id,
        title,
        notes,
        priority,
        status,
        due,
        created_at,
        updated_at: now.max(created_at),
    })
}

/// Milliseconds since the epoch from an integer, a float, a numeric string or an ISO 8601
/// date-time (UTC when no offset is given).
fn parse_timestamp(value: &Value) -> Option<Timestamp> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| {
            n.as_f64()
                .filter(|f| f.is_finite())
                .map(|f| f.round() as Timestamp)
        }),
        Value::String(raw) => {
            let raw = raw.trim();
            if let Ok(ms) = raw.parse::<Timestamp>() {
                return Some(ms);
            }
            if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
                return Some(dt.timestamp_millis());
            }
            ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M"]
                .iter()
                .find_map(|pattern| NaiveDateTime::parse_from_str(raw, pattern).ok())
                .map(|dt| dt.and_utc().timestamp_millis())
        }
        _ => None,
    }
}

fn field<'a>(map: &'a Map<String, Value>, snake: &str, camel: &str) -> Option<&'a Value> {
    map.get(snake).or_else(|| map.get(camel))
}

/// Strings pass through, numbers and booleans are stringified; blank results count as absent.
fn coerce_string(value: Option<&Value>) -> Option<String> {
    let text = match value? {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        _ => return None,
    };
    if text.trim().is_empty() {
        None
    } else {
        Some(text)
    }
}

pub fn export_default_path(root: &Path) -> PathBuf {
    let stamp = Local::now().format("%Y%m%d-%H%M%S").to_string();
    root.join(EXPORT_DIR).join(format!("tasks-{stamp}.json"))
}

/// Writes the full collection, unfiltered, to a timestamped file under `root/exports`.
pub fn export_tasks(root: &Path, tasks: &[Task]) -> Result<PathBuf> {
    let path = export_default_path(root);
    let json = serde_json::to_vec_pretty(tasks).map_err(crate::storage::StorageError::from)?;
    write_atomic_bytes(&path, &json)?;
    log::info!("exported {} task(s) to {}", tasks.len(), path.display());
    Ok(path)
}
