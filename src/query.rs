//! Filter / sort / statistics over an in-memory task collection.
//!
//! Everything here is pure: the same tasks and query always produce the same view.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::models::{Priority, Status, Task};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum SortKey {
    Priority,
    Due,
    #[default]
    Created,
    Status,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum SortDirection {
    Ascending,
    #[default]
    Descending,
}

impl SortDirection {
    fn apply(self, ordering: Ordering) -> Ordering {
        match self {
            SortDirection::Ascending => ordering,
            SortDirection::Descending => ordering.reverse(),
        }
    }
}

/// `None` on a filter field means "All".
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub struct TaskQuery {
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub priority: Option<Priority>,
    #[serde(default)]
    pub status: Option<Status>,
    #[serde(default)]
    pub sort: SortKey,
    #[serde(default)]
    pub direction: SortDirection,
}

impl TaskQuery {
    pub fn matches(&self, task: &Task) -> bool {
        if let Some(priority) = self.priority {
            if task.priority != priority {
                return false;
            }
        }
        if let Some(status) = self.status {
            if task.status != status {
                return false;
            }
        }
        let needle = self.text.trim().to_lowercase();
        if needle.is_empty() {
            return true;
        }
        format!("{} {}", task.title, task.notes)
            .to_lowercase()
            .contains(&needle)
    }

    pub fn compare(&self, a: &Task, b: &Task) -> Ordering {
        match self.sort {
            SortKey::Priority => self.direction.apply(a.priority.cmp(&b.priority)),
            SortKey::Created => self.direction.apply(a.created_at.cmp(&b.created_at)),
            SortKey::Status => self.direction.apply(a.status.cmp(&b.status)),
            // Tasks without a due date stay last in either direction.
            SortKey::Due => match (&a.due, &b.due) {
                (Some(x), Some(y)) => self.direction.apply(x.cmp(y)),
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (None, None) => Ordering::Equal,
            },
        }
    }

    /// Filtered, stably sorted view.
    pub fn apply(&self, tasks: &[Task]) -> Vec<Task> {
        let mut view: Vec<Task> = tasks.iter().filter(|t| self.matches(t)).cloned().collect();
        view.sort_by(|a, b| self.compare(a, b));
        view
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub struct TaskStats {
    pub total: usize,
    pub done: usize,
    pub high_priority: usize,
}

/// Always computed over the full collection, independent of any active filter.
pub fn stats(tasks: &[Task]) -> TaskStats {
    TaskStats {
        total: tasks.len(),
        done: tasks.iter().filter(|t| t.status == Status::Done).count(),
        high_priority: tasks.iter().filter(|t| t.priority.is_high()).count(),
    }
}
