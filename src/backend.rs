use crate::error::Result;
use crate::models::{now_millis, Identity, Regime, Task, TaskDraft, TaskPatch};
use crate::remote::{PendingWrite, RemoteChannel, SnapshotEvent, Subscription, SyncStatus};
use crate::storage::Storage;
use crate::transfer::dedupe_by_id;

pub enum WriteOutcome {
    /// The write is complete; `tasks` is the new authoritative collection and `created`
    /// the id assigned by a create.
    Applied {
        tasks: Vec<Task>,
        created: Option<String>,
    },
    /// Queued remotely; the change becomes visible through the subscription.
    Pending(Vec<PendingWrite>),
}

/// One authoritative source for a session. `current` is the collection the controller
/// holds right now; only the local backend derives its result from it.
pub trait TaskBackend: Send + Sync {
    fn regime(&self) -> Regime;

    fn subscribe(&self) -> Result<Subscription>;

    fn create(&self, current: &[Task], draft: TaskDraft) -> Result<WriteOutcome>;

    fn update(&self, current: &[Task], id: &str, patch: TaskPatch) -> Result<WriteOutcome>;

    fn delete(&self, current: &[Task], id: &str) -> Result<WriteOutcome>;

    fn import(&self, current: &[Task], tasks: Vec<Task>) -> Result<WriteOutcome>;

    fn sync_status(&self) -> Option<SyncStatus> {
        None
    }
}

pub struct LocalBackend {
    storage: Storage,
}

impl LocalBackend {
    pub fn new(storage: Storage) -> Self {
        Self { storage }
    }

    fn persist(&self, tasks: Vec<Task>, with_backup: bool) -> Result<Vec<Task>> {
        self.storage.ensure_dirs()?;
        self.storage.save_tasks(&tasks, with_backup)?;
        Ok(tasks)
    }
}

fn applied(tasks: Vec<Task>) -> WriteOutcome {
    WriteOutcome::Applied {
        tasks,
        created: None,
    }
}

impl TaskBackend for LocalBackend {
    fn regime(&self) -> Regime {
        Regime::Local
    }

    fn subscribe(&self) -> Result<Subscription> {
        let tasks = self.storage.load_tasks_or_empty();
        log::info!("local task store loaded count={}", tasks.len());
        Ok(Subscription::replay(vec![SnapshotEvent::Snapshot(tasks)]))
    }

    fn create(&self, current: &[Task], draft: TaskDraft) -> Result<WriteOutcome> {
        let task = draft.into_task(uuid::Uuid::new_v4().to_string(), now_millis());
        log::debug!("local create id={}", task.id);
        let id = task.id.clone();
        let mut next = current.to_vec();
        next.push(task);
        Ok(WriteOutcome::Applied {
            tasks: self.persist(next, false)?,
            created: Some(id),
        })
    }

    fn update(&self, current: &[Task], id: &str, patch: TaskPatch) -> Result<WriteOutcome> {
        let mut next = current.to_vec();
        let Some(task) = next.iter_mut().find(|t| t.id == id) else {
            log::warn!("local update skipped, task not found id={id}");
            return Ok(applied(next));
        };
        task.apply(&patch, now_millis());
        Ok(applied(self.persist(next, false)?))
    }

    fn delete(&self, current: &[Task], id: &str) -> Result<WriteOutcome> {
        let next: Vec<Task> = current.iter().filter(|t| t.id != id).cloned().collect();
        if next.len() == current.len() {
            log::warn!("local delete skipped, task not found id={id}");
            return Ok(applied(next));
        }
        Ok(applied(self.persist(next, false)?))
    }

    /// Replaces the whole collection; the previous file is kept as a backup. Repeated ids
    /// collapse onto their last record.
    fn import(&self, _current: &[Task], tasks: Vec<Task>) -> Result<WriteOutcome> {
        let (tasks, duplicates) = dedupe_by_id(tasks);
        if duplicates > 0 {
            log::warn!("local import merged {duplicates} record(s) with repeated ids");
        }
        log::info!("local import replacing collection count={}", tasks.len());
        Ok(applied(self.persist(tasks, true)?))
    }
}

pub struct CloudBackend {
    channel: RemoteChannel,
    identity: Identity,
}

impl CloudBackend {
    pub fn new(channel: RemoteChannel, identity: Identity) -> Self {
        Self { channel, identity }
    }
}

impl TaskBackend for CloudBackend {
    fn regime(&self) -> Regime {
        Regime::Cloud
    }

    fn subscribe(&self) -> Result<Subscription> {
        self.channel.subscribe(Some(&self.identity))
    }

    fn create(&self, _current: &[Task], draft: TaskDraft) -> Result<WriteOutcome> {
        let task = draft.into_task(String::new(), now_millis());
        let pending = self.channel.create(Some(&self.identity), task)?;
        Ok(WriteOutcome::Pending(vec![pending]))
    }

    fn update(&self, _current: &[Task], id: &str, patch: TaskPatch) -> Result<WriteOutcome> {
        let pending = self.channel.update(Some(&self.identity), id, patch)?;
        Ok(WriteOutcome::Pending(vec![pending]))
    }

    fn delete(&self, _current: &[Task], id: &str) -> Result<WriteOutcome> {
        let pending = self.channel.delete(Some(&self.identity), id)?;
        Ok(WriteOutcome::Pending(vec![pending]))
    }

    /// Appends: one remote create per imported record.
    fn import(&self, _current: &[Task], tasks: Vec<Task>) -> Result<WriteOutcome> {
        log::info!(
            "cloud import appending user={} count={}",
            self.identity,
            tasks.len()
        );
        let mut pending = Vec::with_capacity(tasks.len());
        for task in tasks {
            let task = Task {
                id: String::new(),
                ..task
            };
            pending.push(self.channel.create(Some(&self.identity), task)?);
        }
        Ok(WriteOutcome::Pending(pending))
    }

    fn sync_status(&self) -> Option<SyncStatus> {
        Some(self.channel.status())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Priority, Status};

    fn applied_tasks(outcome: WriteOutcome) -> Vec<Task> {
        match outcome {
            WriteOutcome::Applied { tasks, .. } => tasks,
            WriteOutcome::Pending(_) => panic!("local writes never pend"),
        }
    }

    #[test]
    fn local_backend_assigns_ids_and_persists_every_write() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Storage::new(dir.path().to_path_buf());
        let backend = LocalBackend::new(storage.clone());

        let mut draft = TaskDraft::new("Write report");
        draft.priority = Priority::High;
        let WriteOutcome::Applied { tasks, created: id } = backend.create(&[], draft).unwrap()
        else {
            panic!("local writes never pend");
        };
        assert_eq!(tasks.len(), 1);
        let created = tasks[0].clone();
        assert_eq!(id.as_deref(), Some(created.id.as_str()));
        assert!(!created.id.is_empty());
        assert_eq!(created.created_at, created.updated_at);
        assert_eq!(storage.load_tasks().unwrap().tasks, tasks);

        let tasks = applied_tasks(
            backend
                .update(&tasks, &created.id, TaskPatch::status(Status::Done))
                .unwrap(),
        );
        assert_eq!(tasks[0].status, Status::Done);
        assert!(tasks[0].updated_at >= created.updated_at);
        assert_eq!(storage.load_tasks().unwrap().tasks[0].status, Status::Done);

        let tasks = applied_tasks(backend.delete(&tasks, &created.id).unwrap());
        assert!(tasks.is_empty());
        assert!(storage.load_tasks().unwrap().tasks.is_empty());
    }

    #[test]
    fn local_backend_ignores_unknown_ids() {
        let dir = tempfile::tempdir().unwrap();
        let backend = LocalBackend::new(Storage::new(dir.path().to_path_buf()));
        let current = vec![TaskDraft::new("a").into_task("a".into(), 1)];
        assert_eq!(
            applied_tasks(backend.update(&current, "missing", TaskPatch::default()).unwrap()),
            current
        );
        assert_eq!(applied_tasks(backend.delete(&current, "missing").unwrap()), current);
        assert!(!dir.path().join("data.json").exists());
    }

    #[test]
    fn local_subscription_replays_stored_collection() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Storage::new(dir.path().to_path_buf());
        storage
            .save_tasks(&[TaskDraft::new("a").into_task("a".into(), 1)], false)
            .unwrap();
        let backend = LocalBackend::new(storage);
        let mut sub = backend.subscribe().unwrap();
        match sub.try_next() {
            Some(SnapshotEvent::Snapshot(tasks)) => assert_eq!(tasks[0].id, "a"),
            other => panic!("unexpected event: {other:?}"),
        }
        assert!(sub.is_finished());
        assert_eq!(backend.sync_status(), None);
    }

    #[test]
    fn local_import_keeps_last_record_for_repeated_ids() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Storage::new(dir.path().to_path_buf());
        let backend = LocalBackend::new(storage.clone());
        let tasks = applied_tasks(
            backend
                .import(
                    &[],
                    vec![
                        TaskDraft::new("A").into_task("x".into(), 1),
                        TaskDraft::new("other").into_task("y".into(), 2),
                        TaskDraft::new("B").into_task("x".into(), 3),
                    ],
                )
                .unwrap(),
        );
        let ids: Vec<_> = tasks.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec!["x", "y"]);
        assert_eq!(tasks[0].title, "B");
        assert_eq!(storage.load_tasks().unwrap().tasks, tasks);
    }
}
