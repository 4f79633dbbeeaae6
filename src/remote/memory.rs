//! In-process [`RemoteStore`] with switchable connectivity and injectable failures.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::{RemoteError, RemoteStore, SnapshotFeed};
use crate::models::{Identity, Task, TaskPatch, Timestamp};

type FeedSender = mpsc::UnboundedSender<Result<Vec<Task>, RemoteError>>;

#[derive(Default)]
struct MemoryData {
    collections: HashMap<Identity, Vec<Task>>,
    listeners: HashMap<Identity, Vec<FeedSender>>,
    listen_failure: Option<RemoteError>,
    fetch_failure: Option<RemoteError>,
    write_rejection: Option<RemoteError>,
}

pub struct MemoryRemoteStore {
    inner: Mutex<MemoryData>,
    online: AtomicBool,
    next_id: AtomicU64,
}

impl Default for MemoryRemoteStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryRemoteStore {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(MemoryData::default()),
            online: AtomicBool::new(true),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    /// Makes every subsequent `listen` fail with `error` (`None` restores normal behavior).
    pub fn fail_listen(&self, error: Option<RemoteError>) {
        self.lock().listen_failure = error;
    }

    pub fn fail_fetch(&self, error: Option<RemoteError>) {
        self.lock().fetch_failure = error;
    }

    /// Rejects every subsequent write with `error`.
    pub fn reject_writes(&self, error: Option<RemoteError>) {
        self.lock().write_rejection = error;
    }

    /// Replaces a user's collection without going through the write path.
    pub fn seed(&self, user: &Identity, tasks: Vec<Task>) {
        let mut guard = self.lock();
        guard.collections.insert(user.clone(), tasks);
        broadcast(&mut guard, user);
    }

    pub fn tasks(&self, user: &Identity) -> Vec<Task> {
        self.lock()
            .collections
            .get(user)
            .cloned()
            .unwrap_or_default()
    }

    /// Terminates every open feed for `user` with `error`.
    pub fn break_feeds(&self, user: &Identity, error: RemoteError) {
        let mut guard = self.lock();
        if let Some(listeners) = guard.listeners.remove(user) {
            for listener in listeners {
                let _ = listener.send(Err(error.clone()));
            }
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryData> {
        self.inner.lock().expect("memory remote poisoned")
    }

    fn check_online(&self) -> Result<(), RemoteError> {
        if self.is_online() {
            Ok(())
        } else {
            Err(RemoteError::Offline("memory remote is offline".to_string()))
        }
    }

    fn write<F>(&self, user: &Identity, mutate: F) -> Result<(), RemoteError>
    where
        F: FnOnce(&mut Vec<Task>) -> Result<(), RemoteError>,
    {
        self.check_online()?;
        let mut guard = self.lock();
        if let Some(rejection) = guard.write_rejection.clone() {
            return Err(rejection);
        }
        mutate(guard.collections.entry(user.clone()).or_default())?;
        broadcast(&mut guard, user);
        Ok(())
    }
}

fn broadcast(data: &mut MemoryData, user: &Identity) {
    let snapshot = data.collections.get(user).cloned().unwrap_or_default();
    if let Some(listeners) = data.listeners.get_mut(user) {
        listeners.retain(|listener| listener.send(Ok(snapshot.clone())).is_ok());
    }
}

#[async_trait]
impl RemoteStore for MemoryRemoteStore {
    async fn fetch(&self, user: &Identity) -> Result<Vec<Task>, RemoteError> {
        self.check_online()?;
        let guard = self.lock();
        if let Some(failure) = guard.fetch_failure.clone() {
            return Err(failure);
        }
        Ok(guard.collections.get(user).cloned().unwrap_or_default())
    }

    async fn listen(&self, user: &Identity) -> Result<SnapshotFeed, RemoteError> {
        self.check_online()?;
        let mut guard = self.lock();
        if let Some(failure) = guard.listen_failure.clone() {
            return Err(failure);
        }
        let (tx, rx) = mpsc::unbounded_channel();
        let current = guard.collections.get(user).cloned().unwrap_or_default();
        let _ = tx.send(Ok(current));
        guard.listeners.entry(user.clone()).or_default().push(tx);
        Ok(rx)
    }

    async fn create(&self, user: &Identity, task: Task) -> Result<String, RemoteError> {
        let id = format!("remote-{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        let assigned = id.clone();
        self.write(user, move |tasks| {
            tasks.push(Task { id: assigned, ..task });
            Ok(())
        })?;
        Ok(id)
    }

    async fn update(
        &self,
        user: &Identity,
        id: &str,
        patch: TaskPatch,
        updated_at: Timestamp,
    ) -> Result<(), RemoteError> {
        self.write(user, |tasks| {
            let task = tasks
                .iter_mut()
                .find(|t| t.id == id)
                .ok_or_else(|| RemoteError::NotFound(id.to_string()))?;
            task.apply(&patch, updated_at);
            Ok(())
        })
    }

    async fn delete(&self, user: &Identity, id: &str) -> Result<(), RemoteError> {
        self.write(user, |tasks| {
            tasks.retain(|t| t.id != id);
            Ok(())
        })
    }

    fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }
}
