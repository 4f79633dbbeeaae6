use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use super::{order_snapshot, RemoteError, RemoteStore, SyncStatus};
use crate::error::{Result, TaskError};
use crate::models::{now_millis, Identity, Task, TaskPatch, Timestamp};

/// One delivery on a subscription. Snapshots always carry the complete collection.
#[derive(Debug, Clone, PartialEq)]
pub enum SnapshotEvent {
    Snapshot(Vec<Task>),
    /// The live feed failed; a single fallback snapshot (or `Failed`) follows.
    Degraded(RemoteError),
    Failed {
        subscription: RemoteError,
        fallback: RemoteError,
    },
}

/// Ordered stream of [`SnapshotEvent`]s. Dropping it stops the underlying feed.
pub struct Subscription {
    events: mpsc::UnboundedReceiver<SnapshotEvent>,
    feed: Option<JoinHandle<()>>,
}

impl Subscription {
    /// A finished subscription that replays `events` and then ends.
    pub fn replay(events: Vec<SnapshotEvent>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        for event in events {
            let _ = tx.send(event);
        }
        Self {
            events: rx,
            feed: None,
        }
    }

    pub async fn next(&mut self) -> Option<SnapshotEvent> {
        self.events.recv().await
    }

    /// Non-blocking poll; `None` when nothing is queued right now.
    pub fn try_next(&mut self) -> Option<SnapshotEvent> {
        self.events.try_recv().ok()
    }

    /// True once the producer is gone; queued events may still be drained.
    pub fn is_finished(&self) -> bool {
        self.events.is_closed()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(feed) = self.feed.take() {
            feed.abort();
        }
    }
}

/// Handle on a queued remote write.
pub struct PendingWrite {
    reply: oneshot::Receiver<std::result::Result<Option<String>, RemoteError>>,
}

impl PendingWrite {
    /// Resolves once the remote store acknowledged or rejected the write. For creates the
    /// assigned id is returned.
    pub async fn acknowledged(self) -> Result<Option<String>> {
        match self.reply.await {
            Ok(Ok(id)) => Ok(id),
            Ok(Err(error)) => Err(TaskError::RemoteWrite(error)),
            Err(_) => Err(TaskError::RemoteWrite(RemoteError::Closed)),
        }
    }
}

#[derive(Debug)]
enum WriteOp {
    Create {
        user: Identity,
        task: Task,
    },
    Update {
        user: Identity,
        id: String,
        patch: TaskPatch,
        updated_at: Timestamp,
    },
    Delete {
        user: Identity,
        id: String,
    },
}

impl WriteOp {
    fn describe(&self) -> String {
        match self {
            WriteOp::Create { user, .. } => format!("create user={user}"),
            WriteOp::Update { user, id, .. } => format!("update user={user} id={id}"),
            WriteOp::Delete { user, id } => format!("delete user={user} id={id}"),
        }
    }

    async fn apply(&self, store: &dyn RemoteStore) -> std::result::Result<Option<String>, RemoteError> {
        match self {
            WriteOp::Create { user, task } => store.create(user, task.clone()).await.map(Some),
            WriteOp::Update {
                user,
                id,
                patch,
                updated_at,
            } => store
                .update(user, id, patch.clone(), *updated_at)
                .await
                .map(|_| None),
            WriteOp::Delete { user, id } => store.delete(user, id).await.map(|_| None),
        }
    }
}

struct OutboxItem {
    op: WriteOp,
    reply: oneshot::Sender<std::result::Result<Option<String>, RemoteError>>,
}

/// Live per-user subscription plus a FIFO write outbox over a [`RemoteStore`].
#[derive(Clone)]
pub struct RemoteChannel {
    store: Arc<dyn RemoteStore>,
    outbox: mpsc::UnboundedSender<OutboxItem>,
    pending: Arc<AtomicUsize>,
    degraded: Arc<AtomicBool>,
}

impl RemoteChannel {
    /// Spawns the outbox worker, so this must run inside a tokio runtime.
    pub fn new(store: Arc<dyn RemoteStore>, retry_interval: Duration) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let pending = Arc::new(AtomicUsize::new(0));
        tokio::spawn(run_outbox(
            store.clone(),
            rx,
            pending.clone(),
            retry_interval,
        ));
        Self {
            store,
            outbox: tx,
            pending,
            degraded: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn subscribe(&self, identity: Option<&Identity>) -> Result<Subscription> {
        let user = identity.ok_or(TaskError::InvalidIdentity)?.clone();
        let (tx, rx) = mpsc::unbounded_channel();
        self.degraded.store(false, Ordering::SeqCst);
        log::info!("remote subscription opening user={user}");
        let feed = tokio::spawn(run_subscription(
            self.store.clone(),
            user,
            tx,
            self.degraded.clone(),
        ));
        Ok(Subscription {
            events: rx,
            feed: Some(feed),
        })
    }

    /// Queues a create. `created_at` / `updated_at` are stamped now; the id is assigned
    /// by the remote store.
    pub fn create(&self, identity: Option<&Identity>, mut task: Task) -> Result<PendingWrite> {
        let user = identity.ok_or(TaskError::InvalidIdentity)?.clone();
        let now = now_millis();
        task.created_at = now;
        task.updated_at = now;
        self.enqueue(WriteOp::Create { user, task })
    }

    pub fn update(
        &self,
        identity: Option<&Identity>,
        id: &str,
        patch: TaskPatch,
    ) -> Result<PendingWrite> {
        let user = identity.ok_or(TaskError::InvalidIdentity)?.clone();
        self.enqueue(WriteOp::Update {
            user,
            id: id.to_string(),
            patch,
            updated_at: now_millis(),
        })
    }

    pub fn delete(&self, identity: Option<&Identity>, id: &str) -> Result<PendingWrite> {
        let user = identity.ok_or(TaskError::InvalidIdentity)?.clone();
        self.enqueue(WriteOp::Delete {
            user,
            id: id.to_string(),
        })
    }

    pub fn pending_writes(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    /// Observational only; writes are accepted in every state.
    pub fn status(&self) -> SyncStatus {
        if self.pending_writes() > 0 {
            SyncStatus::Syncing
        } else if !self.store.is_online() || self.degraded.load(Ordering::SeqCst) {
            SyncStatus::Offline
        } else {
            SyncStatus::Online
        }
    }

    fn enqueue(&self, op: WriteOp) -> Result<PendingWrite> {
        let (reply, rx) = oneshot::channel();
        log::debug!("remote write queued {}", op.describe());
        self.pending.fetch_add(1, Ordering::SeqCst);
        if self.outbox.send(OutboxItem { op, reply }).is_err() {
            self.pending.fetch_sub(1, Ordering::SeqCst);
            return Err(TaskError::RemoteWrite(RemoteError::Closed));
        }
        Ok(PendingWrite { reply: rx })
    }
}

async fn run_outbox(
    store: Arc<dyn RemoteStore>,
    mut rx: mpsc::UnboundedReceiver<OutboxItem>,
    pending: Arc<AtomicUsize>,
    retry_interval: Duration,
) {
    while let Some(item) = rx.recv().await {
        let result = loop {
            match item.op.apply(store.as_ref()).await {
                Err(error) if error.is_offline() => {
                    log::debug!(
                        "remote write waiting for connectivity {} error={error}",
                        item.op.describe()
                    );
                    tokio::time::sleep(retry_interval).await;
                }
                other => break other,
            }
        };
        pending.fetch_sub(1, Ordering::SeqCst);
        match &result {
            Ok(_) => log::debug!("remote write acknowledged {}", item.op.describe()),
            Err(error) => log::warn!("remote write rejected {} error={error}", item.op.describe()),
        }
        let _ = item.reply.send(result);
    }
}

async fn run_subscription(
    store: Arc<dyn RemoteStore>,
    user: Identity,
    tx: mpsc::UnboundedSender<SnapshotEvent>,
    degraded: Arc<AtomicBool>,
) {
    let failure = match store.listen(&user).await {
        Ok(mut feed) => loop {
            match feed.recv().await {
                Some(Ok(tasks)) => {
                    if tx.send(SnapshotEvent::Snapshot(order_snapshot(tasks))).is_err() {
                        return;
                    }
                }
                Some(Err(error)) => break error,
                None => break RemoteError::Closed,
            }
        },
        Err(error) => error,
    };

    log::warn!("remote subscription failed user={user} error={failure}; falling back to one-shot fetch");
    degraded.store(true, Ordering::SeqCst);
    if tx.send(SnapshotEvent::Degraded(failure.clone())).is_err() {
        return;
    }
    let event = match store.fetch(&user).await {
        Ok(tasks) => SnapshotEvent::Snapshot(order_snapshot(tasks)),
        Err(fallback) => {
            log::error!("remote fallback fetch failed user={user} error={fallback}");
            SnapshotEvent::Failed {
                subscription: failure,
                fallback,
            }
        }
    };
    let _ = tx.send(event);
}
