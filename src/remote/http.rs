//! REST transport:
//!
//! - `GET    {base}/users/{uid}/tasks`
//! - `POST   {base}/users/{uid}/tasks`        -> `{"id": "..."}`
//! - `PATCH  {base}/users/{uid}/tasks/{id}`
//! - `DELETE {base}/users/{uid}/tasks/{id}`
//!
//! The live feed is a polling loop that only emits when the snapshot changed.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{RequestBuilder, Response, StatusCode, Url};
use serde::Deserialize;
use tokio::sync::mpsc;

use super::{RemoteError, RemoteStore, SnapshotFeed};
use crate::models::{Identity, RemoteSettings, Task, TaskPatch, Timestamp};

#[derive(Debug, Deserialize)]
struct CreatedResponse {
    id: String,
}

#[derive(Clone)]
pub struct HttpRemoteStore {
    client: reqwest::Client,
    base: Url,
    api_token: Option<String>,
    poll_interval: Duration,
    online: Arc<AtomicBool>,
}

impl HttpRemoteStore {
    pub fn new(settings: &RemoteSettings) -> Result<Self, RemoteError> {
        let base = Url::parse(settings.base_url.trim())
            .map_err(|err| RemoteError::Setup(format!("invalid base url: {err}")))?;
        if base.cannot_be_a_base() {
            return Err(RemoteError::Setup(format!(
                "base url cannot carry a path: {base}"
            )));
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.request_timeout_secs.max(1)))
            .build()
            .map_err(|err| RemoteError::Setup(format!("failed to build http client: {err}")))?;
        let api_token = settings
            .api_token
            .as_ref()
            .map(|token| token.trim().to_string())
            .filter(|token| !token.is_empty());
        Ok(Self {
            client,
            base,
            api_token,
            poll_interval: Duration::from_millis(settings.poll_interval_ms.max(100)),
            online: Arc::new(AtomicBool::new(true)),
        })
    }

    fn url(&self, user: &Identity, id: Option<&str>) -> Result<Url, RemoteError> {
        let mut url = self.base.clone();
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| RemoteError::Setup(format!("invalid base url: {}", self.base)))?;
            segments.pop_if_empty().push("users").push(user.as_str()).push("tasks");
            if let Some(id) = id {
                segments.push(id);
            }
        }
        Ok(url)
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, RemoteError> {
        let request = match &self.api_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        };
        let response = request.send().await.map_err(|err| self.classify(err))?;
        self.online.store(true, Ordering::SeqCst);

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        if status == StatusCode::NOT_FOUND {
            return Err(RemoteError::NotFound(response.url().path().to_string()));
        }
        let message = response.text().await.unwrap_or_default();
        Err(RemoteError::Rejected {
            status: status.as_u16(),
            message,
        })
    }

    fn classify(&self, err: reqwest::Error) -> RemoteError {
        if err.is_decode() {
            return RemoteError::Decode(err.to_string());
        }
        if err.is_builder() {
            return RemoteError::Setup(err.to_string());
        }
        self.online.store(false, Ordering::SeqCst);
        RemoteError::Offline(err.to_string())
    }
}

#[async_trait]
impl RemoteStore for HttpRemoteStore {
    async fn fetch(&self, user: &Identity) -> Result<Vec<Task>, RemoteError> {
        let url = self.url(user, None)?;
        let response = self.send(self.client.get(url)).await?;
        response
            .json::<Vec<Task>>()
            .await
            .map_err(|err| RemoteError::Decode(err.to_string()))
    }

    async fn listen(&self, user: &Identity) -> Result<SnapshotFeed, RemoteError> {
        let initial = self.fetch(user).await?;
        let (tx, rx) = mpsc::unbounded_channel();
        let _ = tx.send(Ok(initial.clone()));

        let store = self.clone();
        let user = user.clone();
        tokio::spawn(async move {
            let mut last = initial;
            let mut interval = tokio::time::interval(store.poll_interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            interval.tick().await;
            loop {
                interval.tick().await;
                if tx.is_closed() {
                    return;
                }
                match store.fetch(&user).await {
                    Ok(tasks) => {
                        if tasks != last {
                            if tx.send(Ok(tasks.clone())).is_err() {
                                return;
                            }
                            last = tasks;
                        }
                    }
                    // Keep polling through connectivity gaps.
                    Err(err) if err.is_offline() => {
                        log::debug!("remote poll offline user={user} error={err}");
                    }
                    Err(err) => {
                        let _ = tx.send(Err(err));
                        return;
                    }
                }
            }
        });
        Ok(rx)
    }

    async fn create(&self, user: &Identity, task: Task) -> Result<String, RemoteError> {
        let url = self.url(user, None)?;
        let response = self.send(self.client.post(url).json(&task)).await?;
        let created: CreatedResponse = response
            .json()
            .await
            .map_err(|err| RemoteError::Decode(err.to_string()))?;
        Ok(created.id)
    }

    async fn update(
        &self,
        user: &Identity,
        id: &str,
        patch: TaskPatch,
        updated_at: Timestamp,
    ) -> Result<(), RemoteError> {
        let url = self.url(user, Some(id))?;
        let body = patch_body(&patch, updated_at)?;
        self.send(self.client.patch(url).json(&body)).await?;
        Ok(())
    }

    async fn delete(&self, user: &Identity, id: &str) -> Result<(), RemoteError> {
        let url = self.url(user, Some(id))?;
        match self.send(self.client.delete(url)).await {
            Ok(_) | Err(RemoteError::NotFound(_)) => Ok(()),
            Err(err) => Err(err),
        }
    }

    fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }
}

fn patch_body(patch: &TaskPatch, updated_at: Timestamp) -> Result<serde_json::Value, RemoteError> {
    let mut body =
        serde_json::to_value(patch).map_err(|err| RemoteError::Decode(err.to_string()))?;
    if let Some(map) = body.as_object_mut() {
        map.insert("updated_at".to_string(), serde_json::json!(updated_at));
    }
    Ok(body)
}
