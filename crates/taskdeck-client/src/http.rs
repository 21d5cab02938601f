//! HTTP client for the REST endpoints.
//!
//! One method per endpoint, no retries and no caching: every call is a
//! single request that either decodes the body or fails with a
//! [`ClientError`].

use reqwest::{Method, RequestBuilder, Url};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use taskdeck_core::{
    CenterConfig, ConfigPatch, Instance, InstanceId, InstanceUpdate, NewInstance, NewTask,
    StatsSnapshot, Task, TaskId, TaskList, TaskReceipt, TaskStatus,
};

use crate::config::ClientConfig;
use crate::error::ClientError;

/// Acknowledgement returned by action endpoints (cancel, remove, enable...).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Ack {
    #[serde(default)]
    pub message: Option<String>,

    /// Any other fields the center includes (ids, counts).
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// The failed-task listing comes either bare or wrapped.
#[derive(Deserialize)]
#[serde(untagged)]
enum TaskListBody {
    Wrapped(TaskList),
    Bare(Vec<Task>),
}

/// HTTP client for the task center REST API.
#[derive(Debug, Clone)]
pub struct HttpClient {
    inner: reqwest::Client,
    base_url: Url,
}

impl HttpClient {
    /// Create a new HTTP client.
    pub fn new(config: &ClientConfig) -> Result<Self, ClientError> {
        let base_url = Url::parse(config.base_url.trim_end_matches('/'))
            .ok()
            .filter(|url| !url.cannot_be_a_base())
            .ok_or_else(|| ClientError::InvalidUrl(config.base_url.clone()))?;

        let inner = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;

        Ok(Self { inner, base_url })
    }

    /// Base URL requests are resolved against.
    pub fn base_url(&self) -> &str {
        self.base_url.as_str()
    }

    // Tasks

    /// Submit a task.
    pub async fn create_task(&self, task: &NewTask) -> Result<TaskReceipt, ClientError> {
        self.send(Method::POST, &["tasks"], |req| req.json(task)).await
    }

    /// Get status and result of a task.
    pub async fn get_task(&self, task_id: &TaskId) -> Result<TaskReceipt, ClientError> {
        self.send(Method::GET, &["tasks", task_id.as_str()], |req| req)
            .await
    }

    /// List queued and running tasks, optionally filtered by status.
    pub async fn list_tasks(&self, status: Option<TaskStatus>) -> Result<TaskList, ClientError> {
        self.send(Method::GET, &["tasks"], |req| match status {
            Some(status) => req.query(&[("status", status.as_str())]),
            None => req,
        })
        .await
    }

    /// Cancel a task.
    pub async fn cancel_task(&self, task_id: &TaskId) -> Result<Ack, ClientError> {
        self.send(Method::DELETE, &["tasks", task_id.as_str()], |req| req)
            .await
    }

    /// List tasks that ended in failure.
    pub async fn list_failed_tasks(&self) -> Result<Vec<Task>, ClientError> {
        let body: TaskListBody = self
            .send(Method::GET, &["tasks", "failed", "list"], |req| req)
            .await?;
        Ok(match body {
            TaskListBody::Wrapped(list) => list.tasks,
            TaskListBody::Bare(tasks) => tasks,
        })
    }

    /// Requeue a failed task.
    pub async fn retry_task(&self, task_id: &TaskId) -> Result<Ack, ClientError> {
        self.send(Method::POST, &["tasks", task_id.as_str(), "retry"], |req| req)
            .await
    }

    /// Requeue every failed task.
    pub async fn retry_all_tasks(&self) -> Result<Ack, ClientError> {
        self.send(Method::POST, &["tasks", "retry-all"], |req| req)
            .await
    }

    // Instances

    /// List all registered instances.
    pub async fn list_instances(&self) -> Result<Vec<Instance>, ClientError> {
        self.send(Method::GET, &["instances"], |req| req).await
    }

    /// Register an instance.
    pub async fn add_instance(&self, instance: &NewInstance) -> Result<Instance, ClientError> {
        self.send(Method::POST, &["instances"], |req| req.json(instance))
            .await
    }

    /// Change name, URL or backend of an instance.
    pub async fn update_instance(
        &self,
        instance_id: &InstanceId,
        update: &InstanceUpdate,
    ) -> Result<Instance, ClientError> {
        self.send(Method::PATCH, &["instances", instance_id.as_str()], |req| {
            req.json(update)
        })
        .await
    }

    /// Remove an instance. The center refuses while it holds a running task.
    pub async fn remove_instance(&self, instance_id: &InstanceId) -> Result<Ack, ClientError> {
        self.send(Method::DELETE, &["instances", instance_id.as_str()], |req| req)
            .await
    }

    /// Put an instance back into rotation.
    pub async fn enable_instance(&self, instance_id: &InstanceId) -> Result<Ack, ClientError> {
        self.send(
            Method::POST,
            &["instances", instance_id.as_str(), "enable"],
            |req| req,
        )
        .await
    }

    /// Take an instance out of rotation.
    pub async fn disable_instance(&self, instance_id: &InstanceId) -> Result<Ack, ClientError> {
        self.send(
            Method::POST,
            &["instances", instance_id.as_str(), "disable"],
            |req| req,
        )
        .await
    }

    // Config and stats

    /// Fetch the center configuration.
    pub async fn get_config(&self) -> Result<CenterConfig, ClientError> {
        self.send(Method::GET, &["config"], |req| req).await
    }

    /// Update the center configuration; returns the resulting config.
    pub async fn update_config(&self, patch: &ConfigPatch) -> Result<CenterConfig, ClientError> {
        self.send(Method::PATCH, &["config"], |req| req.json(patch))
            .await
    }

    /// Fetch the current stats snapshot.
    pub async fn get_stats(&self) -> Result<StatsSnapshot, ClientError> {
        self.send(Method::GET, &["stats"], |req| req).await
    }

    /// Get JSON from an endpoint given as a `/`-separated path.
    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ClientError> {
        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        self.send(Method::GET, &segments, |req| req).await
    }

    /// Resolve path segments against the base URL. Each segment is
    /// percent-encoded, so ids cannot change the route.
    fn endpoint(&self, segments: &[&str]) -> Result<Url, ClientError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| ClientError::InvalidUrl(self.base_url.to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn send<T, F>(&self, method: Method, segments: &[&str], build: F) -> Result<T, ClientError>
    where
        T: DeserializeOwned,
        F: FnOnce(RequestBuilder) -> RequestBuilder,
    {
        let url = self.endpoint(segments)?;
        debug!(method = %method, url = %url, "Sending request");

        let request = build(self.inner.request(method, url));
        let response = request.send().await?;
        let status = response.status();

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = error_message(&body)
                .unwrap_or_else(|| status.canonical_reason().unwrap_or("request failed").to_string());
            debug!(status = status.as_u16(), message = %message, "Request rejected");
            return Err(ClientError::Status {
                status: status.as_u16(),
                message,
            });
        }

        let bytes = response.bytes().await?;
        let body: &[u8] = if bytes.is_empty() { b"{}" } else { &bytes };
        serde_json::from_slice(body).map_err(|e| ClientError::Decode(e.to_string()))
    }
}

/// Pull a readable message out of an error body.
///
/// The center reports errors as `{"detail": ...}`; fall back to the raw body.
fn error_message(body: &str) -> Option<String> {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return None;
    }

    match serde_json::from_str::<serde_json::Value>(trimmed) {
        Ok(value) => match value.get("detail") {
            Some(serde_json::Value::String(detail)) => Some(detail.clone()),
            Some(detail) => Some(detail.to_string()),
            None => Some(trimmed.to_string()),
        },
        Err(_) => Some(trimmed.to_string()),
    }
}
