//! Scheduler unit client.
//!
//! The scheduler assigns ordinates to incoming messages and serves each
//! process's ordered log. The compute unit consumes it through
//! [`SchedulerClient`]; the `reqwest`-backed [`HttpScheduler`] is the
//! production implementation.

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use ao_cu_common::CuError;
use ao_cu_core::types::{Message, ModuleId, ProcessId, Tag};

/// Process metadata held by the scheduler.
#[derive(Debug, Clone, Deserialize)]
pub struct ProcessInfo {
    pub process_id: ProcessId,
    pub module_id: ModuleId,
    #[serde(default)]
    pub owner: Option<String>,
    #[serde(default)]
    pub tags: Vec<Tag>,
    /// Gas ceiling per message, declared by the module.
    pub compute_limit: u64,
    /// Linear-memory ceiling in bytes, declared by the module.
    pub memory_limit: u64,
}

/// The scheduler unit as consumed by the compute unit.
#[async_trait]
pub trait SchedulerClient: Send + Sync {
    /// Forward a raw signed data item for ordinate assignment.
    ///
    /// Returns the assigned transaction id and the target process.
    async fn post_message(&self, raw: Vec<u8>) -> Result<PostedMessage, CuError>;

    /// Metadata for a process.
    async fn fetch_process(&self, process_id: &str) -> Result<ProcessInfo, CuError>;

    /// The process's message log after the given position, in order.
    async fn fetch_messages(
        &self,
        process_id: &str,
        from: Option<&str>,
    ) -> Result<Vec<Message>, CuError>;
}

/// A message accepted by the scheduler.
#[derive(Debug, Clone, Deserialize)]
pub struct PostedMessage {
    pub id: String,
    pub process_id: ProcessId,
}

/// `reqwest`-backed scheduler client.
pub struct HttpScheduler {
    client: reqwest::Client,
    base_url: String,
}

/// One scheduled message as served by the scheduler.
#[derive(Debug, Deserialize)]
struct ScheduledMessage {
    #[serde(default)]
    id: Option<String>,
    timestamp: i64,
    block_height: i64,
    #[serde(default)]
    owner: Option<String>,
    #[serde(default)]
    tags: Vec<Tag>,
    ordinate: String,
    #[serde(default)]
    cron: Option<String>,
    #[serde(default)]
    deep_hash: Option<String>,
    #[serde(default)]
    no_save: bool,
    #[serde(default)]
    data: Option<serde_json::Value>,
}

impl From<ScheduledMessage> for Message {
    fn from(scheduled: ScheduledMessage) -> Self {
        Message {
            id: scheduled.id,
            timestamp: scheduled.timestamp,
            block_height: scheduled.block_height,
            owner: scheduled.owner,
            tags: scheduled.tags,
            data: scheduled.data,
            ordinate: scheduled.ordinate,
            cron: scheduled.cron,
            deep_hash: scheduled.deep_hash,
            no_save: scheduled.no_save,
        }
    }
}

impl HttpScheduler {
    /// Create a client against the given scheduler base URL.
    ///
    /// # Errors
    ///
    /// Returns [`CuError::InvalidConfig`] if the HTTP client cannot be built.
    pub fn new(base_url: impl Into<String>) -> Result<Self, CuError> {
        let client = reqwest::Client::builder()
            .connect_timeout(std::time::Duration::from_secs(10))
            .user_agent(concat!("ao-cu/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| CuError::invalid_config(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.into(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), path)
    }
}

#[async_trait]
impl SchedulerClient for HttpScheduler {
    async fn post_message(&self, raw: Vec<u8>) -> Result<PostedMessage, CuError> {
        let response = self
            .client
            .post(self.url("message"))
            .header("content-type", "application/octet-stream")
            .body(raw)
            .send()
            .await
            .map_err(|e| CuError::persistence(format!("scheduler unreachable: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(CuError::persistence(format!("scheduler status {status}")));
        }

        let posted: PostedMessage = response
            .json()
            .await
            .map_err(|e| CuError::persistence(format!("scheduler reply malformed: {e}")))?;
        debug!(id = %posted.id, process_id = %posted.process_id, "message forwarded to scheduler");
        Ok(posted)
    }

    async fn fetch_process(&self, process_id: &str) -> Result<ProcessInfo, CuError> {
        let response = self
            .client
            .get(self.url(&format!("processes/{process_id}")))
            .send()
            .await
            .map_err(|e| CuError::persistence(format!("scheduler unreachable: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(CuError::persistence(format!(
                "process {process_id} lookup failed: status {status}"
            )));
        }

        response
            .json()
            .await
            .map_err(|e| CuError::persistence(format!("process metadata malformed: {e}")))
    }

    async fn fetch_messages(
        &self,
        process_id: &str,
        from: Option<&str>,
    ) -> Result<Vec<Message>, CuError> {
        let mut request = self.client.get(self.url(&format!("{process_id}")));
        if let Some(from) = from {
            request = request.query(&[("from", from)]);
        }

        let response = request
            .send()
            .await
            .map_err(|e| CuError::persistence(format!("scheduler unreachable: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(CuError::persistence(format!(
                "message log fetch failed: status {status}"
            )));
        }

        let scheduled: Vec<ScheduledMessage> = response
            .json()
            .await
            .map_err(|e| CuError::persistence(format!("message log malformed: {e}")))?;
        Ok(scheduled.into_iter().map(Message::from).collect())
    }
}

impl std::fmt::Debug for HttpScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpScheduler")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}
