//! Dependency-injected collaborator interfaces.
//!
//! The evaluator and loader never talk to SQL or the network directly;
//! they consume these traits. Production wiring injects the `reqwest`-backed
//! [`HttpGateway`] and a persistence implementation; tests inject in-memory
//! fakes.

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use futures::stream::BoxStream;

use ao_cu_common::CuError;

use crate::types::{Cursor, EvaluationOutput, ProcessId};

/// A byte stream from a gateway response body.
pub type ByteStream = BoxStream<'static, Result<Bytes, CuError>>;

/// One persisted evaluation record.
#[derive(Debug, Clone)]
pub struct SavedEvaluation {
    pub process_id: ProcessId,
    pub message_id: Option<String>,
    pub deep_hash: Option<String>,
    pub timestamp: i64,
    pub block_height: i64,
    pub ordinate: String,
    pub cron: Option<String>,
    /// The message's folded output, memory elided (snapshots are persisted
    /// separately through `save_latest_process_memory`).
    pub output: EvaluationOutput,
}

/// A previously evaluated message located by its deep hash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageHashRecord {
    pub deep_hash: String,
    pub process_id: ProcessId,
    pub timestamp: i64,
}

/// The final memory snapshot of an evaluator run.
#[derive(Debug, Clone)]
pub struct ProcessCheckpoint {
    pub process_id: ProcessId,
    pub memory: Vec<u8>,
    /// Position of the last successfully evaluated message, if any message
    /// was evaluated this run.
    pub cursor: Option<Cursor>,
}

/// Persistence consumed by the evaluator.
///
/// All failures are fatal for the run; implementations report them as
/// [`CuError::Persistence`].
#[async_trait]
pub trait EvaluationStore: Send + Sync {
    /// Idempotent persist of one `(processId, ordinate, timestamp)`
    /// evaluation record.
    async fn save_evaluation(&self, evaluation: &SavedEvaluation) -> Result<(), CuError>;

    /// Whether this deep hash was already evaluated for the process before
    /// the given lower bound. `Ok(None)` when not found.
    async fn find_message_hash_before(
        &self,
        deep_hash: &str,
        process_id: &str,
        lower_bound: Option<&str>,
    ) -> Result<Option<MessageHashRecord>, CuError>;

    /// Persist the final memory snapshot for a run.
    async fn save_latest_process_memory(
        &self,
        checkpoint: &ProcessCheckpoint,
    ) -> Result<(), CuError>;

    /// The most recent memory snapshot for a process, if one was persisted.
    async fn find_latest_process_memory(
        &self,
        process_id: &str,
    ) -> Result<Option<ProcessCheckpoint>, CuError>;
}

/// In-memory [`EvaluationStore`], used by tests and as the default wiring
/// when no external persistence is configured.
#[derive(Debug, Default)]
pub struct MemoryStore {
    evaluations: std::sync::Mutex<Vec<SavedEvaluation>>,
    hashes: dashmap::DashMap<(String, String), MessageHashRecord>,
    checkpoints: dashmap::DashMap<ProcessId, ProcessCheckpoint>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of persisted evaluation records.
    pub fn evaluation_count(&self) -> usize {
        self.evaluations.lock().expect("store lock").len()
    }
}

#[async_trait]
impl EvaluationStore for MemoryStore {
    async fn save_evaluation(&self, evaluation: &SavedEvaluation) -> Result<(), CuError> {
        if let Some(deep_hash) = &evaluation.deep_hash {
            self.hashes.insert(
                (evaluation.process_id.clone(), deep_hash.clone()),
                MessageHashRecord {
                    deep_hash: deep_hash.clone(),
                    process_id: evaluation.process_id.clone(),
                    timestamp: evaluation.timestamp,
                },
            );
        }
        self.evaluations
            .lock()
            .expect("store lock")
            .push(evaluation.clone());
        Ok(())
    }

    async fn find_message_hash_before(
        &self,
        deep_hash: &str,
        process_id: &str,
        _lower_bound: Option<&str>,
    ) -> Result<Option<MessageHashRecord>, CuError> {
        Ok(self
            .hashes
            .get(&(process_id.to_string(), deep_hash.to_string()))
            .map(|record| record.clone()))
    }

    async fn save_latest_process_memory(
        &self,
        checkpoint: &ProcessCheckpoint,
    ) -> Result<(), CuError> {
        self.checkpoints
            .insert(checkpoint.process_id.clone(), checkpoint.clone());
        Ok(())
    }

    async fn find_latest_process_memory(
        &self,
        process_id: &str,
    ) -> Result<Option<ProcessCheckpoint>, CuError> {
        Ok(self.checkpoints.get(process_id).map(|c| c.clone()))
    }
}

/// Source of raw module transactions.
#[async_trait]
pub trait GatewayClient: Send + Sync {
    /// Stream the body of transaction `id`.
    ///
    /// # Errors
    ///
    /// Returns [`CuError::ModuleFetch`] for transport failures and non-2xx
    /// responses.
    async fn stream_transaction_data(&self, id: &str) -> Result<ByteStream, CuError>;
}

/// `reqwest`-backed gateway client.
pub struct HttpGateway {
    client: reqwest::Client,
    base_url: String,
}

impl HttpGateway {
    /// Create a client against the given gateway base URL.
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
}

#[async_trait]
impl GatewayClient for HttpGateway {
    async fn stream_transaction_data(&self, id: &str) -> Result<ByteStream, CuError> {
        let url = format!("{}/raw/{}", self.base_url.trim_end_matches('/'), id);

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| CuError::module_fetch(id, e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(CuError::module_fetch(id, format!("gateway status {status}")));
        }

        let module_id = id.to_string();
        let stream = response
            .bytes_stream()
            .map(move |chunk| {
                chunk.map_err(|e| CuError::module_fetch(module_id.clone(), e.to_string()))
            })
            .boxed();

        Ok(stream)
    }
}
