//! Data model shared across the evaluation pipeline.
//!
//! [`Message`] is one scheduled input to a process; [`EvaluationOutput`] is
//! the folded result shape; [`Cursor`] is the resumable position after the
//! last successfully evaluated message.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Content-addressed identifier of an immutable Wasm binary.
pub type ModuleId = String;

/// Identifier of a long-lived process.
pub type ProcessId = String;

/// A single name/value tag on a message or process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    pub name: String,
    pub value: String,
}

impl Tag {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// One scheduled input to a process.
///
/// Serialization covers the fields the guest receives; evaluator-scoped
/// bookkeeping (`ordinate`, `cron`, `deep_hash`, `no_save`) never crosses
/// into the guest and is skipped.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Message {
    #[serde(rename = "Id", skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    #[serde(rename = "Timestamp")]
    pub timestamp: i64,

    #[serde(rename = "Block-Height")]
    pub block_height: i64,

    #[serde(rename = "Owner", skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,

    #[serde(rename = "Tags", default)]
    pub tags: Vec<Tag>,

    #[serde(rename = "Data", skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,

    /// Monotonic position within a scheduler epoch. Opaque to the guest.
    #[serde(skip)]
    pub ordinate: String,

    /// Recurring-schedule identifier, set only on cron messages.
    #[serde(skip)]
    pub cron: Option<String>,

    /// Content hash over the signed data item, used for cross-run dedup.
    #[serde(skip)]
    pub deep_hash: Option<String>,

    /// Marks bootstrapping messages whose evaluation is never persisted.
    #[serde(skip)]
    pub no_save: bool,
}

impl Message {
    /// Look up a tag value by name.
    pub fn tag(&self, name: &str) -> Option<&str> {
        self.tags
            .iter()
            .find(|t| t.name == name)
            .map(|t| t.value.as_str())
    }
}

/// Environment handed to the guest alongside each message.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AoGlobal {
    #[serde(rename = "Process")]
    pub process: ProcessMeta,

    #[serde(rename = "Module", skip_serializing_if = "Option::is_none")]
    pub module: Option<ModuleMeta>,
}

/// Process identity as seen by the guest.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProcessMeta {
    #[serde(rename = "Id")]
    pub id: ProcessId,

    #[serde(rename = "Owner", skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,

    #[serde(rename = "Tags", default)]
    pub tags: Vec<Tag>,
}

/// Module identity as seen by the guest.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModuleMeta {
    #[serde(rename = "Id")]
    pub id: ModuleId,

    #[serde(rename = "Tags", default)]
    pub tags: Vec<Tag>,
}

/// The guest's `Output` field: a plain string or a JSON object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Output {
    Text(String),
    Json(Value),
}

impl Default for Output {
    fn default() -> Self {
        Output::Text(String::new())
    }
}

impl Output {
    /// The output as a string slice when textual.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Output::Text(s) => Some(s),
            Output::Json(_) => None,
        }
    }
}

/// Result of evaluating one message, and the folded shape of a whole run.
///
/// On an error'd invocation `memory` is the pre-invocation snapshot; the
/// error'd step is not allowed to mutate persistent state.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EvaluationOutput {
    #[serde(rename = "Memory", skip_serializing_if = "Option::is_none")]
    pub memory: Option<Vec<u8>>,

    #[serde(rename = "Error", skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    #[serde(rename = "Messages", default)]
    pub messages: Vec<Value>,

    #[serde(rename = "Spawns", default)]
    pub spawns: Vec<Value>,

    #[serde(rename = "Output", default)]
    pub output: Output,

    #[serde(rename = "GasUsed", skip_serializing_if = "Option::is_none")]
    pub gas_used: Option<u64>,
}

/// The resumable position after the last successfully evaluated message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cursor {
    pub timestamp: i64,
    pub block_height: i64,
    pub ordinate: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cron: Option<String>,
}

impl Cursor {
    /// The cursor position of a message, taken as it is evaluated.
    pub fn of(message: &Message) -> Self {
        Self {
            timestamp: message.timestamp,
            block_height: message.block_height,
            ordinate: message.ordinate.clone(),
            cron: message.cron.clone(),
        }
    }
}

/// Counters accumulated over one evaluator run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvalStats {
    pub messages: MessageStats,
}

/// Per-message counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageStats {
    /// Messages taken from the scheduler's log.
    pub scheduled: u64,
    /// Messages generated by a recurring schedule.
    pub cron: u64,
    /// Invocations that produced an error output.
    pub error: u64,
}

/// Everything an evaluator run needs: identity, limits, the seed state,
/// and the lazy ordered message sequence.
pub struct EvaluationContext {
    /// The process being evaluated.
    pub id: ProcessId,

    /// Lower bound in the message log this run starts from, if resuming.
    pub from: Option<String>,

    /// The process's module.
    pub module_id: ModuleId,

    /// Gas ceiling per message invocation.
    pub module_compute_limit: u64,

    /// Linear-memory ceiling in bytes.
    pub module_memory_limit: u64,

    /// Environment handed to the guest.
    pub ao_global: AoGlobal,

    /// Counters carried into the run, usually zeroed.
    pub stats: EvalStats,

    /// Seed state; `result.memory` holds the starting snapshot.
    pub result: EvaluationOutput,

    /// Encoding of the seed memory snapshot (`None` or `Some("gzip")`).
    pub memory_encoding: Option<String>,

    /// Lazy ordered message sequence. Errors abort the run.
    pub messages: MessageStream,
}

/// A lazy ordered sequence of messages.
pub type MessageStream =
    futures::stream::BoxStream<'static, Result<Message, ao_cu_common::CuError>>;

/// Identifier of one evaluation pass, scoping the live instance it holds.
pub fn stream_id(process_id: &str, from: Option<&str>) -> String {
    format!("{}@{}", process_id, from.unwrap_or("genesis"))
}
