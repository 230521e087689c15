//! The execution worker: one message in, one evaluation output out.
//!
//! [`WasmWorker::invoke`] resolves or reuses the stream's live instance,
//! restores the incoming memory snapshot, calls the guest's `handle`
//! export on a blocking thread, and normalises the reply. Invocation
//! failures of any kind are caught and surfaced as an error output with
//! the pre-invocation memory; the worker never propagates them.
//!
//! Loading and instantiation failures do propagate (as [`InvokeError`],
//! which hands the memory snapshot back), and the evaluator converts them
//! into a per-message error output.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use ao_cu_common::CuError;

use crate::checkpoint::ResourceCaps;
use crate::engine::WasmEngine;
use crate::instance::{InstanceCache, InstanceHandle, ProcessInstance};
use crate::loader::ModuleLoader;
use crate::types::{AoGlobal, EvaluationOutput, Message, ModuleId, Output, ProcessId};

/// One invocation request.
#[derive(Debug)]
pub struct InvokeRequest {
    /// Scopes the live instance; at most one instance exists per stream.
    pub stream_id: String,
    pub module_id: ModuleId,
    pub process_id: ProcessId,
    /// Human-readable label for logging (message id or position).
    pub name: String,
    pub gas_limit: u64,
    pub mem_limit: u64,
    /// Decoded pre-invocation memory snapshot. Ownership transfers in; the
    /// worker returns it (in the output or the error) so the caller never
    /// holds two snapshots at once.
    pub memory: Vec<u8>,
    /// The sanitized message delivered to the guest.
    pub message: Message,
    pub ao_global: AoGlobal,
}

/// A failed invocation that never reached the guest, handing the memory
/// snapshot back to the caller.
#[derive(Debug)]
pub struct InvokeError {
    pub source: CuError,
    pub memory: Vec<u8>,
}

impl InvokeError {
    fn new(source: CuError, memory: Vec<u8>) -> Self {
        Self { source, memory }
    }
}

/// The evaluator's seam to message invocation.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Evaluate one message against the stream's instance.
    ///
    /// # Errors
    ///
    /// Returns [`InvokeError`] only for failures before the guest ran
    /// (module fetch, compile, instantiation, limit misconfiguration);
    /// the caller converts these into a per-message error output.
    async fn invoke(&self, request: InvokeRequest) -> Result<EvaluationOutput, InvokeError>;
}

/// Wasm-backed message handler over the layered module cache.
pub struct WasmWorker {
    engine: WasmEngine,
    loader: Arc<ModuleLoader>,
    instances: InstanceCache,
    caps: ResourceCaps,
}

impl WasmWorker {
    /// Create a worker with its own (never shared) instance cache.
    pub fn new(
        engine: WasmEngine,
        loader: Arc<ModuleLoader>,
        instance_cache_max_size: u64,
        max_memory: u64,
        max_compute: u64,
    ) -> Self {
        Self {
            engine,
            loader,
            instances: InstanceCache::new(instance_cache_max_size),
            caps: ResourceCaps {
                max_memory,
                max_compute,
            },
        }
    }

    /// The worker-local instance cache. Used by tests.
    pub fn instances(&self) -> &InstanceCache {
        &self.instances
    }

    /// Resolve or create the live instance for a stream.
    async fn instance_for(
        &self,
        request: &InvokeRequest,
    ) -> Result<InstanceHandle, CuError> {
        if let Some(handle) = self.instances.get(&request.stream_id) {
            debug!(stream_id = %request.stream_id, "instance cache hit");
            return Ok(handle);
        }

        let module = self.loader.load_compiled(&request.module_id).await?;
        let engine = self.engine.clone();
        let gas = request.gas_limit;
        let mem = request.mem_limit;

        let instance = tokio::task::spawn_blocking(move || {
            ProcessInstance::instantiate(&engine, &module, gas, mem)
        })
        .await
        .map_err(|e| CuError::instantiation(format!("instantiation task failed: {e}")))??;

        let handle: InstanceHandle = Arc::new(std::sync::Mutex::new(instance));
        self.instances
            .insert(request.stream_id.clone(), handle.clone());
        Ok(handle)
    }
}

#[async_trait]
impl MessageHandler for WasmWorker {
    async fn invoke(&self, request: InvokeRequest) -> Result<EvaluationOutput, InvokeError> {
        if self.caps.exceeds_max_memory(request.mem_limit) {
            return Err(InvokeError::new(
                CuError::invalid_config(format!(
                    "memory limit {} exceeds maximum {}",
                    request.mem_limit, self.caps.max_memory
                )),
                request.memory,
            ));
        }
        if self.caps.exceeds_max_compute(request.gas_limit) {
            return Err(InvokeError::new(
                CuError::invalid_config(format!(
                    "compute limit {} exceeds maximum {}",
                    request.gas_limit, self.caps.max_compute
                )),
                request.memory,
            ));
        }

        let handle = match self.instance_for(&request).await {
            Ok(handle) => handle,
            Err(source) => return Err(InvokeError::new(source, request.memory)),
        };

        let message_json = match serde_json::to_vec(&request.message) {
            Ok(bytes) => bytes,
            Err(e) => {
                return Ok(error_output(
                    format!("message serialization failed: {e}"),
                    request.memory,
                ));
            }
        };
        let env_json = match serde_json::to_vec(&request.ao_global) {
            Ok(bytes) => bytes,
            Err(e) => {
                return Ok(error_output(
                    format!("environment serialization failed: {e}"),
                    request.memory,
                ));
            }
        };

        let gas_limit = request.gas_limit;
        let memory = request.memory;
        let name = request.name.clone();

        // The guest runs on a blocking thread; fuel bounds a runaway
        // computation without stalling the evaluator's task.
        let joined = tokio::task::spawn_blocking(move || {
            let mut instance = match handle.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };

            let result = (|| -> Result<(Vec<u8>, Vec<u8>, u64), CuError> {
                instance.set_fuel(gas_limit)?;
                instance.write_memory(&memory)?;
                let reply = instance.call_handle(&message_json, &env_json)?;
                let gas_used = gas_limit.saturating_sub(instance.remaining_fuel());
                Ok((reply, instance.read_memory(), gas_used))
            })();

            (memory, result)
        })
        .await;

        let (memory, result) = match joined {
            Ok(outcome) => outcome,
            Err(e) => {
                // The snapshot died with the panicked thread
                return Err(InvokeError::new(
                    CuError::trap(format!("invocation task failed: {e}")),
                    Vec::new(),
                ));
            }
        };

        match result {
            Ok((reply, new_memory, gas_used)) => {
                Ok(normalize_reply(&name, &reply, memory, new_memory, gas_used))
            }
            Err(e) => {
                warn!(name = %name, error = %e, "invocation failed");
                Ok(error_output(e.to_string(), memory))
            }
        }
    }
}

impl std::fmt::Debug for WasmWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WasmWorker")
            .field("caps", &self.caps)
            .finish_non_exhaustive()
    }
}

/// The guest reply shape. Unknown fields are ignored.
#[derive(Debug, Default, Deserialize)]
struct GuestReply {
    #[serde(rename = "Error")]
    error: Option<Value>,

    #[serde(rename = "Messages", default)]
    messages: Vec<Value>,

    #[serde(rename = "Spawns", default)]
    spawns: Vec<Value>,

    #[serde(rename = "Output")]
    output: Option<Value>,
}

/// Build the error-case output: the error'd step is not allowed to mutate
/// persistent state, so the memory is the pre-invocation snapshot.
fn error_output(error: String, memory: Vec<u8>) -> EvaluationOutput {
    EvaluationOutput {
        memory: Some(memory),
        error: Some(error),
        ..Default::default()
    }
}

/// Parse and normalise the guest reply into an [`EvaluationOutput`].
fn normalize_reply(
    name: &str,
    reply: &[u8],
    pre_memory: Vec<u8>,
    new_memory: Vec<u8>,
    gas_used: u64,
) -> EvaluationOutput {
    let parsed: GuestReply = match serde_json::from_slice(reply) {
        Ok(parsed) => parsed,
        Err(e) => {
            warn!(name, error = %e, "guest reply was not valid JSON");
            return error_output(format!("malformed reply: {e}"), pre_memory);
        }
    };

    if let Some(error) = parsed.error {
        let description = match error {
            Value::String(s) => s,
            other => other.to_string(),
        };
        debug!(name, error = %description, "guest returned an error");
        return error_output(description, pre_memory);
    }

    EvaluationOutput {
        memory: Some(new_memory),
        error: None,
        messages: parsed.messages,
        spawns: parsed.spawns,
        output: normalize_guest_output(parsed.output),
        gas_used: Some(gas_used),
    }
}

/// Missing output defaults to the empty string; numbers become their
/// decimal string form; strings and objects pass through unchanged.
fn normalize_guest_output(output: Option<Value>) -> Output {
    match output {
        None | Some(Value::Null) => Output::default(),
        Some(Value::Number(n)) => Output::Text(n.to_string()),
        Some(Value::String(s)) => Output::Text(s),
        Some(other) => Output::Json(other),
    }
}
