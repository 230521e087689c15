//! The evaluator: a strictly sequential fold over a process's message log.
//!
//! For each message on the lazy ordered stream the evaluator deduplicates,
//! sanitises privileged tags, invokes the execution worker, folds the
//! output into the running result, and persists the evaluation when the
//! message allows it. The final folded memory is checkpointed exactly once
//! at end of stream or cancellation.
//!
//! A malformed message never terminates a run; only persistence failures
//! (and message-stream failures) do.

use std::collections::HashSet;
use std::io::Read;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use flate2::read::GzDecoder;
use futures::StreamExt;
use tracing::{debug, info, warn};

use ao_cu_common::CuError;

use crate::dal::{EvaluationStore, ProcessCheckpoint, SavedEvaluation};
use crate::types::{
    Cursor, EvalStats, EvaluationContext, EvaluationOutput, Message, stream_id,
};
use crate::worker::{InvokeRequest, MessageHandler};

/// Tags reserved for values the scheduler itself populates; they are
/// stripped from a message before it reaches the guest.
const PRIVILEGED_TAGS: &[&str] = &["From", "Owner", "From-Process", "From-Module"];

/// Cooperative cancellation for an evaluator run.
///
/// Checked between messages: the in-flight invocation always completes to
/// a consistent state and the final checkpoint is still written.
#[derive(Debug, Clone, Default)]
pub struct CancelSignal {
    flag: Arc<AtomicBool>,
}

impl CancelSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// The outcome of one evaluator run.
#[derive(Debug, Clone)]
pub struct EvalResult {
    /// The folded evaluation output; `memory` is the final snapshot.
    pub output: EvaluationOutput,
    /// Position of the last successfully evaluated message, if any.
    pub last: Option<Cursor>,
    /// Counters accumulated over the run.
    pub stats: EvalStats,
}

/// Drives evaluation runs against an injected handler and store.
pub struct Evaluator {
    handler: Arc<dyn MessageHandler>,
    store: Arc<dyn EvaluationStore>,
}

impl Evaluator {
    pub fn new(handler: Arc<dyn MessageHandler>, store: Arc<dyn EvaluationStore>) -> Self {
        Self { handler, store }
    }

    /// Consume the context's message stream in order and fold the results.
    ///
    /// Deterministic: two runs with identical module, seed memory, and
    /// message sequence produce identical results. The stream is never
    /// reordered, and message `n + 1` is not touched until message `n` is
    /// fully folded.
    ///
    /// # Errors
    ///
    /// Returns [`CuError::Persistence`] when a store call fails, or the
    /// stream's own error when fetching the next message fails. Both leave
    /// the in-memory fold consistent, so a retry against the same inputs
    /// is safe.
    pub async fn evaluate(
        &self,
        ctx: EvaluationContext,
        cancel: &CancelSignal,
    ) -> Result<EvalResult, CuError> {
        let EvaluationContext {
            id,
            from,
            module_id,
            module_compute_limit,
            module_memory_limit,
            ao_global,
            mut stats,
            mut result,
            memory_encoding,
            mut messages,
        } = ctx;

        decode_seed_memory(&mut result, memory_encoding.as_deref())?;

        let stream_key = stream_id(&id, from.as_deref());
        info!(process_id = %id, stream = %stream_key, "evaluation stream opened");

        let mut last: Option<Cursor> = None;
        let mut seen_cron: HashSet<(String, i64, String)> = HashSet::new();
        let mut prev_position: Option<(f64, i64)> = None;
        let mut index: u64 = 0;

        while let Some(next) = messages.next().await {
            if cancel.is_cancelled() {
                info!(process_id = %id, "evaluation cancelled; checkpointing");
                break;
            }

            let message = next?;
            index += 1;

            check_ordering(&message, &mut prev_position);

            if message.cron.is_some() {
                stats.messages.cron += 1;
            } else {
                stats.messages.scheduled += 1;
            }

            let name = message
                .id
                .clone()
                .unwrap_or_else(|| format!("message {index}"));

            if let Some(deep_hash) = &message.deep_hash {
                let found = self
                    .store
                    .find_message_hash_before(deep_hash, &id, from.as_deref())
                    .await?;
                if found.is_some() {
                    debug!(name, deep_hash, "skipping message: deep hash already evaluated");
                    continue;
                }
            }

            if let Some(cron) = &message.cron {
                let key = (cron.clone(), message.timestamp, message.ordinate.clone());
                if !seen_cron.insert(key) {
                    debug!(name, cron, "skipping duplicate cron message within run");
                    continue;
                }
            }

            let request = InvokeRequest {
                stream_id: stream_key.clone(),
                module_id: module_id.clone(),
                process_id: id.clone(),
                name: name.clone(),
                gas_limit: module_compute_limit,
                mem_limit: module_memory_limit,
                memory: result.memory.take().unwrap_or_default(),
                message: sanitize(&message),
                ao_global: ao_global.clone(),
            };

            let output = match self.handler.invoke(request).await {
                Ok(output) => output,
                Err(failed) => {
                    warn!(name, error = %failed.source, "invocation could not start");
                    EvaluationOutput {
                        memory: Some(failed.memory),
                        error: Some(failed.source.to_string()),
                        ..Default::default()
                    }
                }
            };

            let errored = output.error.is_some();
            if errored {
                stats.messages.error += 1;
                debug!(name, error = output.error.as_deref().unwrap_or(""), "message errored");
            }

            // Fold: the worker already rolled memory back on error, so the
            // output becomes the running result wholesale. The previous
            // snapshot was moved into the request and is gone.
            result = output;

            if !message.no_save && !errored {
                self.store
                    .save_evaluation(&SavedEvaluation {
                        process_id: id.clone(),
                        message_id: message.id.clone(),
                        deep_hash: message.deep_hash.clone(),
                        timestamp: message.timestamp,
                        block_height: message.block_height,
                        ordinate: message.ordinate.clone(),
                        cron: message.cron.clone(),
                        output: EvaluationOutput {
                            memory: None,
                            ..result.clone()
                        },
                    })
                    .await?;
            }

            last = Some(Cursor::of(&message));
        }

        self.store
            .save_latest_process_memory(&ProcessCheckpoint {
                process_id: id.clone(),
                memory: result.memory.clone().unwrap_or_default(),
                cursor: last.clone(),
            })
            .await?;

        info!(
            process_id = %id,
            scheduled = stats.messages.scheduled,
            cron = stats.messages.cron,
            errors = stats.messages.error,
            "evaluation stream complete"
        );

        Ok(EvalResult {
            output: result,
            last,
            stats,
        })
    }
}

impl std::fmt::Debug for Evaluator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Evaluator").finish_non_exhaustive()
    }
}

/// Decode the seed snapshot so the run folds over raw bytes.
fn decode_seed_memory(
    result: &mut EvaluationOutput,
    encoding: Option<&str>,
) -> Result<(), CuError> {
    match encoding {
        None | Some("none") => Ok(()),
        Some("gzip") => {
            let compressed = result.memory.take().unwrap_or_default();
            if compressed.is_empty() {
                result.memory = Some(Vec::new());
                return Ok(());
            }
            let mut decoder = GzDecoder::new(compressed.as_slice());
            let mut decoded = Vec::new();
            decoder.read_to_end(&mut decoded)?;
            result.memory = Some(decoded);
            Ok(())
        }
        Some(other) => Err(CuError::unsupported_encoding(other)),
    }
}

/// Remove privileged tags before the message reaches the guest.
fn sanitize(message: &Message) -> Message {
    let mut sanitized = message.clone();
    sanitized
        .tags
        .retain(|tag| !PRIVILEGED_TAGS.contains(&tag.name.as_str()));
    sanitized
}

/// Inputs violating `(ordinate, timestamp)` order are caller error, never
/// silently reordered.
fn check_ordering(message: &Message, prev: &mut Option<(f64, i64)>) {
    let Ok(ordinate) = message.ordinate.parse::<f64>() else {
        return;
    };
    let position = (ordinate, message.timestamp);
    if let Some(previous) = *prev {
        let out_of_order = position.0 < previous.0
            || (position.0 == previous.0 && position.1 < previous.1);
        if out_of_order {
            warn!(
                ordinate = message.ordinate,
                timestamp = message.timestamp,
                "message stream out of order; caller error"
            );
            debug_assert!(!out_of_order, "message stream out of order");
        }
    }
    *prev = Some(position);
}
