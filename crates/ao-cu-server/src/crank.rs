//! Message routing: forward to the scheduler, then crank.
//!
//! Cranking is the recursive act of processing outbound messages emitted
//! by a process as if they were new inputs: each one is forwarded to the
//! scheduler for an ordinate and its target process is evaluated in turn,
//! depth-first in emission order, until the tree is exhausted or the hop
//! cap is reached.

use std::sync::Arc;

use futures::StreamExt;
use serde_json::Value;
use tracing::{debug, info, warn};

use ao_cu_common::CuError;
use ao_cu_core::evaluate::{CancelSignal, EvalResult, Evaluator};
use ao_cu_core::types::{
    AoGlobal, EvalStats, EvaluationContext, EvaluationOutput, ModuleMeta, ProcessMeta,
};
use ao_cu_core::{EvaluationStore, PendingEvaluations};

use crate::scheduler::SchedulerClient;

/// Upper bound on processes visited in one crank walk.
const MAX_CRANK_HOPS: usize = 100;

/// A message accepted for processing.
#[derive(Debug, Clone)]
pub struct Routed {
    /// The transaction id the scheduler assigned.
    pub tx_id: String,
    /// The process the message targets.
    pub process_id: String,
}

/// Forwards raw messages and follows their transitive message trees.
pub struct CuRouter {
    scheduler: Arc<dyn SchedulerClient>,
    store: Arc<dyn EvaluationStore>,
    evaluator: Arc<Evaluator>,
    pending: Arc<PendingEvaluations>,
}

impl CuRouter {
    pub fn new(
        scheduler: Arc<dyn SchedulerClient>,
        store: Arc<dyn EvaluationStore>,
        evaluator: Arc<Evaluator>,
        pending: Arc<PendingEvaluations>,
    ) -> Self {
        Self {
            scheduler,
            store,
            evaluator,
            pending,
        }
    }

    /// Forward a raw signed message to the scheduler.
    ///
    /// # Errors
    ///
    /// Returns the scheduler failure; nothing was accepted.
    pub async fn route(&self, raw: Vec<u8>) -> Result<Routed, CuError> {
        let posted = self.scheduler.post_message(raw).await?;
        Ok(Routed {
            tx_id: posted.id,
            process_id: posted.process_id,
        })
    }

    /// Follow the transitive message tree rooted at a process, depth-first
    /// in emission order: an outbound message's whole subtree is exhausted
    /// before its next sibling is visited.
    ///
    /// Best-effort: failures on one branch are logged and the walk
    /// continues with the rest of the tree.
    pub async fn crank(&self, process_id: &str) {
        let mut stack = vec![process_id.to_string()];
        let mut hops = 0;

        while let Some(pid) = stack.pop() {
            if hops >= MAX_CRANK_HOPS {
                warn!(remaining = stack.len() + 1, "crank hop cap reached; stopping walk");
                break;
            }
            hops += 1;

            let result = match self.evaluate_process(&pid).await {
                Ok(result) => result,
                Err(e) => {
                    warn!(process_id = %pid, error = %e, "crank branch failed");
                    continue;
                }
            };

            let mut descendants = Vec::new();
            for outbound in &result.output.messages {
                let Some(target) = outbound.get("Target").and_then(Value::as_str) else {
                    debug!(process_id = %pid, "outbound message without target; dropped");
                    continue;
                };
                let raw = match serde_json::to_vec(outbound) {
                    Ok(raw) => raw,
                    Err(e) => {
                        warn!(process_id = %pid, error = %e, "outbound message unencodable");
                        continue;
                    }
                };
                match self.scheduler.post_message(raw).await {
                    Ok(posted) => {
                        debug!(id = %posted.id, target, "outbound message scheduled");
                        descendants.push(target.to_string());
                    }
                    Err(e) => warn!(target, error = %e, "outbound message forward failed"),
                }
            }

            // Reversed so the first-emitted target is popped next
            stack.extend(descendants.into_iter().rev());
        }

        info!(process_id, hops, "crank complete");
    }

    /// Evaluate a process's unevaluated message suffix, one run at a time
    /// per process.
    async fn evaluate_process(&self, process_id: &str) -> Result<EvalResult, CuError> {
        let info = self.scheduler.fetch_process(process_id).await?;

        let checkpoint = self.store.find_latest_process_memory(process_id).await?;
        let (seed_memory, from) = match checkpoint {
            Some(checkpoint) => (
                checkpoint.memory,
                checkpoint.cursor.map(|cursor| cursor.ordinate),
            ),
            None => (Vec::new(), None),
        };

        let messages = self
            .scheduler
            .fetch_messages(process_id, from.as_deref())
            .await?;
        debug!(process_id, count = messages.len(), "message suffix fetched");

        let ctx = EvaluationContext {
            id: info.process_id.clone(),
            from,
            module_id: info.module_id.clone(),
            module_compute_limit: info.compute_limit,
            module_memory_limit: info.memory_limit,
            ao_global: AoGlobal {
                process: ProcessMeta {
                    id: info.process_id,
                    owner: info.owner,
                    tags: info.tags,
                },
                module: Some(ModuleMeta {
                    id: info.module_id,
                    tags: Vec::new(),
                }),
            },
            stats: EvalStats::default(),
            result: EvaluationOutput {
                memory: Some(seed_memory),
                ..Default::default()
            },
            memory_encoding: None,
            messages: futures::stream::iter(messages.into_iter().map(Ok)).boxed(),
        };

        self.pending
            .run(process_id, self.evaluator.evaluate(ctx, &CancelSignal::new()))
            .await
    }
}

impl std::fmt::Debug for CuRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CuRouter").finish_non_exhaustive()
    }
}
