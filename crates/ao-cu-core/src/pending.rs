//! One evaluator per process at a time.
//!
//! [`PendingEvaluations`] holds a per-process gate; a request for a process
//! whose evaluation is already in flight queues behind it rather than
//! racing it. Gates are dropped once nothing is queued.

use std::future::Future;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::debug;

use crate::types::ProcessId;

/// Registry of in-flight evaluations, keyed by process.
#[derive(Debug, Default)]
pub struct PendingEvaluations {
    inner: DashMap<ProcessId, Arc<Mutex<()>>>,
}

impl PendingEvaluations {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `work` while holding the process's gate.
    ///
    /// Callers for the same process serialize in arrival order; callers
    /// for different processes proceed concurrently.
    pub async fn run<F, T>(&self, process_id: &str, work: F) -> T
    where
        F: Future<Output = T>,
    {
        let gate = self
            .inner
            .entry(process_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();

        let result = {
            let _guard = gate.lock().await;
            work.await
        };

        drop(gate);
        // Drop the gate once no other caller is queued on it
        let removed = self
            .inner
            .remove_if(process_id, |_, gate| Arc::strong_count(gate) == 1);
        if removed.is_some() {
            debug!(process_id, "pending evaluation gate released");
        }

        result
    }

    /// Number of processes with a registered gate.
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Whether no gate is registered.
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}
