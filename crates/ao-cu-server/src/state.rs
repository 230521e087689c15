//! Shared application state.
//!
//! [`AppState`] wires the evaluation pipeline once at startup and is
//! cloned into every request handler.

use std::sync::Arc;

use ao_cu_common::{CuConfig, CuError};
use ao_cu_core::evaluate::Evaluator;
use ao_cu_core::{
    BinaryStore, EvaluationStore, HttpGateway, ModuleCache, ModuleLoader, PendingEvaluations,
    WasmEngine, WasmWorker,
};

use crate::crank::CuRouter;
use crate::scheduler::SchedulerClient;

/// Shared state across all request handlers.
#[derive(Clone)]
pub struct AppState {
    config: Arc<CuConfig>,
    router: Arc<CuRouter>,
}

impl AppState {
    /// Wire the full pipeline: engine, layered caches, worker, evaluator,
    /// and the message router.
    ///
    /// # Errors
    ///
    /// Returns an error when the engine cannot be created or the binary
    /// directory cannot be prepared.
    pub async fn new(
        config: &CuConfig,
        scheduler: Arc<dyn SchedulerClient>,
        store: Arc<dyn EvaluationStore>,
    ) -> Result<Self, CuError> {
        let engine = WasmEngine::new(&config.wasm)?;

        let binaries = BinaryStore::new(&config.wasm.binary_file_directory).await?;
        let gateway = Arc::new(HttpGateway::new(&config.wasm.gateway_url)?);
        let loader = Arc::new(ModuleLoader::new(
            engine.clone(),
            ModuleCache::new(config.wasm.module_cache_max_size),
            binaries,
            gateway,
        ));

        let worker = Arc::new(WasmWorker::new(
            engine,
            loader,
            config.wasm.instance_cache_max_size,
            config.wasm.process_memory_max_limit,
            config.wasm.process_compute_max_limit,
        ));

        let evaluator = Arc::new(Evaluator::new(worker, store.clone()));
        let pending = Arc::new(PendingEvaluations::new());
        let router = Arc::new(CuRouter::new(scheduler, store, evaluator, pending));

        Ok(Self {
            config: Arc::new(config.clone()),
            router,
        })
    }

    /// The message router.
    pub fn router(&self) -> &Arc<CuRouter> {
        &self.router
    }

    /// The loaded configuration.
    pub fn config(&self) -> &CuConfig {
        &self.config
    }
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::{PostedMessage, ProcessInfo};
    use ao_cu_core::MemoryStore;
    use ao_cu_core::types::Message;
    use async_trait::async_trait;

    struct NullScheduler;

    #[async_trait]
    impl SchedulerClient for NullScheduler {
        async fn post_message(&self, _raw: Vec<u8>) -> Result<PostedMessage, CuError> {
            Err(CuError::persistence("no scheduler in this test"))
        }

        async fn fetch_process(&self, _process_id: &str) -> Result<ProcessInfo, CuError> {
            Err(CuError::persistence("no scheduler in this test"))
        }

        async fn fetch_messages(
            &self,
            _process_id: &str,
            _from: Option<&str>,
        ) -> Result<Vec<Message>, CuError> {
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn test_app_state_wiring() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = CuConfig::default();
        config.wasm.binary_file_directory = dir.path().display().to_string();

        let state = AppState::new(
            &config,
            Arc::new(NullScheduler),
            Arc::new(MemoryStore::new()),
        )
        .await;

        assert!(state.is_ok());
    }
}
