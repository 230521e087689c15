//! Module resolution across the layered cache.
//!
//! [`ModuleLoader::load_compiled`] tries, in order: the compiled-module
//! cache, the on-disk binary store, and the remote gateway. A success at a
//! lower layer fills every layer above it, so the next resolution of the
//! same id is a cache hit.

use std::sync::Arc;

use futures::TryStreamExt;
use tracing::{debug, info, warn};

use ao_cu_common::CuError;

use crate::artifact::{BinaryStore, GzSink, ModuleCache, log_disk_failure};
use crate::dal::GatewayClient;
use crate::engine::WasmEngine;
use crate::module::CompiledModule;
use crate::types::ModuleId;

/// Resolves content-addressed module ids to compiled modules.
///
/// Shared across workers; insertions into both cache layers are idempotent
/// because module ids are content-addressed.
pub struct ModuleLoader {
    engine: WasmEngine,
    cache: ModuleCache,
    binaries: BinaryStore,
    gateway: Arc<dyn GatewayClient>,
}

impl ModuleLoader {
    /// Create a loader over the given cache layers and gateway.
    pub fn new(
        engine: WasmEngine,
        cache: ModuleCache,
        binaries: BinaryStore,
        gateway: Arc<dyn GatewayClient>,
    ) -> Self {
        Self {
            engine,
            cache,
            binaries,
            gateway,
        }
    }

    /// Resolve a module id to a compiled module.
    ///
    /// # Errors
    ///
    /// Returns [`CuError::ModuleFetch`] when every source fails to produce
    /// the binary, or [`CuError::Compile`] when the binary does not compile.
    pub async fn load_compiled(&self, module_id: &ModuleId) -> Result<CompiledModule, CuError> {
        if let Some(module) = self.cache.get(module_id) {
            debug!(module_id, "compiled module cache hit");
            return Ok(module);
        }

        if let Some(wasm) = self.read_disk(module_id).await {
            debug!(module_id, "disk binary cache hit");
            let module = self.compile(module_id.clone(), wasm).await?;
            self.cache.insert(module.clone());
            return Ok(module);
        }

        self.load_from_gateway(module_id).await
    }

    /// Read the disk layer, demoting read failures to a miss.
    async fn read_disk(&self, module_id: &str) -> Option<Vec<u8>> {
        match self.binaries.read(module_id).await {
            Ok(found) => found,
            Err(e) => {
                warn!(module_id, error = %e, "disk binary unreadable; falling through to gateway");
                None
            }
        }
    }

    /// Fetch from the gateway, teeing the body into a gzip sink bound for
    /// disk and a buffer bound for the compiler.
    async fn load_from_gateway(&self, module_id: &ModuleId) -> Result<CompiledModule, CuError> {
        info!(module_id, "fetching module from gateway");

        let mut stream = self.gateway.stream_transaction_data(module_id).await?;

        let mut gz = GzSink::new();
        let mut wasm = Vec::new();
        while let Some(chunk) = stream.try_next().await? {
            gz.push(&chunk)
                .map_err(|e| CuError::module_fetch(module_id.clone(), e))?;
            wasm.extend_from_slice(&chunk);
        }
        let gz_bytes = gz
            .finish()
            .map_err(|e| CuError::module_fetch(module_id.clone(), e))?;

        // Two sinks: persist to disk while the compiler runs
        let (compiled, written) = tokio::join!(
            self.compile(module_id.clone(), wasm),
            self.binaries.write_compressed(module_id, gz_bytes),
        );

        if let Err(e) = written {
            log_disk_failure(&e);
        }

        let module = compiled?;
        self.cache.insert(module.clone());
        Ok(module)
    }

    /// Compile on a blocking thread; compilation is CPU-bound.
    async fn compile(&self, module_id: ModuleId, wasm: Vec<u8>) -> Result<CompiledModule, CuError> {
        let engine = self.engine.clone();
        tokio::task::spawn_blocking(move || CompiledModule::from_bytes(&engine, module_id, &wasm))
            .await
            .map_err(|e| CuError::compile(format!("compile task failed: {e}")))?
    }

    /// The compiled-module cache backing this loader.
    pub fn cache(&self) -> &ModuleCache {
        &self.cache
    }

    /// The binary store backing this loader.
    pub fn binaries(&self) -> &BinaryStore {
        &self.binaries
    }
}

impl std::fmt::Debug for ModuleLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleLoader").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dal::ByteStream;
    use async_trait::async_trait;
    use bytes::Bytes;
    use futures::StreamExt;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const MINIMAL_WASM: &[u8] = &[0x00, 0x61, 0x73, 0x6d, 0x01, 0x00, 0x00, 0x00];

    /// Serves one fixed binary, counting fetches.
    struct FixedGateway {
        body: Vec<u8>,
        fetches: AtomicUsize,
        fail: bool,
    }

    impl FixedGateway {
        fn new(body: &[u8]) -> Self {
            Self {
                body: body.to_vec(),
                fetches: AtomicUsize::new(0),
                fail: false,
            }
        }

        fn failing() -> Self {
            Self {
                body: Vec::new(),
                fetches: AtomicUsize::new(0),
                fail: true,
            }
        }
    }

    #[async_trait]
    impl GatewayClient for FixedGateway {
        async fn stream_transaction_data(&self, id: &str) -> Result<ByteStream, CuError> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(CuError::module_fetch(id, "gateway status 404"));
            }
            // Two chunks to exercise incremental feeding
            let mid = self.body.len() / 2;
            let chunks = vec![
                Ok(Bytes::copy_from_slice(&self.body[..mid])),
                Ok(Bytes::copy_from_slice(&self.body[mid..])),
            ];
            Ok(futures::stream::iter(chunks).boxed())
        }
    }

    async fn loader_with(gateway: Arc<FixedGateway>) -> (ModuleLoader, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let engine = WasmEngine::new(&Default::default()).unwrap();
        let binaries = BinaryStore::new(dir.path()).await.unwrap();
        let loader = ModuleLoader::new(engine, ModuleCache::new(4), binaries, gateway);
        (loader, dir)
    }

    #[tokio::test]
    async fn test_gateway_fetch_fills_all_layers() {
        let gateway = Arc::new(FixedGateway::new(MINIMAL_WASM));
        let (loader, _dir) = loader_with(gateway.clone()).await;
        let id = "mod-1".to_string();

        let module = loader.load_compiled(&id).await.unwrap();
        assert_eq!(module.module_id(), "mod-1");

        // Disk layer was filled with an equivalent binary
        let on_disk = loader.binaries().read("mod-1").await.unwrap().unwrap();
        assert_eq!(on_disk, MINIMAL_WASM);

        // Second resolve is a cache hit: no further fetch
        loader.load_compiled(&id).await.unwrap();
        assert_eq!(gateway.fetches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_disk_hit_skips_gateway() {
        let gateway = Arc::new(FixedGateway::failing());
        let (loader, _dir) = loader_with(gateway.clone()).await;
        let id = "mod-1".to_string();

        loader.binaries().write("mod-1", MINIMAL_WASM).await.unwrap();

        let module = loader.load_compiled(&id).await.unwrap();
        assert_eq!(module.module_id(), "mod-1");
        assert_eq!(gateway.fetches.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_gateway_error_bubbles() {
        let gateway = Arc::new(FixedGateway::failing());
        let (loader, _dir) = loader_with(gateway).await;

        let result = loader.load_compiled(&"absent".to_string()).await;
        assert!(matches!(result, Err(CuError::ModuleFetch { .. })));
    }

    #[tokio::test]
    async fn test_invalid_binary_is_compile_error() {
        let gateway = Arc::new(FixedGateway::new(b"not wasm, definitely"));
        let (loader, _dir) = loader_with(gateway).await;

        let result = loader.load_compiled(&"garbled".to_string()).await;
        assert!(matches!(result, Err(CuError::Compile { .. })));
    }
}
