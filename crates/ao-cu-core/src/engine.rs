//! Wasmtime engine configuration and creation.
//!
//! The [`WasmEngine`] is shared across all workers. It is configured with
//! fuel metering so every message invocation runs under a deterministic
//! compute limit; memory ceilings are applied per store at instantiation.

use std::sync::Arc;

use tracing::info;
use wasmtime::{Config, Engine, OptLevel};

use ao_cu_common::{CuError, WasmSection};

/// Thread-safe WebAssembly engine wrapper.
///
/// The engine owns compilation settings and JIT code; it holds no
/// per-process state. Process isolation lives in the per-stream
/// [`wasmtime::Store`] created by the instance layer.
#[derive(Clone)]
pub struct WasmEngine {
    engine: Arc<Engine>,
}

impl WasmEngine {
    /// Create a new WebAssembly engine for the given pipeline configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the Wasmtime configuration is invalid.
    pub fn new(config: &WasmSection) -> Result<Self, CuError> {
        let mut wasmtime_config = Config::new();

        // Fuel metering backs the per-message gas limit
        wasmtime_config.consume_fuel(true);

        wasmtime_config.cranelift_opt_level(OptLevel::Speed);

        let engine = Engine::new(&wasmtime_config)
            .map_err(|e| CuError::invalid_config(format!("Failed to create Wasmtime engine: {e}")))?;

        info!(
            module_cache_max = config.module_cache_max_size,
            instance_cache_max = config.instance_cache_max_size,
            "Wasmtime engine initialized"
        );

        Ok(Self {
            engine: Arc::new(engine),
        })
    }

    /// Get a reference to the inner Wasmtime engine.
    pub fn inner(&self) -> &Engine {
        &self.engine
    }
}

impl std::fmt::Debug for WasmEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WasmEngine").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_creation() {
        let config = WasmSection::default();
        let engine = WasmEngine::new(&config);
        assert!(engine.is_ok());
    }

    #[test]
    fn test_engine_debug() {
        let config = WasmSection::default();
        let engine = WasmEngine::new(&config).unwrap();
        assert!(format!("{engine:?}").contains("WasmEngine"));
    }
}
