//! WebAssembly module compilation.
//!
//! [`CompiledModule`] wraps a Wasmtime [`Module`] together with the
//! content-addressed identity it was resolved from. Compilation is
//! CPU-bound; callers on the async path run it on a blocking thread.

use std::time::Instant;

use tracing::{debug, info};
use wasmtime::Module;

use ao_cu_common::CuError;

use crate::engine::WasmEngine;
use crate::types::ModuleId;

/// A compiled WebAssembly module.
///
/// Cheap to clone; the underlying Wasmtime module is reference-counted and
/// thread-safe, so one compilation serves every stream of the same module.
#[derive(Clone)]
pub struct CompiledModule {
    inner: Module,
    module_id: ModuleId,
    binary_len: usize,
}

impl CompiledModule {
    /// Compile a module from raw WebAssembly bytes.
    ///
    /// # Errors
    ///
    /// Returns [`CuError::Compile`] if the bytes are not a valid module.
    pub fn from_bytes(
        engine: &WasmEngine,
        module_id: ModuleId,
        bytes: &[u8],
    ) -> Result<Self, CuError> {
        let start = Instant::now();

        validate_wasm_header(bytes)?;

        let module = Module::new(engine.inner(), bytes)
            .map_err(|e| CuError::compile(format!("module compilation failed: {e}")))?;

        info!(
            module_id = %module_id,
            bytes = bytes.len(),
            duration_ms = start.elapsed().as_millis(),
            "Module compiled"
        );

        Ok(Self {
            inner: module,
            module_id,
            binary_len: bytes.len(),
        })
    }

    /// Compile a module from WAT text. Primarily for tests.
    ///
    /// # Errors
    ///
    /// Returns [`CuError::Compile`] if the text does not compile.
    pub fn from_wat(
        engine: &WasmEngine,
        module_id: ModuleId,
        wat: &str,
    ) -> Result<Self, CuError> {
        let module = Module::new(engine.inner(), wat)
            .map_err(|e| CuError::compile(format!("WAT compilation failed: {e}")))?;

        debug!(module_id = %module_id, "WAT module compiled");

        Ok(Self {
            inner: module,
            module_id,
            binary_len: wat.len(),
        })
    }

    /// The content-addressed identity this module was resolved from.
    pub fn module_id(&self) -> &str {
        &self.module_id
    }

    /// Size of the source binary in bytes.
    pub fn binary_len(&self) -> usize {
        self.binary_len
    }

    /// Get the inner Wasmtime module.
    pub fn inner(&self) -> &Module {
        &self.inner
    }
}

impl std::fmt::Debug for CompiledModule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledModule")
            .field("module_id", &self.module_id)
            .field("binary_len", &self.binary_len)
            .finish_non_exhaustive()
    }
}

/// Validate the WebAssembly header (magic number).
fn validate_wasm_header(bytes: &[u8]) -> Result<(), CuError> {
    if bytes.len() < 8 {
        return Err(CuError::compile("invalid Wasm: file too small"));
    }

    // \0asm
    if &bytes[0..4] != b"\0asm" {
        return Err(CuError::compile("invalid Wasm: bad magic number"));
    }

    Ok(())
}
