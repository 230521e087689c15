//! Two-level artifact storage for Wasm binaries and compiled modules.
//!
//! - [`BinaryStore`]: a directory of gzip-compressed binaries,
//!   `<moduleId>.wasm.gz`. Write failures are surfaced as
//!   [`CuError::DiskWrite`] for the caller to log and ignore; the
//!   in-memory artifact remains valid.
//! - [`ModuleCache`]: a bounded in-memory cache of compiled modules with
//!   LRU-flavoured eviction. Dropping the last handle to an evicted entry
//!   releases its JIT resources.

use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use moka::sync::Cache;
use tracing::{debug, warn};

use ao_cu_common::CuError;

use crate::module::CompiledModule;
use crate::types::ModuleId;

/// On-disk store of gzip-compressed Wasm binaries.
#[derive(Debug, Clone)]
pub struct BinaryStore {
    dir: PathBuf,
}

impl BinaryStore {
    /// Open (creating if needed) a binary store rooted at `dir`.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created.
    pub async fn new(dir: impl Into<PathBuf>) -> Result<Self, CuError> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir).await?;
        Ok(Self { dir })
    }

    /// Path of the compressed binary for a module.
    pub fn path_for(&self, module_id: &str) -> PathBuf {
        self.dir.join(format!("{module_id}.wasm.gz"))
    }

    /// Persist pre-compressed bytes for a module.
    ///
    /// # Errors
    ///
    /// Returns [`CuError::DiskWrite`]; callers treat this as non-fatal.
    pub async fn write_compressed(
        &self,
        module_id: &str,
        gz_bytes: Vec<u8>,
    ) -> Result<(), CuError> {
        let path = self.path_for(module_id);
        tokio::fs::write(&path, gz_bytes)
            .await
            .map_err(|e| CuError::disk_write(path.display().to_string(), e.to_string()))?;
        debug!(module_id, path = %path.display(), "Wasm binary persisted");
        Ok(())
    }

    /// Compress and persist a raw Wasm binary.
    ///
    /// # Errors
    ///
    /// Returns [`CuError::DiskWrite`]; callers treat this as non-fatal.
    pub async fn write(&self, module_id: &str, wasm_bytes: &[u8]) -> Result<(), CuError> {
        let mut sink = GzSink::new();
        sink.push(wasm_bytes)
            .map_err(|e| CuError::disk_write(self.path_for(module_id).display().to_string(), e))?;
        let gz = sink
            .finish()
            .map_err(|e| CuError::disk_write(self.path_for(module_id).display().to_string(), e))?;
        self.write_compressed(module_id, gz).await
    }

    /// Read and decompress a module binary, `None` when absent.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or gunzipped.
    pub async fn read(&self, module_id: &str) -> Result<Option<Vec<u8>>, CuError> {
        let path = self.path_for(module_id);
        let gz_bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let mut decoder = GzDecoder::new(gz_bytes.as_slice());
        let mut wasm = Vec::new();
        decoder.read_to_end(&mut wasm)?;
        Ok(Some(wasm))
    }

    /// The directory backing this store.
    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

/// Incremental gzip sink used when teeing a download toward disk.
pub struct GzSink {
    encoder: GzEncoder<Vec<u8>>,
}

impl GzSink {
    /// Create an empty sink.
    pub fn new() -> Self {
        Self {
            encoder: GzEncoder::new(Vec::new(), Compression::default()),
        }
    }

    /// Feed one chunk through the encoder.
    ///
    /// # Errors
    ///
    /// Returns the encoder failure as a string for the caller to wrap.
    pub fn push(&mut self, chunk: &[u8]) -> Result<(), String> {
        self.encoder.write_all(chunk).map_err(|e| e.to_string())
    }

    /// Finish the stream and take the compressed bytes.
    ///
    /// # Errors
    ///
    /// Returns the encoder failure as a string for the caller to wrap.
    pub fn finish(self) -> Result<Vec<u8>, String> {
        self.encoder.finish().map_err(|e| e.to_string())
    }
}

impl Default for GzSink {
    fn default() -> Self {
        Self::new()
    }
}

/// Bounded in-memory cache of compiled modules.
///
/// Insertion past capacity evicts the least-recently-used entry; eviction
/// is logged and the compiled module's resources are released once the
/// last outstanding handle drops.
#[derive(Clone)]
pub struct ModuleCache {
    inner: Cache<ModuleId, CompiledModule>,
}

impl ModuleCache {
    /// Create a cache bounded to `max_size` compiled modules.
    pub fn new(max_size: u64) -> Self {
        let inner = Cache::builder()
            .max_capacity(max_size)
            .eviction_listener(|key: std::sync::Arc<ModuleId>, _value, cause| {
                debug!(module_id = %key, ?cause, "Compiled module evicted");
            })
            .build();
        Self { inner }
    }

    /// Look up a compiled module, marking it recently used.
    pub fn get(&self, module_id: &str) -> Option<CompiledModule> {
        self.inner.get(module_id)
    }

    /// Insert a compiled module. Idempotent for a given content-addressed
    /// id: concurrent racing writers produce equivalent entries.
    pub fn insert(&self, module: CompiledModule) {
        self.inner
            .insert(module.module_id().to_string(), module);
    }

    /// Number of cached modules. Eventually consistent; used by tests.
    pub fn len(&self) -> u64 {
        self.inner.run_pending_tasks();
        self.inner.entry_count()
    }

    /// Whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for ModuleCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleCache").finish_non_exhaustive()
    }
}

/// Log a non-fatal disk-cache failure and move on.
pub fn log_disk_failure(error: &CuError) {
    warn!(error = %error, "disk cache write failed; continuing with in-memory artifact");
}
