//! Error types for the compute unit.
//!
//! This module defines a single error hierarchy using `thiserror`:
//! [`CuError`] covers every failure kind the pipeline can produce, from
//! codec encoding through module loading to evaluation persistence.

use std::io;

use thiserror::Error;

/// Top-level compute unit errors.
///
/// The propagation policy differs by kind: invocation-level failures
/// (fetch, compile, trap, resource limits) are converted by the evaluator
/// into a per-message error output and the run continues; persistence
/// failures abort the run; disk-cache write failures are logged by the
/// caller and swallowed.
#[derive(Error, Debug)]
pub enum CuError {
    /// The wire codec could not represent a leaf value.
    #[error("Encode failed: {reason}")]
    Encode {
        /// Description of the unrepresentable value.
        reason: String,
    },

    /// The gateway refused or failed to serve a module binary.
    #[error("Module fetch failed for {module_id}: {reason}")]
    ModuleFetch {
        /// The module that could not be fetched.
        module_id: String,
        /// Transport or status description.
        reason: String,
    },

    /// WebAssembly validation or compilation failed.
    #[error("Compilation failed: {reason}")]
    Compile {
        /// Description of the compilation failure.
        reason: String,
    },

    /// Linking or instantiation of a compiled module failed.
    #[error("Instantiation failed: {reason}")]
    Instantiation {
        /// Description of the instantiation failure.
        reason: String,
    },

    /// Execution exhausted the gas limit for the message.
    #[error("Fuel exhausted: compute limit exceeded")]
    FuelExhausted,

    /// Linear memory growth exceeded the configured limit.
    #[error("Memory limit exceeded: {limit} bytes")]
    MemoryLimitExceeded {
        /// The memory limit in bytes.
        limit: u64,
    },

    /// A WebAssembly trap or guest-thrown error occurred during invocation.
    #[error("Wasm trap: {message}")]
    Trap {
        /// Description of the trap.
        message: String,
    },

    /// The checkpointer was handed an encoding it does not understand.
    #[error("Unsupported memory encoding: {encoding}")]
    UnsupportedEncoding {
        /// The offending encoding tag.
        encoding: String,
    },

    /// Writing an artifact to the disk cache failed.
    ///
    /// Non-fatal: the in-memory artifact remains valid and callers proceed.
    #[error("Disk write failed for {path}: {reason}")]
    DiskWrite {
        /// The path that could not be written.
        path: String,
        /// Description of the failure.
        reason: String,
    },

    /// A persistence collaborator failed. Fatal for the evaluator run.
    #[error("Persistence failed: {reason}")]
    Persistence {
        /// Description of the persistence failure.
        reason: String,
    },

    /// Invalid configuration was provided.
    #[error("Invalid configuration: {reason}")]
    InvalidConfig {
        /// Description of the configuration error.
        reason: String,
    },

    /// I/O operation failed.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl CuError {
    /// Create a new `Encode` error.
    pub fn encode(reason: impl Into<String>) -> Self {
        Self::Encode {
            reason: reason.into(),
        }
    }

    /// Create a new `ModuleFetch` error.
    pub fn module_fetch(module_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ModuleFetch {
            module_id: module_id.into(),
            reason: reason.into(),
        }
    }

    /// Create a new `Compile` error.
    pub fn compile(reason: impl Into<String>) -> Self {
        Self::Compile {
            reason: reason.into(),
        }
    }

    /// Create a new `Instantiation` error.
    pub fn instantiation(reason: impl Into<String>) -> Self {
        Self::Instantiation {
            reason: reason.into(),
        }
    }

    /// Create a new `Trap` error.
    pub fn trap(message: impl Into<String>) -> Self {
        Self::Trap {
            message: message.into(),
        }
    }

    /// Create a new `DiskWrite` error.
    pub fn disk_write(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::DiskWrite {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create a new `Persistence` error.
    pub fn persistence(reason: impl Into<String>) -> Self {
        Self::Persistence {
            reason: reason.into(),
        }
    }

    /// Create a new `InvalidConfig` error.
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            reason: reason.into(),
        }
    }

    /// Create a new `UnsupportedEncoding` error.
    pub fn unsupported_encoding(encoding: impl Into<String>) -> Self {
        Self::UnsupportedEncoding {
            encoding: encoding.into(),
        }
    }

    /// Returns `true` if this error indicates a resource limit was exceeded.
    pub fn is_resource_limit(&self) -> bool {
        matches!(
            self,
            Self::FuelExhausted | Self::MemoryLimitExceeded { .. }
        )
    }

    /// Returns `true` if this error aborts an evaluator run.
    pub fn is_persistence(&self) -> bool {
        matches!(self, Self::Persistence { .. })
    }

    /// Returns `true` if this error is safe to log and ignore.
    pub fn is_disk_write(&self) -> bool {
        matches!(self, Self::DiskWrite { .. })
    }
}
