//! Configuration structures for the compute unit.
//!
//! This module defines configuration for the two halves of the system:
//! - [`WasmSection`]: module/instance caches, binary directory, gateway,
//!   and per-process resource ceilings
//! - [`ServerSection`]: HTTP bind address, timeouts, and operator paths
//!
//! Configuration can be loaded from a TOML file or, the common deployment
//! path, from environment variables via [`CuConfig::from_env`].

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::CuError;

/// Top-level compute unit configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct CuConfig {
    /// Wasm pipeline configuration.
    #[serde(default)]
    pub wasm: WasmSection,

    /// HTTP server configuration.
    #[serde(default)]
    pub server: ServerSection,
}

/// Wasm pipeline configuration.
///
/// These settings bound the layered cache and per-process execution.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WasmSection {
    /// Maximum entries in the in-memory compiled-module cache.
    #[serde(default = "defaults::module_cache_max_size")]
    pub module_cache_max_size: u64,

    /// Maximum live instances held per execution worker.
    #[serde(default = "defaults::instance_cache_max_size")]
    pub instance_cache_max_size: u64,

    /// Directory holding gzip-compressed module binaries.
    #[serde(default = "defaults::binary_file_directory")]
    pub binary_file_directory: String,

    /// Base URL of the gateway serving raw module transactions.
    #[serde(default = "defaults::gateway_url")]
    pub gateway_url: String,

    /// Hard ceiling on a process's linear memory, in bytes.
    ///
    /// Module-declared limits above this cap are rejected.
    #[serde(default = "defaults::process_memory_max_limit")]
    pub process_memory_max_limit: u64,

    /// Hard ceiling on gas (fuel) per message invocation.
    #[serde(default = "defaults::process_compute_max_limit")]
    pub process_compute_max_limit: u64,
}

impl Default for WasmSection {
    fn default() -> Self {
        Self {
            module_cache_max_size: defaults::module_cache_max_size(),
            instance_cache_max_size: defaults::instance_cache_max_size(),
            binary_file_directory: defaults::binary_file_directory(),
            gateway_url: defaults::gateway_url(),
            process_memory_max_limit: defaults::process_memory_max_limit(),
            process_compute_max_limit: defaults::process_compute_max_limit(),
        }
    }
}

/// HTTP server and operator configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerSection {
    /// Bind address (e.g., "0.0.0.0:6363").
    #[serde(default = "defaults::bind_addr")]
    pub bind_addr: String,

    /// Request timeout in seconds.
    #[serde(default = "defaults::request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Base URL of the scheduler unit that assigns ordinates.
    #[serde(default = "defaults::scheduler_url")]
    pub scheduler_url: String,

    /// Interval between resident-memory samples, in milliseconds.
    #[serde(default = "defaults::mem_monitor_interval_ms")]
    pub mem_monitor_interval_ms: u64,

    /// Directory receiving operator-signalled heap snapshots.
    #[serde(default = "defaults::dump_path")]
    pub dump_path: String,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            bind_addr: defaults::bind_addr(),
            request_timeout_secs: defaults::request_timeout_secs(),
            scheduler_url: defaults::scheduler_url(),
            mem_monitor_interval_ms: defaults::mem_monitor_interval_ms(),
            dump_path: defaults::dump_path(),
        }
    }
}

impl CuConfig {
    /// Load configuration from environment variables.
    ///
    /// Unset variables fall back to their defaults. Variables that are set
    /// but unparseable are an error rather than a silent fallback.
    ///
    /// # Errors
    ///
    /// Returns [`CuError::InvalidConfig`] when a numeric variable does not
    /// parse.
    pub fn from_env() -> Result<Self, CuError> {
        let mut config = Self::default();

        if let Ok(v) = std::env::var("WASM_MODULE_CACHE_MAX_SIZE") {
            config.wasm.module_cache_max_size = parse_var("WASM_MODULE_CACHE_MAX_SIZE", &v)?;
        }
        if let Ok(v) = std::env::var("WASM_INSTANCE_CACHE_MAX_SIZE") {
            config.wasm.instance_cache_max_size = parse_var("WASM_INSTANCE_CACHE_MAX_SIZE", &v)?;
        }
        if let Ok(v) = std::env::var("WASM_BINARY_FILE_DIRECTORY") {
            config.wasm.binary_file_directory = v;
        }
        if let Ok(v) = std::env::var("GATEWAY_URL") {
            config.wasm.gateway_url = v;
        }
        if let Ok(v) = std::env::var("PROCESS_WASM_MEMORY_MAX_LIMIT") {
            config.wasm.process_memory_max_limit = parse_var("PROCESS_WASM_MEMORY_MAX_LIMIT", &v)?;
        }
        if let Ok(v) = std::env::var("PROCESS_WASM_COMPUTE_MAX_LIMIT") {
            config.wasm.process_compute_max_limit =
                parse_var("PROCESS_WASM_COMPUTE_MAX_LIMIT", &v)?;
        }
        if let Ok(v) = std::env::var("MEM_MONITOR_INTERVAL") {
            config.server.mem_monitor_interval_ms = parse_var("MEM_MONITOR_INTERVAL", &v)?;
        }
        if let Ok(v) = std::env::var("DUMP_PATH") {
            config.server.dump_path = v;
        }
        if let Ok(v) = std::env::var("SCHEDULER_URL") {
            config.server.scheduler_url = v;
        }
        if let Ok(v) = std::env::var("BIND_ADDR") {
            config.server.bind_addr = v;
        }

        Ok(config)
    }

    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, CuError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the string cannot be parsed as TOML.
    pub fn from_toml(content: &str) -> Result<Self, CuError> {
        toml::from_str(content).map_err(|e| CuError::invalid_config(e.to_string()))
    }
}

fn parse_var(name: &str, value: &str) -> Result<u64, CuError> {
    value
        .parse()
        .map_err(|_| CuError::invalid_config(format!("{name} must be an integer, got '{value}'")))
}

/// Default value functions for serde.
mod defaults {
    pub const fn module_cache_max_size() -> u64 {
        5
    }

    pub const fn instance_cache_max_size() -> u64 {
        5
    }

    pub fn binary_file_directory() -> String {
        "./wasm-binaries".into()
    }

    pub fn gateway_url() -> String {
        "https://arweave.net".into()
    }

    pub const fn process_memory_max_limit() -> u64 {
        1024 * 1024 * 1024
    }

    pub const fn process_compute_max_limit() -> u64 {
        9_000_000_000_000
    }

    pub fn bind_addr() -> String {
        "0.0.0.0:6363".into()
    }

    pub const fn request_timeout_secs() -> u64 {
        30
    }

    pub fn scheduler_url() -> String {
        "http://localhost:9000".into()
    }

    pub const fn mem_monitor_interval_ms() -> u64 {
        10_000
    }

    pub fn dump_path() -> String {
        "./".into()
    }
}
