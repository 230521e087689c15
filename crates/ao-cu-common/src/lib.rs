//! Common types, errors, and configuration for the compute unit.
//!
//! This crate provides shared functionality used across the ao-cu workspace:
//! - Error types using `thiserror` for type-safe error handling
//! - Configuration structures loaded from the environment or TOML files

pub mod config;
pub mod error;

pub use config::{CuConfig, ServerSection, WasmSection};
pub use error::CuError;
