//! HTTP surface for the compute unit.
//!
//! This crate wires the evaluation pipeline behind a minimal axum server:
//!
//! - `POST /message` — accept a raw signed data item, forward it to the
//!   scheduler, reply `202` immediately, and crank the transitive message
//!   tree asynchronously
//! - `GET /health`, `GET /ready` — liveness and readiness
//!
//! # Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//!
//! use ao_cu_common::CuConfig;
//! use ao_cu_core::MemoryStore;
//! use ao_cu_server::{AppState, CuServer, HttpScheduler, ServerConfig};
//!
//! let config = CuConfig::from_env()?;
//! let scheduler = Arc::new(HttpScheduler::new(&config.server.scheduler_url)?);
//! let state = AppState::new(&config, scheduler, Arc::new(MemoryStore::new())).await?;
//! CuServer::new(state, ServerConfig::default()).run().await?;
//! ```

pub mod crank;
pub mod handler;
pub mod router;
pub mod scheduler;
pub mod server;
pub mod state;

pub use crank::{CuRouter, Routed};
pub use router::build_router;
pub use scheduler::{HttpScheduler, ProcessInfo, SchedulerClient};
pub use server::{CuServer, ServerConfig};
pub use state::AppState;
