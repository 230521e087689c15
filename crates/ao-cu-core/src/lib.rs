//! Core evaluation pipeline for the compute unit.
//!
//! This crate drives a process's state forward by replaying its ordered
//! message log against a cached Wasm instance:
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                      Evaluator                          │
//! │  (per process, strictly sequential fold over messages)  │
//! └─────────────────────────────────────────────────────────┘
//!                            │ invoke
//!                            ▼
//! ┌─────────────────────────────────────────────────────────┐
//! │                     WasmWorker                          │
//! │  InstanceCache ──miss──▶ ModuleLoader                   │
//! │                           │ compiled cache              │
//! │                           │ disk <id>.wasm.gz           │
//! │                           │ gateway /raw/<id>           │
//! └─────────────────────────────────────────────────────────┘
//!                            │ fold
//!                            ▼
//! ┌─────────────────────────────────────────────────────────┐
//! │       Memory snapshot + checkpoint (sha-256)            │
//! └─────────────────────────────────────────────────────────┘
//! ```
//!
//! Invariants upheld here: one live instance per stream, deterministic
//! replay for a given `(module, initial memory, message sequence)`, and
//! error'd invocations never mutating persistent state.

pub mod artifact;
pub mod checkpoint;
pub mod dal;
pub mod engine;
pub mod evaluate;
pub mod instance;
pub mod loader;
pub mod module;
pub mod pending;
pub mod types;
pub mod worker;

pub use artifact::{BinaryStore, ModuleCache};
pub use checkpoint::{ResourceCaps, hash_memory};
pub use dal::{
    EvaluationStore, GatewayClient, HttpGateway, MemoryStore, MessageHashRecord,
    ProcessCheckpoint, SavedEvaluation,
};
pub use engine::WasmEngine;
pub use evaluate::{CancelSignal, EvalResult, Evaluator};
pub use instance::InstanceCache;
pub use loader::ModuleLoader;
pub use module::CompiledModule;
pub use pending::PendingEvaluations;
pub use types::{
    AoGlobal, Cursor, EvaluationContext, EvaluationOutput, EvalStats, Message, ModuleId, Output,
    ProcessId, Tag,
};
pub use worker::{InvokeError, InvokeRequest, MessageHandler, WasmWorker};
