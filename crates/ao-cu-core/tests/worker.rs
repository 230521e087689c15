//! Integration tests for the execution worker against real Wasm.
//!
//! These exercise the full invoke path: instance resolution through the
//! loader, memory restore, the `handle` ABI, error isolation, and gas
//! accounting.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

use ao_cu_common::{CuError, WasmSection};
use ao_cu_core::dal::{ByteStream, GatewayClient};
use ao_cu_core::types::{AoGlobal, Message, Output, stream_id};
use ao_cu_core::worker::{InvokeRequest, MessageHandler};
use ao_cu_core::{BinaryStore, CompiledModule, ModuleCache, ModuleLoader, WasmEngine, WasmWorker};

// ============================================================================
// Fixtures
// ============================================================================

// Replies with a constant JSON output
const REPLY_WAT: &str = r#"
    (module
        (memory (export "memory") 1)
        (global $next (mut i32) (i32.const 2048))
        (data (i32.const 0) "{\"Output\":\"pong\"}")
        (func (export "alloc") (param $len i32) (result i32)
            (local $ptr i32)
            global.get $next
            local.set $ptr
            (global.set $next (i32.add (global.get $next) (local.get $len)))
            local.get $ptr)
        (func (export "handle") (param i32 i32 i32 i32) (result i64)
            (i64.const 17))
    )
"#;

// Increments a counter cell in linear memory on every invocation
const COUNTER_WAT: &str = r#"
    (module
        (memory (export "memory") 1)
        (global $next (mut i32) (i32.const 2048))
        (data (i32.const 1024) "{\"Output\":\"ok\"}")
        (func (export "alloc") (param $len i32) (result i32)
            (local $ptr i32)
            global.get $next
            local.set $ptr
            (global.set $next (i32.add (global.get $next) (local.get $len)))
            local.get $ptr)
        (func (export "handle") (param i32 i32 i32 i32) (result i64)
            (i32.store (i32.const 0) (i32.add (i32.load (i32.const 0)) (i32.const 1)))
            (i64.or
                (i64.shl (i64.const 1024) (i64.const 32))
                (i64.const 15)))
    )
"#;

// Traps immediately
const TRAP_WAT: &str = r#"
    (module
        (memory (export "memory") 1)
        (func (export "alloc") (param i32) (result i32)
            (i32.const 2048))
        (func (export "handle") (param i32 i32 i32 i32) (result i64)
            unreachable)
    )
"#;

// Burns fuel forever
const SPIN_WAT: &str = r#"
    (module
        (memory (export "memory") 1)
        (func (export "alloc") (param i32) (result i32)
            (i32.const 2048))
        (func (export "handle") (param i32 i32 i32 i32) (result i64)
            (loop $forever (br $forever))
            (i64.const 0))
    )
"#;

/// A gateway that must never be reached: tests pre-seed the module cache.
struct UnreachableGateway;

#[async_trait]
impl GatewayClient for UnreachableGateway {
    async fn stream_transaction_data(&self, id: &str) -> Result<ByteStream, CuError> {
        panic!("gateway should not be consulted for {id}");
    }
}

/// A gateway serving one fixed binary.
struct ServingGateway(Vec<u8>);

#[async_trait]
impl GatewayClient for ServingGateway {
    async fn stream_transaction_data(&self, _id: &str) -> Result<ByteStream, CuError> {
        use futures::StreamExt;
        let chunks = vec![Ok(Bytes::from(self.0.clone()))];
        Ok(futures::stream::iter(chunks).boxed())
    }
}

async fn worker_with_wat(wat: &str) -> (WasmWorker, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let engine = WasmEngine::new(&WasmSection::default()).unwrap();
    let cache = ModuleCache::new(4);
    cache.insert(CompiledModule::from_wat(&engine, "mod-test".into(), wat).unwrap());

    let binaries = BinaryStore::new(dir.path()).await.unwrap();
    let loader = Arc::new(ModuleLoader::new(
        engine.clone(),
        cache,
        binaries,
        Arc::new(UnreachableGateway),
    ));

    let worker = WasmWorker::new(engine, loader, 4, 64 * 1024 * 1024, 1_000_000_000);
    (worker, dir)
}

fn request(memory: Vec<u8>) -> InvokeRequest {
    InvokeRequest {
        stream_id: stream_id("p-1", None),
        module_id: "mod-test".into(),
        process_id: "p-1".into(),
        name: "message 1".into(),
        gas_limit: 5_000_000,
        mem_limit: 16 * 1024 * 1024,
        memory,
        message: Message {
            id: Some("m-1".into()),
            timestamp: 1702222222222,
            block_height: 1234,
            ..Default::default()
        },
        ao_global: AoGlobal::default(),
    }
}

// ============================================================================
// Test: Happy invocation
// ============================================================================

#[tokio::test]
async fn test_invoke_returns_normalized_output() {
    let (worker, _dir) = worker_with_wat(REPLY_WAT).await;

    let output = worker.invoke(request(Vec::new())).await.unwrap();

    assert!(output.error.is_none());
    assert_eq!(output.output, Output::Text("pong".into()));
    assert!(output.messages.is_empty());
    assert!(output.spawns.is_empty());
    assert!(output.gas_used.unwrap() > 0);
    // The whole linear memory is the new snapshot
    assert_eq!(output.memory.as_ref().unwrap().len(), 65_536);
}

// ============================================================================
// Test: Instance reuse per stream
// ============================================================================

#[tokio::test]
async fn test_instance_is_reused_within_stream() {
    let (worker, _dir) = worker_with_wat(REPLY_WAT).await;

    worker.invoke(request(Vec::new())).await.unwrap();
    worker.invoke(request(Vec::new())).await.unwrap();

    assert_eq!(worker.instances().len(), 1);
}

// ============================================================================
// Test: Memory folds across invocations
// ============================================================================

#[tokio::test]
async fn test_memory_snapshot_folds_forward() {
    let (worker, _dir) = worker_with_wat(COUNTER_WAT).await;

    let first = worker.invoke(request(Vec::new())).await.unwrap();
    let after_one = first.memory.unwrap();
    assert_eq!(after_one[0], 1, "counter cell incremented once");

    let second = worker.invoke(request(after_one)).await.unwrap();
    let after_two = second.memory.unwrap();
    assert_eq!(after_two[0], 2, "counter cell incremented twice");
}

// ============================================================================
// Test: Trap isolation
// ============================================================================

#[tokio::test]
async fn test_trap_is_caught_and_memory_rolled_back() {
    let (worker, _dir) = worker_with_wat(TRAP_WAT).await;

    let seed = vec![7u8; 65_536];
    let output = worker.invoke(request(seed.clone())).await.unwrap();

    let error = output.error.expect("trap surfaces as an error output");
    assert!(error.contains("unreachable"), "got: {error}");
    // The error'd step did not mutate persistent state
    assert_eq!(output.memory.unwrap(), seed);
    assert!(output.gas_used.is_none());
}

// ============================================================================
// Test: Gas exhaustion
// ============================================================================

#[tokio::test]
async fn test_fuel_exhaustion_is_caught() {
    let (worker, _dir) = worker_with_wat(SPIN_WAT).await;

    let mut req = request(Vec::new());
    req.gas_limit = 10_000;
    let output = worker.invoke(req).await.unwrap();

    let error = output.error.expect("exhaustion surfaces as an error output");
    assert!(error.contains("Fuel exhausted"), "got: {error}");
}

// ============================================================================
// Test: Limit misconfiguration propagates with the memory handed back
// ============================================================================

#[tokio::test]
async fn test_limits_above_caps_return_invoke_error() {
    let (worker, _dir) = worker_with_wat(REPLY_WAT).await;

    let mut req = request(vec![1, 2, 3]);
    req.mem_limit = u64::MAX;
    let failed = worker.invoke(req).await.unwrap_err();

    assert!(matches!(failed.source, CuError::InvalidConfig { .. }));
    assert_eq!(failed.memory, vec![1, 2, 3]);
}

// ============================================================================
// Test: Full loader path from gateway bytes
// ============================================================================

#[tokio::test]
async fn test_worker_loads_module_through_gateway() {
    let dir = tempfile::tempdir().unwrap();
    let engine = WasmEngine::new(&WasmSection::default()).unwrap();

    // Serve the compiled binary form of the reply module
    let wasm = wat_to_wasm(REPLY_WAT);
    let binaries = BinaryStore::new(dir.path()).await.unwrap();
    let loader = Arc::new(ModuleLoader::new(
        engine.clone(),
        ModuleCache::new(4),
        binaries,
        Arc::new(ServingGateway(wasm)),
    ));
    let worker = WasmWorker::new(engine, loader, 4, 64 * 1024 * 1024, 1_000_000_000);

    let output = worker.invoke(request(Vec::new())).await.unwrap();
    assert_eq!(output.output, Output::Text("pong".into()));
}

/// Assemble a Wasm binary from WAT via Wasmtime's own serialization-free
/// text parser, by round-tripping through `wat` support in `Module`.
fn wat_to_wasm(wat: &str) -> Vec<u8> {
    // Wasmtime compiles WAT directly, but the gateway must serve the binary
    // form; encode the text with the same parser wasmtime embeds.
    wat::parse_str(wat).expect("fixture WAT is valid")
}
