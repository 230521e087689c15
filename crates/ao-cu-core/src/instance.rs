//! Live Wasm instances and the per-worker instance cache.
//!
//! A [`ProcessInstance`] owns a Wasmtime store, the guest's linear memory,
//! and the two exports of the process ABI:
//!
//! - `alloc(len: i32) -> i32` — scratch allocation for staging host input
//! - `handle(msg_ptr, msg_len, env_ptr, env_len) -> i64` — evaluates one
//!   message and returns `ptr << 32 | len` of a UTF-8 JSON reply
//!
//! The instance is exclusively owned by the stream that created it and is
//! destroyed on eviction from the [`InstanceCache`].

use std::sync::{Arc, Mutex};

use moka::sync::Cache;
use tracing::debug;
use wasmtime::{Linker, Memory, Store, StoreLimits, StoreLimitsBuilder, Trap, TypedFunc};

use ao_cu_common::CuError;

use crate::engine::WasmEngine;
use crate::module::CompiledModule;

/// Bytes per WebAssembly page.
const WASM_PAGE_SIZE: usize = 65_536;

/// Per-instance store state: the resource limiter enforcing the memory cap.
pub struct ProcessState {
    limits: StoreLimits,
}

/// A live Wasm instance bound to its linear memory, gas meter, and memory
/// limit.
pub struct ProcessInstance {
    store: Store<ProcessState>,
    memory: Memory,
    alloc: TypedFunc<i32, i32>,
    handle: TypedFunc<(i32, i32, i32, i32), i64>,
    mem_limit: u64,
}

impl ProcessInstance {
    /// Instantiate a compiled module under the given gas and memory limits.
    ///
    /// # Errors
    ///
    /// Returns [`CuError::Instantiation`] when linking fails or the module
    /// does not export the process ABI.
    pub fn instantiate(
        engine: &WasmEngine,
        module: &CompiledModule,
        gas_limit: u64,
        mem_limit: u64,
    ) -> Result<Self, CuError> {
        let limits = StoreLimitsBuilder::new()
            .memory_size(mem_limit as usize)
            .build();

        let mut store = Store::new(engine.inner(), ProcessState { limits });
        store.limiter(|state| &mut state.limits);
        store
            .set_fuel(gas_limit)
            .map_err(|e| CuError::instantiation(format!("failed to set fuel: {e}")))?;

        let linker: Linker<ProcessState> = Linker::new(engine.inner());
        let instance = linker
            .instantiate(&mut store, module.inner())
            .map_err(|e| CuError::instantiation(format!("instantiation failed: {e}")))?;

        let memory = instance
            .get_memory(&mut store, "memory")
            .ok_or_else(|| CuError::instantiation("module does not export 'memory'"))?;
        let alloc = instance
            .get_typed_func::<i32, i32>(&mut store, "alloc")
            .map_err(|e| CuError::instantiation(format!("missing 'alloc' export: {e}")))?;
        let handle = instance
            .get_typed_func::<(i32, i32, i32, i32), i64>(&mut store, "handle")
            .map_err(|e| CuError::instantiation(format!("missing 'handle' export: {e}")))?;

        debug!(module_id = module.module_id(), "instance created");

        Ok(Self {
            store,
            memory,
            alloc,
            handle,
            mem_limit,
        })
    }

    /// Reset the gas meter for the next invocation.
    ///
    /// # Errors
    ///
    /// Returns [`CuError::Instantiation`] if the store rejects the fuel.
    pub fn set_fuel(&mut self, gas: u64) -> Result<(), CuError> {
        self.store
            .set_fuel(gas)
            .map_err(|e| CuError::instantiation(format!("failed to set fuel: {e}")))
    }

    /// Remaining gas after an invocation.
    pub fn remaining_fuel(&self) -> u64 {
        self.store.get_fuel().unwrap_or(0)
    }

    /// Restore a memory snapshot into the guest's linear memory.
    ///
    /// Grows the memory when the snapshot is larger; zeroes the tail when
    /// it is smaller, so the restored state is exactly the snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`CuError::MemoryLimitExceeded`] when the snapshot does not
    /// fit under the instance's memory limit.
    pub fn write_memory(&mut self, snapshot: &[u8]) -> Result<(), CuError> {
        if snapshot.is_empty() {
            return Ok(());
        }

        let current = self.memory.data_size(&self.store);
        if snapshot.len() > current {
            let delta_pages = (snapshot.len() - current).div_ceil(WASM_PAGE_SIZE) as u64;
            self.memory
                .grow(&mut self.store, delta_pages)
                .map_err(|_| CuError::MemoryLimitExceeded {
                    limit: self.mem_limit,
                })?;
        }

        let data = self.memory.data_mut(&mut self.store);
        data[..snapshot.len()].copy_from_slice(snapshot);
        for byte in &mut data[snapshot.len()..] {
            *byte = 0;
        }
        Ok(())
    }

    /// Snapshot the guest's entire linear memory.
    pub fn read_memory(&self) -> Vec<u8> {
        self.memory.data(&self.store).to_vec()
    }

    /// Invoke `handle` with a message and environment, returning the reply
    /// bytes.
    ///
    /// # Errors
    ///
    /// Returns [`CuError::FuelExhausted`] when the gas meter runs out,
    /// [`CuError::Trap`] for any other trap or an out-of-bounds reply.
    pub fn call_handle(&mut self, message: &[u8], env: &[u8]) -> Result<Vec<u8>, CuError> {
        let msg_ptr = self.stage(message)?;
        let env_ptr = self.stage(env)?;

        let packed = self
            .handle
            .call(
                &mut self.store,
                (msg_ptr, message.len() as i32, env_ptr, env.len() as i32),
            )
            .map_err(map_wasm_error)?;

        let packed = packed as u64;
        let ptr = (packed >> 32) as usize;
        let len = (packed & 0xffff_ffff) as usize;

        let data = self.memory.data(&self.store);
        let end = ptr
            .checked_add(len)
            .ok_or_else(|| CuError::trap("reply range overflows"))?;
        if end > data.len() {
            return Err(CuError::trap("reply out of linear memory bounds"));
        }
        Ok(data[ptr..end].to_vec())
    }

    /// Allocate scratch space in the guest and copy bytes into it.
    fn stage(&mut self, bytes: &[u8]) -> Result<i32, CuError> {
        let ptr = self
            .alloc
            .call(&mut self.store, bytes.len() as i32)
            .map_err(map_wasm_error)?;
        self.memory
            .write(&mut self.store, ptr as u32 as usize, bytes)
            .map_err(|e| CuError::trap(format!("staging write failed: {e}")))?;
        Ok(ptr)
    }
}

impl std::fmt::Debug for ProcessInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessInstance")
            .field("mem_limit", &self.mem_limit)
            .finish_non_exhaustive()
    }
}

/// Classify a Wasmtime invocation failure.
fn map_wasm_error(error: wasmtime::Error) -> CuError {
    if error
        .downcast_ref::<Trap>()
        .is_some_and(|trap| *trap == Trap::OutOfFuel)
    {
        return CuError::FuelExhausted;
    }
    CuError::trap(error.to_string())
}

/// Shared handle to a live instance; locked for the duration of one
/// invocation.
pub type InstanceHandle = Arc<Mutex<ProcessInstance>>;

/// Bounded per-worker cache of live instances keyed by stream id.
///
/// Eviction drops the handle; the store and its linear memory are released
/// as soon as the last holder lets go. Never shared across workers.
#[derive(Clone)]
pub struct InstanceCache {
    inner: Cache<String, InstanceHandle>,
}

impl InstanceCache {
    /// Create a cache bounded to `max_size` live instances.
    pub fn new(max_size: u64) -> Self {
        let inner = Cache::builder()
            .max_capacity(max_size)
            .eviction_listener(|key: Arc<String>, _value, cause| {
                debug!(stream_id = %key, ?cause, "instance evicted");
            })
            .build();
        Self { inner }
    }

    /// Look up the live instance for a stream, marking it recently used.
    pub fn get(&self, stream_id: &str) -> Option<InstanceHandle> {
        self.inner.get(stream_id)
    }

    /// Insert the live instance for a stream. At most one instance exists
    /// per stream id; a racing insert replaces (and thereby destroys) the
    /// loser.
    pub fn insert(&self, stream_id: String, handle: InstanceHandle) {
        self.inner.insert(stream_id, handle);
    }

    /// Number of live instances. Eventually consistent; used by tests.
    pub fn len(&self) -> u64 {
        self.inner.run_pending_tasks();
        self.inner.entry_count()
    }

    /// Whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for InstanceCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstanceCache").finish_non_exhaustive()
    }
}
