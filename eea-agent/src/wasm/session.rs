//! Interpreter sessions.
//!
//! A [`Session`] is the live environment/store/instance trio plus the
//! resolved entry points for the currently installed bundle. Exactly one
//! exists at a time; the supervisor creates it on install and drops it on
//! hot-swap. The bundle blob is pinned by the session so the bytes remain
//! available to the persistor for the session's lifetime.

use crate::wasm::host::{HostState, link_host_abi};
use crate::wasm::memory;
use crate::wasm::runtime::GuestRuntime;
use eea_core::{AgentConfig, Bundle, EeaError, InboundMessage, Result};
use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Instant;
use wasmtime::{Instance, Linker, Memory, Store, TypedFunc, WasmBacktrace, WasmParams, WasmResults};

/// Fallback identifier when a bundle does not expose the well-known
/// identifier globals.
const UNKNOWN_BUNDLE_ID: &str = "unknown";

/// Resolved guest entry points. Only `eea_loop` is mandatory; a missing
/// or mistyped optional export is logged once at resolution and skipped.
struct EntryPoints {
    run_loop: TypedFunc<i64, i32>,
    message_received: Option<TypedFunc<(i32, i32), i32>>,
    shutdown: Option<TypedFunc<(), i32>>,
    set_connection_status: Option<TypedFunc<i32, i32>>,
}

/// Result of handing one inbound message to the guest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliverOutcome {
    /// The guest's `eea_message_received` ran.
    Delivered {
        /// Bytes written into the topic buffer.
        topic_len: usize,
        /// Bytes written into the payload buffer.
        payload_len: usize,
        /// The guest's return code.
        code: i32,
    },
    /// The guest never registered message buffers.
    NoBuffers,
    /// The guest does not export `eea_message_received`.
    NoHandler,
    /// The payload exceeds the registered buffer capacity; the whole
    /// message is dropped.
    PayloadTooLarge {
        /// Payload size.
        len: usize,
        /// Registered buffer capacity.
        cap: usize,
    },
}

/// A live interpreter session for one installed bundle.
pub struct Session {
    store: Store<HostState>,
    memory: Memory,
    entry: EntryPoints,
    bundle_id: String,
    bundle: Arc<Vec<u8>>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("bundle_id", &self.bundle_id)
            .finish_non_exhaustive()
    }
}

impl Session {
    /// Build a session from a bundle blob: compile, link the host ABI,
    /// instantiate, resolve entry points, push configuration, run
    /// `eea_init`, and read the identifier globals.
    ///
    /// Any failure leaves no session behind; the caller decides what
    /// state that puts the supervisor in.
    pub fn new(
        runtime: &GuestRuntime,
        bundle: &Bundle,
        host: HostState,
        config: &AgentConfig,
    ) -> Result<Self> {
        let started = Instant::now();
        let module = runtime.compile(&bundle.bytes)?;

        let mut linker: Linker<HostState> = Linker::new(runtime.engine());
        link_host_abi(&mut linker)?;

        let mut store = Store::new(runtime.engine(), host);
        let instance = linker
            .instantiate(&mut store, &module)
            .map_err(|e| EeaError::BundleLoad {
                cause: format!("instantiation failed: {e}"),
            })?;

        let memory = instance
            .get_memory(&mut store, "memory")
            .ok_or_else(|| EeaError::BundleLoad {
                cause: "module does not export 'memory'".to_string(),
            })?;

        let init: Option<TypedFunc<(), i32>> = optional_entry(&instance, &mut store, "eea_init");
        let run_loop: TypedFunc<i64, i32> = instance
            .get_typed_func(&mut store, "eea_loop")
            .map_err(|_| EeaError::EntryPointMissing {
                name: "eea_loop".to_string(),
            })?;
        let entry = EntryPoints {
            run_loop,
            message_received: optional_entry(&instance, &mut store, "eea_message_received"),
            shutdown: optional_entry(&instance, &mut store, "eea_shutdown"),
            set_connection_status: optional_entry(&instance, &mut store, "eea_set_connection_status"),
        };
        let set_trace_level: Option<TypedFunc<i32, i32>> =
            optional_entry(&instance, &mut store, "eea_config_set_trace_level");
        let set_storage_size: Option<TypedFunc<i32, i32>> =
            optional_entry(&instance, &mut store, "eea_config_set_storage_size");
        let set_storage_interval: Option<TypedFunc<i32, i32>> =
            optional_entry(&instance, &mut store, "eea_config_set_storage_interval");

        // Configuration goes in before eea_init so the guest sees it
        // during initialization.
        if let Some(f) = set_storage_size {
            f.call(&mut store, config.storage_size)
                .map_err(|e| trap_error("eea_config_set_storage_size", e))?;
        }
        if let Some(f) = set_storage_interval {
            f.call(&mut store, config.storage_interval)
                .map_err(|e| trap_error("eea_config_set_storage_interval", e))?;
        }
        if let Some(f) = set_trace_level {
            f.call(&mut store, config.trace_level)
                .map_err(|e| trap_error("eea_config_set_trace_level", e))?;
        }

        if let Some(f) = init {
            let code = f.call(&mut store, ()).map_err(|e| trap_error("eea_init", e))?;
            if code != 0 {
                return Err(EeaError::GuestInit { code });
            }
        }

        let bundle_id = read_bundle_id(&instance, &mut store, &memory).unwrap_or_else(|| {
            tracing::warn!("bundle does not expose identifier globals");
            UNKNOWN_BUNDLE_ID.to_string()
        });

        tracing::info!(
            bundle_id = %bundle_id,
            size = bundle.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "bundle initialized"
        );

        Ok(Self {
            store,
            memory,
            entry,
            bundle_id,
            bundle: Arc::clone(&bundle.bytes),
        })
    }

    /// Identifier extracted from the bundle's well-known globals.
    pub fn bundle_id(&self) -> &str {
        &self.bundle_id
    }

    /// The pinned bundle blob backing this session.
    pub fn bundle_bytes(&self) -> &Arc<Vec<u8>> {
        &self.bundle
    }

    /// Drive one guest loop iteration with the current monotonic
    /// milliseconds since boot. A trap is returned as `GuestTrap` with
    /// the rendered backtrace.
    pub fn call_loop(&mut self, now_ms: i64) -> Result<i32> {
        self.entry
            .run_loop
            .call(&mut self.store, now_ms)
            .map_err(|e| trap_error("eea_loop", e))
    }

    /// Hand an inbound message to the guest through the registered
    /// shared buffers. The topic is truncated to the topic buffer's
    /// capacity; a payload larger than the payload buffer drops the
    /// message instead.
    pub fn deliver(&mut self, message: &InboundMessage) -> Result<DeliverOutcome> {
        let Some(handler) = &self.entry.message_received else {
            return Ok(DeliverOutcome::NoHandler);
        };
        let Some(buffers) = self.store.data().buffers else {
            return Ok(DeliverOutcome::NoBuffers);
        };
        if message.payload.len() > buffers.payload_cap as usize {
            return Ok(DeliverOutcome::PayloadTooLarge {
                len: message.payload.len(),
                cap: buffers.payload_cap as usize,
            });
        }

        let topic_len = memory::write_clamped(
            &self.memory,
            &mut self.store,
            buffers.topic_ptr,
            buffers.topic_cap,
            message.topic.as_bytes(),
        );
        let payload_len = memory::write_clamped(
            &self.memory,
            &mut self.store,
            buffers.payload_ptr,
            buffers.payload_cap,
            &message.payload,
        );

        let code = handler
            .call(&mut self.store, (topic_len as i32, payload_len as i32))
            .map_err(|e| trap_error("eea_message_received", e))?;

        Ok(DeliverOutcome::Delivered {
            topic_len,
            payload_len,
            code,
        })
    }

    /// Inform the guest of a broker link-state change, when it exports
    /// the hook.
    pub fn set_connection_status(&mut self, connected: bool) -> Result<Option<i32>> {
        match &self.entry.set_connection_status {
            Some(f) => f
                .call(&mut self.store, i32::from(connected))
                .map(Some)
                .map_err(|e| trap_error("eea_set_connection_status", e)),
            None => Ok(None),
        }
    }

    /// Best-effort guest shutdown before teardown. Failures are logged
    /// and ignored; the session is going away either way.
    pub fn shutdown(&mut self) {
        if let Some(f) = &self.entry.shutdown {
            match f.call(&mut self.store, ()) {
                Ok(code) if code != 0 => {
                    tracing::warn!(code, "guest shutdown returned non-zero")
                }
                Ok(_) => {}
                Err(err) => tracing::warn!(error = %err, "guest shutdown trapped"),
            }
        }
    }
}

/// Resolve an optional typed export, logging absence or a signature
/// mismatch instead of failing the load.
fn optional_entry<P, R>(
    instance: &Instance,
    store: &mut Store<HostState>,
    name: &str,
) -> Option<TypedFunc<P, R>>
where
    P: WasmParams,
    R: WasmResults,
{
    let func = match instance.get_func(&mut *store, name) {
        Some(func) => func,
        None => {
            tracing::debug!(entry = name, "guest does not export entry point");
            return None;
        }
    };
    match func.typed(&mut *store) {
        Ok(typed) => Some(typed),
        Err(err) => {
            tracing::warn!(entry = name, error = %err, "entry point has unexpected signature, ignored");
            None
        }
    }
}

/// Read the bundle identifier through the `BUNDLE_IDENTIFIER` /
/// `BUNDLE_IDENTIFIER_LENGTH` globals. Both are pointers into linear
/// memory; the length is a single byte.
fn read_bundle_id(
    instance: &Instance,
    store: &mut Store<HostState>,
    memory: &Memory,
) -> Option<String> {
    let id_ptr = instance
        .get_global(&mut *store, "BUNDLE_IDENTIFIER")?
        .get(&mut *store)
        .i32()?;
    let len_ptr = instance
        .get_global(&mut *store, "BUNDLE_IDENTIFIER_LENGTH")?
        .get(&mut *store)
        .i32()?;
    let len = memory::read_u8(memory, &mut *store, len_ptr as u32)?;
    let bytes = memory::read_bytes(memory, &mut *store, id_ptr as u32, u32::from(len)).ok()?;
    Some(String::from_utf8_lossy(&bytes).into_owned())
}

fn trap_error(entry: &str, err: wasmtime::Error) -> EeaError {
    EeaError::GuestTrap {
        entry: entry.to_string(),
        cause: err.root_cause().to_string(),
        backtrace: render_backtrace(&err),
    }
}

/// Render trap backtrace frames as `#n 0x{offset:06x} {module}!{func}`,
/// one per line.
fn render_backtrace(err: &wasmtime::Error) -> String {
    let Some(trace) = err.downcast_ref::<WasmBacktrace>() else {
        return String::new();
    };
    let mut out = String::new();
    for (i, frame) in trace.frames().iter().enumerate() {
        let offset = frame.module_offset().unwrap_or(0);
        let module = frame.module().name().unwrap_or("bundle");
        let func = frame.func_name().unwrap_or("<unknown>");
        let _ = writeln!(out, "  #{i} {offset:#08x} {module}!{func}");
    }
    out
}
