//! Host ABI imported by every guest bundle.
//!
//! The fixed `env` namespace is registered on a `Linker<HostState>` each
//! time a bundle is loaded. Host functions receive pointers into the
//! guest's linear memory; every access goes through the clamped helpers
//! in [`super::memory`], so a hostile length argument can truncate but
//! never overflow.
//!
//! Per the ABI contract all functions report success to the guest even
//! when the host drops the work (a full outbound queue is observable only
//! in the log); `-1` is reserved for a guest that passed no usable memory.

use crate::peripherals::PeripheralDriver;
use crate::wasm::memory;
use eea_core::{EeaError, OutboundMessage, PAYLOAD_MAX, QueueSender, Result, TOPIC_MAX};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use wasmtime::{Caller, Extern, Linker, Memory};

/// Upper bound on a single guest trace line.
const TRACE_MAX: usize = 1024;

/// Severity assigned to guest trace output, derived from the device's
/// configured trace level. The guest is pushed the same level through
/// `eea_config_set_trace_level`, so at `Error` the only lines it emits
/// are error reports.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraceLevel {
    /// Guest trace output is discarded.
    Silent = 0,
    /// Errors only; lines are logged as errors.
    Error = 1,
    /// Everything; lines are logged as informational.
    Verbose = 2,
}

impl From<i32> for TraceLevel {
    fn from(val: i32) -> Self {
        match val {
            v if v <= 0 => Self::Silent,
            1 => Self::Error,
            _ => Self::Verbose,
        }
    }
}

/// The two shared linear-memory regions the guest registers during
/// `eea_init`. The host writes inbound topic/payload bytes here, only on
/// the supervisor thread, only while no guest call is in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageBuffers {
    /// Offset of the topic buffer.
    pub topic_ptr: u32,
    /// Capacity of the topic buffer.
    pub topic_cap: u32,
    /// Offset of the payload buffer.
    pub payload_ptr: u32,
    /// Capacity of the payload buffer.
    pub payload_cap: u32,
}

/// State available to host functions during a guest call.
///
/// Owned by the session's store; the supervisor reads the registered
/// buffers back out between calls.
pub struct HostState {
    /// Device identity reported through `eea_get_device_id`.
    pub device_id: String,
    /// Configured trace level; routes `eea_trace` output.
    pub trace_level: i32,
    /// Outbound publish queue handle (`eea_send_message`).
    pub outbound: QueueSender<OutboundMessage>,
    /// Shared buffers registered by the guest, if any yet.
    pub buffers: Option<MessageBuffers>,
    /// Peripheral driver backing the optional `eea_fn_*` imports.
    pub peripherals: Arc<dyn PeripheralDriver>,
}

impl std::fmt::Debug for HostState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostState")
            .field("device_id", &self.device_id)
            .field("trace_level", &self.trace_level)
            .field("buffers", &self.buffers)
            .finish_non_exhaustive()
    }
}

impl HostState {
    /// Create host state for a fresh session.
    pub fn new(
        device_id: impl Into<String>,
        trace_level: i32,
        outbound: QueueSender<OutboundMessage>,
        peripherals: Arc<dyn PeripheralDriver>,
    ) -> Self {
        Self {
            device_id: device_id.into(),
            trace_level,
            outbound,
            buffers: None,
            peripherals,
        }
    }
}

fn caller_memory(caller: &mut Caller<'_, HostState>) -> Option<Memory> {
    match caller.get_export("memory") {
        Some(Extern::Memory(memory)) => Some(memory),
        _ => None,
    }
}

fn link_err(function: &str, err: impl ToString) -> EeaError {
    EeaError::HostLink {
        function: function.to_string(),
        cause: err.to_string(),
    }
}

/// Register the full `env` namespace on a linker.
pub fn link_host_abi(linker: &mut Linker<HostState>) -> Result<()> {
    register_core_functions(linker)?;
    register_peripheral_functions(linker)?;
    Ok(())
}

fn register_core_functions(linker: &mut Linker<HostState>) -> Result<()> {
    // eea_trace(ptr, len) -> i32
    linker
        .func_wrap(
            "env",
            "eea_trace",
            |mut caller: Caller<'_, HostState>, ptr: u32, len: u32| -> i32 {
                let level = TraceLevel::from(caller.data().trace_level);
                if level == TraceLevel::Silent {
                    return 0;
                }
                let Some(mem) = caller_memory(&mut caller) else {
                    return -1;
                };
                let line = memory::read_str_clamped(&mem, &caller, ptr, len, TRACE_MAX);
                match level {
                    TraceLevel::Error => tracing::error!(target: "guest", "{}", line),
                    _ => tracing::info!(target: "guest", "{}", line),
                }
                0
            },
        )
        .map_err(|e| link_err("eea_trace", e))?;

    // eea_set_message_buffers(topic_ptr, topic_cap, payload_ptr, payload_cap) -> i32
    linker
        .func_wrap(
            "env",
            "eea_set_message_buffers",
            |mut caller: Caller<'_, HostState>,
             topic_ptr: u32,
             topic_cap: u32,
             payload_ptr: u32,
             payload_cap: u32|
             -> i32 {
                tracing::debug!(topic_cap, payload_cap, "guest registered message buffers");
                caller.data_mut().buffers = Some(MessageBuffers {
                    topic_ptr,
                    topic_cap,
                    payload_ptr,
                    payload_cap,
                });
                0
            },
        )
        .map_err(|e| link_err("eea_set_message_buffers", e))?;

    // eea_send_message(topic_ptr, topic_len, payload_ptr, payload_len, qos) -> i32
    linker
        .func_wrap(
            "env",
            "eea_send_message",
            |mut caller: Caller<'_, HostState>,
             topic_ptr: u32,
             topic_len: u32,
             payload_ptr: u32,
             payload_len: u32,
             qos: u32|
             -> i32 {
                let Some(mem) = caller_memory(&mut caller) else {
                    return -1;
                };
                let topic = memory::read_str_clamped(&mem, &caller, topic_ptr, topic_len, TOPIC_MAX);
                let payload =
                    memory::read_bytes_clamped(&mem, &caller, payload_ptr, payload_len, PAYLOAD_MAX);
                let message = OutboundMessage::new(topic, payload, qos.min(2) as u8);
                // Non-blocking by contract: a full queue drops and logs.
                caller.data().outbound.try_send(message);
                0
            },
        )
        .map_err(|e| link_err("eea_send_message", e))?;

    // Reserved for guest-level small-data persistence. The symbols must
    // link; the implementation is a no-op.
    linker
        .func_wrap(
            "env",
            "eea_storage_save",
            |_caller: Caller<'_, HostState>, _ptr: u32, _len: u32| -> i32 {
                tracing::debug!("eea_storage_save is not implemented on this platform");
                0
            },
        )
        .map_err(|e| link_err("eea_storage_save", e))?;

    linker
        .func_wrap(
            "env",
            "eea_storage_read",
            |_caller: Caller<'_, HostState>, _ptr: u32, _cap: u32, _written_ptr: u32| -> i32 {
                tracing::debug!("eea_storage_read is not implemented on this platform");
                0
            },
        )
        .map_err(|e| link_err("eea_storage_read", e))?;

    // eea_sleep(ms) -> i32
    // A cooperative delay on the supervisor thread; the next eea_loop
    // observes monotonic time advanced by at least this interval.
    linker
        .func_wrap(
            "env",
            "eea_sleep",
            |_caller: Caller<'_, HostState>, ms: u32| -> i32 {
                std::thread::sleep(Duration::from_millis(u64::from(ms)));
                0
            },
        )
        .map_err(|e| link_err("eea_sleep", e))?;

    // eea_get_device_id(ptr, cap, written_ptr) -> i32
    linker
        .func_wrap(
            "env",
            "eea_get_device_id",
            |mut caller: Caller<'_, HostState>, ptr: u32, cap: u32, written_ptr: u32| -> i32 {
                let Some(mem) = caller_memory(&mut caller) else {
                    return -1;
                };
                let device_id = caller.data().device_id.clone();
                let written = memory::write_clamped(&mem, &mut caller, ptr, cap, device_id.as_bytes());
                if !memory::write_u8(&mem, &mut caller, written_ptr, written as u8) {
                    return -1;
                }
                0
            },
        )
        .map_err(|e| link_err("eea_get_device_id", e))?;

    // eea_get_time(ptr) -> i32
    // Wall-clock milliseconds since the Unix epoch, little-endian u64;
    // zero means the platform does not know the time.
    linker
        .func_wrap(
            "env",
            "eea_get_time",
            |mut caller: Caller<'_, HostState>, ptr: u32| -> i32 {
                let Some(mem) = caller_memory(&mut caller) else {
                    return -1;
                };
                let now_ms = SystemTime::now()
                    .duration_since(UNIX_EPOCH)
                    .map(|d| d.as_millis() as u64)
                    .unwrap_or(0);
                if !memory::write_u64_le(&mem, &mut caller, ptr, now_ms) {
                    return -1;
                }
                0
            },
        )
        .map_err(|e| link_err("eea_get_time", e))?;

    Ok(())
}

/// Optional peripheral imports. Each forwards to the configured
/// [`PeripheralDriver`] and returns its result code to the guest.
fn register_peripheral_functions(linker: &mut Linker<HostState>) -> Result<()> {
    linker
        .func_wrap(
            "env",
            "eea_fn_gpio_set_direction",
            |caller: Caller<'_, HostState>, pin: u32, mode: u32| -> i32 {
                caller.data().peripherals.gpio_set_direction(pin as u8, mode)
            },
        )
        .map_err(|e| link_err("eea_fn_gpio_set_direction", e))?;

    linker
        .func_wrap(
            "env",
            "eea_fn_gpio_set_level",
            |caller: Caller<'_, HostState>, pin: u32, level: u32| -> i32 {
                caller.data().peripherals.gpio_set_level(pin as u8, level)
            },
        )
        .map_err(|e| link_err("eea_fn_gpio_set_level", e))?;

    linker
        .func_wrap(
            "env",
            "eea_fn_adc_configure",
            |caller: Caller<'_, HostState>, channel: u32, attenuation: u32| -> i32 {
                caller
                    .data()
                    .peripherals
                    .adc_configure(channel as u8, attenuation)
            },
        )
        .map_err(|e| link_err("eea_fn_adc_configure", e))?;

    linker
        .func_wrap(
            "env",
            "eea_fn_adc_read",
            |mut caller: Caller<'_, HostState>, channel: u32, out_ptr: u32| -> i32 {
                let Some(mem) = caller_memory(&mut caller) else {
                    return -1;
                };
                match caller.data().peripherals.adc_read(channel as u8) {
                    Ok(reading) => {
                        if !memory::write_i32_le(&mem, &mut caller, out_ptr, reading) {
                            return -1;
                        }
                        0
                    }
                    Err(code) => code,
                }
            },
        )
        .map_err(|e| link_err("eea_fn_adc_read", e))?;

    Ok(())
}
