//! Guest engine configuration and bundle compilation.

use eea_core::{BUNDLE_MAX, EeaError, Result};
use std::io::Read;
use wasmtime::{Config, Engine, Module, WasmBacktraceDetails};

/// Leading bytes of a gzip stream.
const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Configuration for the guest engine.
#[derive(Debug, Clone)]
pub struct GuestRuntimeConfig {
    /// Maximum size in bytes of the guest call stack.
    pub max_wasm_stack: usize,
    /// Enable DWARF debug info in compiled modules.
    pub debug_info: bool,
    /// Capture file/line detail in trap backtraces when available.
    pub backtrace_details: bool,
}

impl Default for GuestRuntimeConfig {
    fn default() -> Self {
        Self {
            max_wasm_stack: 512 * 1024,
            debug_info: false,
            backtrace_details: true,
        }
    }
}

impl GuestRuntimeConfig {
    fn to_wasmtime_config(&self) -> Config {
        let mut config = Config::new();
        config.max_wasm_stack(self.max_wasm_stack);
        config.debug_info(self.debug_info);
        config.wasm_backtrace_details(if self.backtrace_details {
            WasmBacktraceDetails::Enable
        } else {
            WasmBacktraceDetails::Disable
        });
        config.strategy(wasmtime::Strategy::Cranelift);
        config
    }
}

/// The guest engine. One engine outlives every interpreter session; each
/// installed bundle gets a fresh store, linker, and instance.
pub struct GuestRuntime {
    engine: Engine,
    config: GuestRuntimeConfig,
}

impl GuestRuntime {
    /// Create a runtime with the given configuration.
    pub fn new(config: GuestRuntimeConfig) -> Result<Self> {
        let engine = Engine::new(&config.to_wasmtime_config()).map_err(|e| EeaError::BundleLoad {
            cause: format!("engine construction failed: {e}"),
        })?;
        Ok(Self { engine, config })
    }

    /// Create a runtime with default configuration.
    pub fn with_defaults() -> Result<Self> {
        Self::new(GuestRuntimeConfig::default())
    }

    /// The underlying wasmtime engine.
    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    /// The runtime configuration.
    pub fn config(&self) -> &GuestRuntimeConfig {
        &self.config
    }

    /// Compile bundle bytes into a module.
    ///
    /// Enforces the wire-size ceiling and inflates gzip-compressed
    /// bundles before handing the bytes to the engine.
    pub fn compile(&self, bytes: &[u8]) -> Result<Module> {
        if bytes.len() > BUNDLE_MAX {
            return Err(EeaError::BundleTooLarge {
                size: bytes.len(),
                max: BUNDLE_MAX,
            });
        }

        let inflated;
        let module_bytes = if is_gzip(bytes) {
            inflated = inflate(bytes)?;
            inflated.as_slice()
        } else {
            bytes
        };

        Module::new(&self.engine, module_bytes).map_err(|e| EeaError::BundleLoad {
            cause: e.to_string(),
        })
    }
}

/// True when the blob carries the gzip magic.
pub fn is_gzip(bytes: &[u8]) -> bool {
    bytes.len() >= 2 && bytes[..2] == GZIP_MAGIC
}

fn inflate(bytes: &[u8]) -> Result<Vec<u8>> {
    let mut decoder = libflate::gzip::Decoder::new(bytes).map_err(|e| EeaError::BundleDecode {
        cause: e.to_string(),
    })?;
    let mut decoded = Vec::new();
    decoder
        .read_to_end(&mut decoded)
        .map_err(|e| EeaError::BundleDecode {
            cause: e.to_string(),
        })?;
    Ok(decoded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const EMPTY_MODULE: &str = "(module)";

    #[test]
    fn compiles_valid_module() {
        let runtime = GuestRuntime::with_defaults().unwrap();
        let bytes = wat::parse_str(EMPTY_MODULE).unwrap();
        assert!(runtime.compile(&bytes).is_ok());
    }

    #[test]
    fn rejects_invalid_bytes() {
        let runtime = GuestRuntime::with_defaults().unwrap();
        let err = runtime.compile(b"not a wasm module").unwrap_err();
        assert!(matches!(err, EeaError::BundleLoad { .. }));
    }

    #[test]
    fn rejects_oversized_bundle() {
        let runtime = GuestRuntime::with_defaults().unwrap();
        let blob = vec![0u8; BUNDLE_MAX + 1];
        let err = runtime.compile(&blob).unwrap_err();
        assert!(matches!(err, EeaError::BundleTooLarge { .. }));
    }

    #[test]
    fn inflates_gzip_bundle() {
        let bytes = wat::parse_str(EMPTY_MODULE).unwrap();
        let mut encoder = libflate::gzip::Encoder::new(Vec::new()).unwrap();
        encoder.write_all(&bytes).unwrap();
        let compressed = encoder.finish().into_result().unwrap();
        assert!(is_gzip(&compressed));

        let runtime = GuestRuntime::with_defaults().unwrap();
        assert!(runtime.compile(&compressed).is_ok());
    }

    #[test]
    fn gzip_magic_detection() {
        assert!(!is_gzip(b""));
        assert!(!is_gzip(b"\x1f"));
        assert!(!is_gzip(b"\x00asm"));
        assert!(is_gzip(&[0x1f, 0x8b, 0x08]));
    }
}
