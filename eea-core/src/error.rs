//! Error types for the embedded edge agent.
//!
//! One strongly-typed error enum covers every layer boundary in the agent.
//! Variants carry the identifiers a log reader needs (paths, entry-point
//! names, byte counts); subsystems handle their own errors locally and
//! nothing crosses a task boundary except through queues and the
//! supervisor state machine.

use std::path::PathBuf;
use thiserror::Error;

/// The main error type for agent operations.
#[derive(Error, Debug)]
pub enum EeaError {
    // =========================================================================
    // Configuration Errors (E001-E099)
    // =========================================================================
    /// Failed to read or parse the agent configuration file.
    #[error("E001: Failed to load configuration from {path}: {cause}")]
    ConfigLoad {
        /// Path of the configuration file.
        path: PathBuf,
        /// Reason the load failed.
        cause: String,
    },

    /// A configuration value is missing or invalid.
    #[error("E002: Invalid configuration value for '{field}': {cause}")]
    ConfigValue {
        /// The offending field.
        field: String,
        /// Why the value was rejected.
        cause: String,
    },

    // =========================================================================
    // Bundle / Guest Errors (E100-E199)
    // =========================================================================
    /// A bundle failed to parse, link, or instantiate.
    #[error("E101: Bundle load failed: {cause}")]
    BundleLoad {
        /// Reason the load failed.
        cause: String,
    },

    /// A bundle exceeds the maximum accepted size.
    #[error("E102: Bundle of {size} bytes exceeds maximum of {max} bytes")]
    BundleTooLarge {
        /// Size of the rejected bundle.
        size: usize,
        /// The configured maximum.
        max: usize,
    },

    /// A compressed bundle could not be inflated.
    #[error("E103: Bundle decompression failed: {cause}")]
    BundleDecode {
        /// Reason decompression failed.
        cause: String,
    },

    /// A required guest entry point is absent or has the wrong signature.
    #[error("E104: Required guest entry point '{name}' is missing")]
    EntryPointMissing {
        /// Name of the missing export.
        name: String,
    },

    /// The guest's `eea_init` reported failure.
    #[error("E110: Guest initialization failed with code {code}")]
    GuestInit {
        /// The non-zero return code.
        code: i32,
    },

    /// A guest call trapped.
    #[error("E111: Guest trap in '{entry}': {cause}")]
    GuestTrap {
        /// The entry point that was executing.
        entry: String,
        /// The trap's root cause.
        cause: String,
        /// Rendered backtrace, one frame per line.
        backtrace: String,
    },

    // =========================================================================
    // Guest Memory / ABI Errors (E200-E299)
    // =========================================================================
    /// An access to guest linear memory fell outside its bounds.
    #[error("E201: Guest memory access out of bounds: offset {offset}, length {len}")]
    MemoryAccess {
        /// Start offset of the rejected access.
        offset: u32,
        /// Length of the rejected access.
        len: u32,
    },

    /// A host function could not be registered on the linker.
    #[error("E202: Failed to link host function '{function}': {cause}")]
    HostLink {
        /// Name of the import being linked.
        function: String,
        /// Reason linking failed.
        cause: String,
    },

    // =========================================================================
    // Storage Errors (E300-E399)
    // =========================================================================
    /// A non-volatile storage operation failed.
    #[error("E301: Storage operation failed at {path}: {cause}")]
    Storage {
        /// Path of the blob involved.
        path: PathBuf,
        /// Reason the operation failed.
        cause: String,
    },

    // =========================================================================
    // Broker Errors (E400-E499)
    // =========================================================================
    /// A broker client operation failed.
    #[error("E401: Broker error: {cause}")]
    Broker {
        /// Reason reported by the client.
        cause: String,
    },
}

/// Result type alias using [`EeaError`].
pub type Result<T> = std::result::Result<T, EeaError>;
