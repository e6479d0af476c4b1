//! EEA Agent - the embedded edge agent runtime.
//!
//! This crate provides the concurrent machinery of the agent:
//! - Broker worker maintaining the publish/subscribe session
//! - Guest runtime, host ABI, and interpreter sessions (wasmtime)
//! - The runtime supervisor state machine driving the guest
//! - The bundle persistor and non-volatile blob store
//! - Peripheral drivers exposed as optional guest imports

#![warn(missing_docs)]

pub mod broker;
pub mod hello;
pub mod observability;
pub mod peripherals;
pub mod persist;
pub mod supervisor;
pub mod wasm;

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::broker::BrokerWorker;
    pub use crate::hello::{NULL_VERSION, hello_message};
    pub use crate::peripherals::{PeripheralDriver, SimulatedPeripherals};
    pub use crate::persist::{BundleStore, Persistor};
    pub use crate::supervisor::{Supervisor, SupervisorState};
    pub use crate::wasm::{GuestRuntime, GuestRuntimeConfig, HostState, Session};
}
