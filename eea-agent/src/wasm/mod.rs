//! Guest execution: engine configuration, bounds-checked memory access,
//! the host ABI, and the interpreter session wrapping a loaded bundle.

pub mod host;
pub mod memory;
pub mod runtime;
pub mod session;

pub use host::{HostState, MessageBuffers, TraceLevel, link_host_abi};
pub use runtime::{GuestRuntime, GuestRuntimeConfig};
pub use session::{DeliverOutcome, Session};
