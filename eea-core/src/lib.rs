//! EEA Core Library
//!
//! Foundational types for the embedded edge agent:
//!
//! - **Errors**: the agent-wide [`EeaError`] taxonomy and [`Result`] alias
//! - **Configuration**: [`AgentConfig`] plus the compile-time size limits
//! - **Messages**: inbound/outbound broker messages, workflow bundles, and
//!   the synthetic link-state markers
//! - **Queues**: the bounded drop-newest FIFOs and depth-1 replace slots
//!   that decouple the agent's tasks
//!
//! Everything here is shared between the broker worker, the runtime
//! supervisor, and the bundle persistor; none of it depends on the guest
//! engine or the broker client.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod error;
pub mod message;
pub mod queue;

pub use config::{
    AgentConfig, BROKER_IN_BUF, BROKER_OUT_BUF, BUNDLE_MAX, PAYLOAD_MAX, TOPIC_MAX,
};
pub use error::{EeaError, Result};
pub use message::{
    Bundle, InboundMessage, OutboundMessage, PersistRequest, is_bundle_topic,
};
pub use queue::{QueueReceiver, QueueSender, SlotReceiver, SlotSender, bounded, slot};
