//! Message and bundle types exchanged between the agent's tasks.
//!
//! Link-state changes travel through the inbound queue as synthetic
//! messages on the reserved `#connect` / `#disconnect` topics. Subscribed
//! broker topics can never contain `#`, so the markers cannot collide with
//! real traffic.

use std::fmt;
use std::sync::Arc;

/// Synthetic topic signalling the broker session came up.
pub const TOPIC_CONNECT: &str = "#connect";

/// Synthetic topic signalling the broker session went down.
pub const TOPIC_DISCONNECT: &str = "#disconnect";

/// Returns true when a topic carries a compiled bundle rather than a
/// regular message. The broker publishes bundles on
/// `.../toAgent/flows/...`, so the substring is the routing key.
pub fn is_bundle_topic(topic: &str) -> bool {
    topic.contains("flows")
}

/// A message received from the broker (or synthesized by the broker
/// worker), headed for the guest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    /// Broker topic, or a synthetic `#`-prefixed marker.
    pub topic: String,
    /// Raw payload bytes.
    pub payload: Vec<u8>,
}

impl InboundMessage {
    /// Create a message with the given topic and payload.
    pub fn new(topic: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
        }
    }

    /// The synthetic connected marker.
    pub fn connect() -> Self {
        Self::new(TOPIC_CONNECT, Vec::new())
    }

    /// The synthetic disconnected marker.
    pub fn disconnect() -> Self {
        Self::new(TOPIC_DISCONNECT, Vec::new())
    }

    /// `Some(true)` / `Some(false)` for the synthetic link-state markers,
    /// `None` for real broker traffic.
    pub fn link_state(&self) -> Option<bool> {
        match self.topic.as_str() {
            TOPIC_CONNECT => Some(true),
            TOPIC_DISCONNECT => Some(false),
            _ => None,
        }
    }
}

/// A message produced by the guest (or the supervisor, for Hello), headed
/// for the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    /// Destination topic.
    pub topic: String,
    /// Raw payload bytes.
    pub payload: Vec<u8>,
    /// Quality of service, 0..=2.
    pub qos: u8,
}

impl OutboundMessage {
    /// Create an outbound message. QoS values above 2 are clamped.
    pub fn new(topic: impl Into<String>, payload: impl Into<Vec<u8>>, qos: u8) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
            qos: qos.min(2),
        }
    }
}

/// An opaque compiled workflow bundle as received from the broker or read
/// back from storage. The blob is reference-counted so the supervisor can
/// pin it for the lifetime of an interpreter session while the persistor
/// writes the same bytes.
#[derive(Clone, PartialEq, Eq)]
pub struct Bundle {
    /// Raw module bytes (possibly gzip-compressed on the wire).
    pub bytes: Arc<Vec<u8>>,
}

impl Bundle {
    /// Wrap raw bundle bytes.
    pub fn new(bytes: Vec<u8>) -> Self {
        Self {
            bytes: Arc::new(bytes),
        }
    }

    /// Size of the blob in bytes.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// True when the blob is empty.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl fmt::Debug for Bundle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bundle").field("len", &self.len()).finish()
    }
}

/// A request for the persistor to write the currently installed bundle.
///
/// The distilled element is the bundle identifier; the blob handle rides
/// along because tasks share data through owned handles rather than
/// through a pointer into supervisor state.
#[derive(Debug, Clone)]
pub struct PersistRequest {
    /// Identifier extracted from the installed bundle.
    pub bundle_id: String,
    /// The pinned blob to write.
    pub bytes: Arc<Vec<u8>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn synthetic_markers() {
        assert_eq!(InboundMessage::connect().link_state(), Some(true));
        assert_eq!(InboundMessage::disconnect().link_state(), Some(false));
        assert_eq!(
            InboundMessage::new("losant/DEV1/command", b"{}".to_vec()).link_state(),
            None
        );
    }

    #[test]
    fn bundle_topic_routing() {
        assert!(is_bundle_topic("a/flows/b"));
        assert!(is_bundle_topic("losant/DEV1/toAgent/flows/abc"));
        assert!(!is_bundle_topic("floor"));
        assert!(!is_bundle_topic("losant/DEV1/command"));
    }

    #[test]
    fn qos_is_clamped() {
        assert_eq!(OutboundMessage::new("t", b"p".to_vec(), 7).qos, 2);
        assert_eq!(OutboundMessage::new("t", b"p".to_vec(), 1).qos, 1);
    }

    #[test]
    fn bundle_debug_hides_bytes() {
        let bundle = Bundle::new(vec![0u8; 1024]);
        let rendered = format!("{:?}", bundle);
        assert!(rendered.contains("1024"));
        assert!(rendered.len() < 64);
    }
}
