//! The Hello message: the device's self-announcement, published on
//! connect (bare devices) and after every successful bundle install.

use eea_core::{AgentConfig, OutboundMessage};

/// Service name the platform expects in the Hello payload.
pub const SERVICE: &str = "embeddedWorkflowAgent";

/// Agent protocol version reported in the Hello payload.
pub const AGENT_VERSION: &str = "1.0.0";

/// Bundle identifier reported while no bundle is installed.
pub const NULL_VERSION: &str = "nullVersion";

/// Build the Hello message for the given bundle identifier.
pub fn hello_message(config: &AgentConfig, bundle_id: &str) -> OutboundMessage {
    let payload = serde_json::json!({
        "service": SERVICE,
        "version": AGENT_VERSION,
        "bundle": bundle_id,
        "compilerOptions": {
            "exportMemory": true,
            "traceLevel": 2,
        },
    });
    OutboundMessage::new(
        config.device_topic("fromAgent/hello"),
        payload.to_string().into_bytes(),
        0,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hello_shape() {
        let config = AgentConfig {
            device_id: "DEV1".to_string(),
            ..AgentConfig::default()
        };
        let message = hello_message(&config, NULL_VERSION);
        assert_eq!(message.topic, "losant/DEV1/fromAgent/hello");
        assert_eq!(message.qos, 0);

        let payload: serde_json::Value = serde_json::from_slice(&message.payload).unwrap();
        assert_eq!(payload["service"], "embeddedWorkflowAgent");
        assert_eq!(payload["version"], "1.0.0");
        assert_eq!(payload["bundle"], "nullVersion");
        assert_eq!(payload["compilerOptions"]["exportMemory"], true);
        assert_eq!(payload["compilerOptions"]["traceLevel"], 2);
    }

    #[test]
    fn hello_carries_installed_bundle() {
        let config = AgentConfig::default();
        let message = hello_message(&config, "v1-abc");
        let payload: serde_json::Value = serde_json::from_slice(&message.payload).unwrap();
        assert_eq!(payload["bundle"], "v1-abc");
    }
}
