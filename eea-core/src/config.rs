//! Agent configuration.
//!
//! Compile-time size limits live here as constants; everything an operator
//! may want to change per device (identity, broker endpoint, credentials,
//! task cadence, stack sizes) lives in [`AgentConfig`], deserialized from a
//! YAML file or defaulted for local development.

use crate::error::{EeaError, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Maximum broker topic length in bytes.
pub const TOPIC_MAX: usize = 256;

/// Maximum inbound/outbound message payload in bytes.
pub const PAYLOAD_MAX: usize = 8192;

/// Maximum compiled bundle size in bytes (256 KiB).
pub const BUNDLE_MAX: usize = 262_144;

/// Broker client incoming buffer size; must fit a whole bundle publish.
pub const BROKER_IN_BUF: usize = 262_144;

/// Broker client outgoing buffer size.
pub const BROKER_OUT_BUF: usize = 32_768;

/// Per-device agent configuration.
///
/// Every field has a default so a bare `AgentConfig::default()` produces a
/// runnable local configuration; deployments override via YAML.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AgentConfig {
    /// Device identity; used as the broker client id and in topic paths.
    pub device_id: String,
    /// Broker hostname or IP.
    pub broker_host: String,
    /// Broker port.
    pub broker_port: u16,
    /// Broker access key (username). Empty disables authentication.
    pub access_key: String,
    /// Broker access secret (password).
    pub access_secret: String,
    /// Root segment of all device topics.
    pub base_topic: String,
    /// Supervisor tick period in milliseconds.
    pub tick_interval_ms: u64,
    /// Persistor poll period in milliseconds.
    pub persist_interval_ms: u64,
    /// Directory backing the non-volatile blob store.
    pub storage_dir: PathBuf,
    /// Stack size of the supervisor thread. Guest calls may recurse deeply,
    /// so this is the platform hook for providing a large stack backing.
    pub supervisor_stack_bytes: usize,
    /// Stack size of the persistor thread.
    pub persistor_stack_bytes: usize,
    /// Trace level pushed to the guest before `eea_init`.
    pub trace_level: i32,
    /// Guest storage size pushed before `eea_init`.
    pub storage_size: i32,
    /// Guest storage interval pushed before `eea_init`.
    pub storage_interval: i32,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            device_id: "dev-local".to_string(),
            broker_host: "broker.losant.com".to_string(),
            broker_port: 1883,
            access_key: String::new(),
            access_secret: String::new(),
            base_topic: "losant".to_string(),
            tick_interval_ms: 50,
            persist_interval_ms: 100,
            storage_dir: PathBuf::from("./eea-data"),
            supervisor_stack_bytes: 4 * 1024 * 1024,
            persistor_stack_bytes: 64 * 1024,
            trace_level: 1,
            storage_size: 4096,
            storage_interval: 0,
        }
    }
}

impl AgentConfig {
    /// Load configuration from a YAML file.
    pub fn from_yaml_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| EeaError::ConfigLoad {
            path: path.to_path_buf(),
            cause: e.to_string(),
        })?;
        let config: Self = serde_yaml::from_str(&raw).map_err(|e| EeaError::ConfigLoad {
            path: path.to_path_buf(),
            cause: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Check invariants a deserialized configuration must uphold.
    pub fn validate(&self) -> Result<()> {
        if self.device_id.is_empty() {
            return Err(EeaError::ConfigValue {
                field: "device_id".to_string(),
                cause: "must not be empty".to_string(),
            });
        }
        if self.device_id.contains('#') || self.device_id.contains('/') {
            return Err(EeaError::ConfigValue {
                field: "device_id".to_string(),
                cause: "must not contain '#' or '/'".to_string(),
            });
        }
        if self.tick_interval_ms == 0 {
            return Err(EeaError::ConfigValue {
                field: "tick_interval_ms".to_string(),
                cause: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }

    /// Build a device-scoped topic: `{base_topic}/{device_id}/{suffix}`.
    pub fn device_topic(&self, suffix: &str) -> String {
        format!("{}/{}/{}", self.base_topic, self.device_id, suffix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_are_valid() {
        let config = AgentConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.tick_interval_ms, 50);
        assert_eq!(config.trace_level, 1);
        assert_eq!(config.storage_size, 4096);
    }

    #[test]
    fn device_topic_layout() {
        let config = AgentConfig {
            device_id: "DEV1".to_string(),
            ..AgentConfig::default()
        };
        assert_eq!(
            config.device_topic("fromAgent/hello"),
            "losant/DEV1/fromAgent/hello"
        );
        assert_eq!(config.device_topic("toAgent/#"), "losant/DEV1/toAgent/#");
    }

    #[test]
    fn rejects_bad_device_id() {
        let config = AgentConfig {
            device_id: "a/b".to_string(),
            ..AgentConfig::default()
        };
        assert!(config.validate().is_err());

        let config = AgentConfig {
            device_id: String::new(),
            ..AgentConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn loads_partial_yaml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "device_id: DEV9\nbroker_port: 8883").unwrap();
        let config = AgentConfig::from_yaml_file(file.path()).unwrap();
        assert_eq!(config.device_id, "DEV9");
        assert_eq!(config.broker_port, 8883);
        // unspecified fields keep defaults
        assert_eq!(config.base_topic, "losant");
    }

    #[test]
    fn load_missing_file_fails() {
        let err = AgentConfig::from_yaml_file(Path::new("/nonexistent/eea.yaml")).unwrap_err();
        assert!(matches!(err, EeaError::ConfigLoad { .. }));
    }
}
