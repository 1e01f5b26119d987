//! Client configuration
//!
//! Loaded from a JSON file with kebab-case keys; every field has a default,
//! so `{}` is a valid configuration.

use std::fs;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Lwm2mError, Result};

/// Default IPC port
pub const DEFAULT_IPC_PORT: u16 = 12345;

/// Default bound for every serialized message
pub const DEFAULT_MAX_MESSAGE_LEN: usize = 65535;

/// Smallest accepted message bound
pub const MIN_MESSAGE_LEN: usize = 64;

/// IPC client configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ClientConfig {
    /// Address the IPC socket binds to
    #[serde(default = "default_ipc_address")]
    pub ipc_address: SocketAddr,

    /// Upper bound on a serialized request, response or notification
    #[serde(default = "default_max_message_len")]
    pub max_message_len: usize,

    /// Socket read timeout between change notification pumps
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// JSON file of object descriptions defined at startup
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub definitions: Option<PathBuf>,
}

fn default_ipc_address() -> SocketAddr {
    SocketAddr::from((Ipv4Addr::LOCALHOST, DEFAULT_IPC_PORT))
}

fn default_max_message_len() -> usize {
    DEFAULT_MAX_MESSAGE_LEN
}

fn default_poll_interval_ms() -> u64 {
    50
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            ipc_address: default_ipc_address(),
            max_message_len: default_max_message_len(),
            poll_interval_ms: default_poll_interval_ms(),
            definitions: None,
        }
    }
}

impl ClientConfig {
    /// Load and validate a configuration file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&content)
    }

    /// Parse and validate a JSON configuration
    pub fn from_json_str(content: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_message_len < MIN_MESSAGE_LEN {
            return Err(Lwm2mError::InvalidConfig(format!(
                "max-message-len must be at least {}, got {}",
                MIN_MESSAGE_LEN, self.max_message_len
            )));
        }
        if self.poll_interval_ms == 0 {
            return Err(Lwm2mError::InvalidConfig(
                "poll-interval-ms must be greater than 0".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ClientConfig::from_json_str("{}").unwrap();
        assert_eq!(config, ClientConfig::default());
        assert_eq!(config.ipc_address.to_string(), "127.0.0.1:12345");
        assert_eq!(config.max_message_len, 65535);
        assert_eq!(config.poll_interval_ms, 50);
    }

    #[test]
    fn test_kebab_case_keys() {
        let config = ClientConfig::from_json_str(
            r#"{"ipc-address": "0.0.0.0:4000", "max-message-len": 1024, "definitions": "objects.json"}"#,
        )
        .unwrap();
        assert_eq!(config.ipc_address.port(), 4000);
        assert_eq!(config.max_message_len, 1024);
        assert_eq!(config.definitions, Some(PathBuf::from("objects.json")));
    }

    #[test]
    fn test_validation() {
        assert!(ClientConfig::from_json_str(r#"{"max-message-len": 10}"#).is_err());
        assert!(ClientConfig::from_json_str(r#"{"poll-interval-ms": 0}"#).is_err());
        assert!(ClientConfig::from_json_str("not json").is_err());
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("client.json");
        fs::write(&path, r#"{"poll-interval-ms": 10}"#).unwrap();

        let config = ClientConfig::from_file(&path).unwrap();
        assert_eq!(config.poll_interval_ms, 10);
        assert!(ClientConfig::from_file(dir.path().join("missing.json")).is_err());
    }
}
