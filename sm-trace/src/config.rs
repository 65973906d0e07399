//! Listener configuration types
//!
//! The port and bind address come from the surrounding tool; this module only
//! carries them together with the few knobs that change how the decode loop
//! behaves.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Port the instrumented runtime connects to unless configured otherwise
pub const DEFAULT_PORT: u16 = 34768;

/// What the decode loop does with a frame whose type it does not know
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnknownFramePolicy {
    /// Consume nothing past the header (stream may desynchronize)
    #[default]
    Ignore,
    /// Skip exactly `body_length` bytes, and reconcile known frames against
    /// their declared length
    SkipBody,
}

/// Configuration for one trace listener
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TracerConfig {
    /// Interface to bind (default: all interfaces)
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    /// TCP port to listen on
    #[serde(default = "default_port")]
    pub port: u16,

    /// Handling of undefined frame types
    #[serde(default)]
    pub unknown_frames: UnknownFramePolicy,

    /// Optional socket read timeout in milliseconds (default: block forever)
    #[serde(default)]
    pub read_timeout_ms: Option<u64>,

    /// Compare the OpenConnection source name against the loaded diagram
    #[serde(default = "default_true")]
    pub check_identity: bool,
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_true() -> bool {
    true
}

impl Default for TracerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_port(),
            unknown_frames: UnknownFramePolicy::default(),
            read_timeout_ms: None,
            check_identity: true,
        }
    }
}

impl TracerConfig {
    /// Create a new listener configuration with default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder method: set the TCP port (0 picks an ephemeral port)
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Builder method: set the interface to bind
    pub fn with_bind_address(mut self, address: impl Into<String>) -> Self {
        self.bind_address = address.into();
        self
    }

    /// Builder method: choose the unknown frame policy
    pub fn with_unknown_frames(mut self, policy: UnknownFramePolicy) -> Self {
        self.unknown_frames = policy;
        self
    }

    /// Builder method: set a read timeout in milliseconds
    pub fn with_read_timeout_ms(mut self, millis: u64) -> Self {
        self.read_timeout_ms = Some(millis);
        self
    }

    /// Builder method: enable or disable the source identity check
    pub fn with_identity_check(mut self, enabled: bool) -> Self {
        self.check_identity = enabled;
        self
    }

    /// `host:port` string suitable for `TcpListener::bind`
    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.bind_address, self.port)
    }

    /// Read timeout as a `Duration`; zero is treated as "no timeout"
    pub fn read_timeout(&self) -> Option<Duration> {
        self.read_timeout_ms
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tracer_config_builder() {
        let config = TracerConfig::new()
            .with_port(0)
            .with_bind_address("127.0.0.1")
            .with_unknown_frames(UnknownFramePolicy::SkipBody)
            .with_read_timeout_ms(250)
            .with_identity_check(false);

        assert_eq!(config.socket_addr(), "127.0.0.1:0");
        assert_eq!(config.unknown_frames, UnknownFramePolicy::SkipBody);
        assert_eq!(config.read_timeout(), Some(Duration::from_millis(250)));
        assert!(!config.check_identity);
    }

    #[test]
    fn test_defaults() {
        let config = TracerConfig::new();
        assert_eq!(config.port, 34768);
        assert_eq!(config.socket_addr(), "0.0.0.0:34768");
        assert_eq!(config.unknown_frames, UnknownFramePolicy::Ignore);
        assert_eq!(config.read_timeout(), None);
        assert!(config.check_identity);
    }

    #[test]
    fn test_zero_timeout_means_none() {
        let config = TracerConfig::new().with_read_timeout_ms(0);
        assert_eq!(config.read_timeout(), None);
    }

    #[test]
    fn test_partial_deserialization_uses_defaults() {
        let config: TracerConfig =
            serde_json::from_str(r#"{ "port": 4000, "unknown_frames": "skip_body" }"#).unwrap();
        assert_eq!(config.port, 4000);
        assert_eq!(config.bind_address, "0.0.0.0");
        assert_eq!(config.unknown_frames, UnknownFramePolicy::SkipBody);
        assert!(config.check_identity);
    }
}
