//! Connection configuration.

use std::time::Duration;

use kelimelik_protocol::DEFAULT_MAX_FRAME_SIZE;
use kelimelik_transport::DEFAULT_READ_BUFFER_SIZE;
use serde::{Deserialize, Serialize};

/// Settings for a [`ServerConnection`](crate::ServerConnection).
///
/// Every field has a default, so a config file only needs to mention what
/// it changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Remote host name or address.
    pub host: String,

    /// Remote TCP port. The game server speaks its plain binary protocol
    /// on 443.
    pub port: u16,

    /// Header prefix of application packets. Incoming packets whose header
    /// does not start with this are ignored by dispatch.
    pub module_prefix: String,

    /// Time between keepalive pings. Zero disables the keepalive.
    pub keepalive_interval: Duration,

    /// Largest frame body the parser will buffer.
    pub max_frame_size: u32,

    /// How many corrupt frames in a row are tolerated before the
    /// connection is closed.
    pub max_corrupt_frames: u32,

    /// Size of a single read from the transport.
    pub read_buffer_size: usize,
}

impl ConnectionConfig {
    pub const DEFAULT_HOST: &'static str = "kelimelikserver.he2apps.com";
    pub const DEFAULT_PORT: u16 = 443;
    pub const DEFAULT_MODULE_PREFIX: &'static str = "GameModule_";
    pub const DEFAULT_KEEPALIVE_INTERVAL: Duration = Duration::from_secs(60);

    /// `"host:port"` for connecting.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Header of the keepalive ping, e.g. `"GameModule_requestPing"`.
    pub fn ping_header(&self) -> String {
        format!("{}requestPing", self.module_prefix)
    }

    /// Whether `header` belongs to the application namespace.
    pub fn is_application_header(&self, header: &str) -> bool {
        header.starts_with(&self.module_prefix)
    }

    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn module_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.module_prefix = prefix.into();
        self
    }

    pub fn keepalive_interval(mut self, interval: Duration) -> Self {
        self.keepalive_interval = interval;
        self
    }

    pub fn max_frame_size(mut self, max: u32) -> Self {
        self.max_frame_size = max;
        self
    }

    pub fn max_corrupt_frames(mut self, max: u32) -> Self {
        self.max_corrupt_frames = max;
        self
    }

    pub fn read_buffer_size(mut self, size: usize) -> Self {
        self.read_buffer_size = size;
        self
    }

    /// Replaces values that cannot work with their defaults.
    ///
    /// Called automatically when a connection is created. Rules:
    /// - `max_frame_size` of 0 would refuse every frame.
    /// - `read_buffer_size` of 0 would never read anything.
    pub fn validated(mut self) -> Self {
        if self.max_frame_size == 0 {
            tracing::warn!(
                default = DEFAULT_MAX_FRAME_SIZE,
                "max_frame_size is 0, using default"
            );
            self.max_frame_size = DEFAULT_MAX_FRAME_SIZE;
        }
        if self.read_buffer_size == 0 {
            tracing::warn!(
                default = DEFAULT_READ_BUFFER_SIZE,
                "read_buffer_size is 0, using default"
            );
            self.read_buffer_size = DEFAULT_READ_BUFFER_SIZE;
        }
        if self.module_prefix.is_empty() {
            tracing::warn!("module_prefix is empty, every incoming packet will be dispatched");
        }
        self
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            host: Self::DEFAULT_HOST.to_string(),
            port: Self::DEFAULT_PORT,
            module_prefix: Self::DEFAULT_MODULE_PREFIX.to_string(),
            keepalive_interval: Self::DEFAULT_KEEPALIVE_INTERVAL,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            max_corrupt_frames: 3,
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = ConnectionConfig::default();
        assert_eq!(cfg.address(), "kelimelikserver.he2apps.com:443");
        assert_eq!(cfg.ping_header(), "GameModule_requestPing");
        assert_eq!(cfg.keepalive_interval, Duration::from_secs(60));
        assert_eq!(cfg.max_corrupt_frames, 3);
    }

    #[test]
    fn test_builder_setters() {
        let cfg = ConnectionConfig::default()
            .host("127.0.0.1")
            .port(9000)
            .module_prefix("TestModule_")
            .keepalive_interval(Duration::ZERO);
        assert_eq!(cfg.address(), "127.0.0.1:9000");
        assert_eq!(cfg.ping_header(), "TestModule_requestPing");
        assert!(cfg.is_application_header("TestModule_hello"));
        assert!(!cfg.is_application_header("GameModule_hello"));
    }

    #[test]
    fn test_validated_replaces_zero_sizes() {
        let cfg = ConnectionConfig::default()
            .max_frame_size(0)
            .read_buffer_size(0)
            .validated();
        assert_eq!(cfg.max_frame_size, DEFAULT_MAX_FRAME_SIZE);
        assert_eq!(cfg.read_buffer_size, DEFAULT_READ_BUFFER_SIZE);
    }

    #[test]
    fn test_partial_config_fills_defaults() {
        let cfg: ConnectionConfig =
            serde_json::from_str(r#"{ "host": "localhost", "port": 4443 }"#).unwrap();
        assert_eq!(cfg.address(), "localhost:4443");
        assert_eq!(cfg.module_prefix, "GameModule_");
        assert_eq!(cfg.keepalive_interval, Duration::from_secs(60));
    }
}
