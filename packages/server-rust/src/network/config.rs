//! Configuration for the built-in transport bindings.

use std::time::Duration;

use switchyard_core::Codec;

/// Configuration for [`HttpBinding`](super::http::HttpBinding).
#[derive(Debug, Clone)]
pub struct HttpBindingConfig {
    /// Bind address for the listener.
    pub host: String,
    /// Port to listen on. 0 means OS-assigned.
    pub port: u16,
    /// Largest accepted request body in bytes.
    pub max_body_bytes: usize,
    /// Maximum time `stop()` waits for in-flight requests.
    pub drain_timeout: Duration,
    /// Codec used when a request carries no `content-type` header.
    pub default_codec: Codec,
}

impl Default for HttpBindingConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 0,
            max_body_bytes: 4 * 1024 * 1024,
            drain_timeout: Duration::from_secs(30),
            default_codec: Codec::MsgPack,
        }
    }
}

impl HttpBindingConfig {
    /// The `host:port` string the listener binds to.
    #[must_use]
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Configuration for [`SocketBinding`](super::socket::SocketBinding).
#[derive(Debug, Clone)]
pub struct SocketBindingConfig {
    /// Bind address for the listener.
    pub host: String,
    /// Port to listen on. 0 means OS-assigned.
    pub port: u16,
    /// Largest accepted frame in bytes, length prefix excluded.
    pub max_frame_bytes: usize,
    /// Maximum time `stop()` waits for in-flight requests.
    pub drain_timeout: Duration,
    /// Bounded capacity of each connection's outbound response queue.
    pub outbound_channel_capacity: usize,
}

impl Default for SocketBindingConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 0,
            max_frame_bytes: 4 * 1024 * 1024,
            drain_timeout: Duration::from_secs(30),
            outbound_channel_capacity: 256,
        }
    }
}

impl SocketBindingConfig {
    /// The `host:port` string the listener binds to.
    #[must_use]
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_defaults() {
        let config = HttpBindingConfig::default();
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.port, 0);
        assert_eq!(config.max_body_bytes, 4 * 1024 * 1024);
        assert_eq!(config.drain_timeout, Duration::from_secs(30));
        assert_eq!(config.default_codec, Codec::MsgPack);
        assert_eq!(config.bind_addr(), "127.0.0.1:0");
    }

    #[test]
    fn socket_defaults() {
        let config = SocketBindingConfig::default();
        assert_eq!(config.port, 0);
        assert_eq!(config.max_frame_bytes, 4 * 1024 * 1024);
        assert_eq!(config.outbound_channel_capacity, 256);
    }

    #[test]
    fn struct_update_overrides_single_field() {
        let config = SocketBindingConfig {
            port: 7000,
            ..SocketBindingConfig::default()
        };
        assert_eq!(config.bind_addr(), "127.0.0.1:7000");
        assert_eq!(config.drain_timeout, Duration::from_secs(30));
    }
}
