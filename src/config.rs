//! Server configuration, built once at startup and shared by reference with
//! every connection and the event loop.

use std::time::Duration;

/// Immutable configuration for one running server instance.
///
/// Constructed via [`ServerConfigBuilder`] and then handed out by shared
/// reference (`&ServerConfig`) to the event loop, connections, and the
/// handshake verifier, rather than being threaded through as individual
/// parameters or duplicated per connection.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind the listening socket to.
    pub host: String,
    /// Port to bind the listening socket to.
    pub port: u16,
    /// Expected value of the `Host` header, if restricted. `None` accepts any.
    pub server_name: Option<String>,
    /// Allowed `Origin` header value, if restricted. `None` accepts any.
    pub origin_policy: Option<String>,
    /// Maximum reassembled application message size, in bytes.
    pub max_message_size: u64,
    /// How long a connection may sit in `AwaitingHandshake` before being dropped.
    pub handshake_timeout: Duration,
    /// How long an open connection may go without traffic before being dropped.
    pub idle_timeout: Duration,
    /// Backlog passed to `listen()`.
    pub listen_backlog: i32,
    /// Enables verbose diagnostic logging.
    pub debug: bool,
}

impl ServerConfig {
    pub fn builder(host: impl Into<String>, port: u16) -> ServerConfigBuilder {
        ServerConfigBuilder::new(host, port)
    }
}

/// Builder for [`ServerConfig`], applying the defaults named in its fields.
#[derive(Debug, Clone)]
pub struct ServerConfigBuilder {
    host: String,
    port: u16,
    server_name: Option<String>,
    origin_policy: Option<String>,
    max_message_size: u64,
    handshake_timeout: Duration,
    idle_timeout: Duration,
    listen_backlog: i32,
    debug: bool,
}

impl ServerConfigBuilder {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        ServerConfigBuilder {
            host: host.into(),
            port,
            server_name: None,
            origin_policy: None,
            max_message_size: 64 * 1024 * 1024,
            handshake_timeout: Duration::from_secs(10),
            idle_timeout: Duration::from_secs(60),
            listen_backlog: 16,
            debug: false,
        }
    }

    pub fn server_name(mut self, name: impl Into<String>) -> Self {
        self.server_name = Some(name.into());
        self
    }

    pub fn origin_policy(mut self, origin: impl Into<String>) -> Self {
        self.origin_policy = Some(origin.into());
        self
    }

    pub fn max_message_size(mut self, bytes: u64) -> Self {
        self.max_message_size = bytes;
        self
    }

    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    pub fn listen_backlog(mut self, backlog: i32) -> Self {
        self.listen_backlog = backlog;
        self
    }

    pub fn debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub fn build(self) -> ServerConfig {
        ServerConfig {
            host: self.host,
            port: self.port,
            server_name: self.server_name,
            origin_policy: self.origin_policy,
            max_message_size: self.max_message_size,
            handshake_timeout: self.handshake_timeout,
            idle_timeout: self.idle_timeout,
            listen_backlog: self.listen_backlog,
            debug: self.debug,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn defaults_are_permissive() {
        let cfg = ServerConfig::builder("0.0.0.0", 9000).build();
        assert_eq!(cfg.port, 9000);
        assert!(cfg.server_name.is_none());
        assert!(cfg.origin_policy.is_none());
        assert_eq!(cfg.listen_backlog, 16);
    }

    #[test]
    fn builder_overrides_apply() {
        let cfg = ServerConfig::builder("127.0.0.1", 8080)
            .server_name("example.com")
            .origin_policy("https://example.com")
            .max_message_size(1024)
            .listen_backlog(128)
            .debug(true)
            .build();
        assert_eq!(cfg.server_name.as_deref(), Some("example.com"));
        assert_eq!(cfg.origin_policy.as_deref(), Some("https://example.com"));
        assert_eq!(cfg.max_message_size, 1024);
        assert_eq!(cfg.listen_backlog, 128);
        assert!(cfg.debug);
    }
}
