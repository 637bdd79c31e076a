//! Connection configuration.

use crate::channel::ChannelKind;
use crate::heartbeat::HeartbeatConfig;
use crate::reconcile::PendingPolicy;
use crate::reconnect::ReconnectConfig;
use crate::typing::DEFAULT_TYPING_WINDOW;
use std::time::Duration;

/// Default bound on the socket handshake plus server acknowledgement.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Tunables for one connection controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkConfig {
    /// Server host, with port if needed.
    pub host: String,
    /// Use `wss://` rather than `ws://`.
    pub use_tls: bool,
    pub chat_heartbeat: HeartbeatConfig,
    pub notifications_heartbeat: HeartbeatConfig,
    pub reconnect: ReconnectConfig,
    /// Silence after which a peer typing signal lapses.
    pub typing_window: Duration,
    pub pending_policy: PendingPolicy,
    /// Wait for `connection_established` before treating the channel as open.
    pub await_server_ack: bool,
    /// Outbound frames buffered per transport.
    pub outbound_queue: usize,
    /// Longest time a transport may stay `Connecting` before it is dropped
    /// and retried.
    pub connect_timeout: Duration,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            host: "localhost:8000".to_string(),
            use_tls: true,
            chat_heartbeat: HeartbeatConfig::chat(),
            notifications_heartbeat: HeartbeatConfig::notifications(),
            reconnect: ReconnectConfig::default(),
            typing_window: DEFAULT_TYPING_WINDOW,
            pending_policy: PendingPolicy::default(),
            await_server_ack: true,
            outbound_queue: 100,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }
}

impl LinkConfig {
    pub fn builder() -> LinkConfigBuilder {
        LinkConfigBuilder::default()
    }

    /// Heartbeat timing for a channel kind.
    pub fn heartbeat_for(&self, kind: ChannelKind) -> HeartbeatConfig {
        match kind {
            ChannelKind::Chat => self.chat_heartbeat,
            ChannelKind::Notifications => self.notifications_heartbeat,
        }
    }
}

/// Builder for [`LinkConfig`].
#[derive(Debug, Clone, Default)]
pub struct LinkConfigBuilder {
    config: LinkConfig,
}

impl LinkConfigBuilder {
    /// Set the server host (e.g. `api.example.com` or `localhost:8000`).
    pub fn host(mut self, host: &str) -> Self {
        self.config.host = host.to_string();
        self
    }

    /// Enable or disable TLS.
    pub fn use_tls(mut self, use_tls: bool) -> Self {
        self.config.use_tls = use_tls;
        self
    }

    pub fn chat_heartbeat(mut self, interval: Duration, timeout: Duration) -> Self {
        self.config.chat_heartbeat = HeartbeatConfig {
            probe_interval: interval,
            probe_timeout: timeout,
        };
        self
    }

    pub fn notifications_heartbeat(mut self, interval: Duration, timeout: Duration) -> Self {
        self.config.notifications_heartbeat = HeartbeatConfig {
            probe_interval: interval,
            probe_timeout: timeout,
        };
        self
    }

    pub fn reconnect(mut self, reconnect: ReconnectConfig) -> Self {
        self.config.reconnect = reconnect;
        self
    }

    pub fn typing_window(mut self, window: Duration) -> Self {
        self.config.typing_window = window;
        self
    }

    pub fn pending_policy(mut self, policy: PendingPolicy) -> Self {
        self.config.pending_policy = policy;
        self
    }

    pub fn await_server_ack(mut self, await_ack: bool) -> Self {
        self.config.await_server_ack = await_ack;
        self
    }

    pub fn outbound_queue(mut self, capacity: usize) -> Self {
        self.config.outbound_queue = capacity.max(1);
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    pub fn build(self) -> LinkConfig {
        self.config
    }
}
