//! Relay configuration

use std::time::Duration;

/// Configuration for the upstream relay manager
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Number of chunks a subscriber may fall behind before it is dropped
    pub broadcast_capacity: usize,

    /// Upstream connection timeout (TCP connect + TLS)
    pub connect_timeout: Duration,

    /// Fail the session if the upstream sends nothing for this long
    pub read_timeout: Duration,

    /// User-Agent sent to upstream servers
    pub user_agent: String,

    /// Reject upstream responses whose content type is not audio
    pub require_audio_content_type: bool,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            broadcast_capacity: 256,
            connect_timeout: Duration::from_secs(10),
            read_timeout: Duration::from_secs(30),
            user_agent: concat!("radio-relay/", env!("CARGO_PKG_VERSION")).to_string(),
            require_audio_content_type: true,
        }
    }
}

impl RelayConfig {
    /// Set the per-subscriber broadcast capacity (at least 1)
    pub fn broadcast_capacity(mut self, capacity: usize) -> Self {
        self.broadcast_capacity = capacity.max(1);
        self
    }

    /// Set the connect timeout
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the read timeout
    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    /// Set the User-Agent header
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    /// Accept any content type from upstream
    pub fn allow_any_content_type(mut self) -> Self {
        self.require_audio_content_type = false;
        self
    }
}
