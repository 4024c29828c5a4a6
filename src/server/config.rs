//! Server configuration

use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;

use crate::gateway::GatewayConfig;
use crate::recording::RecordingConfig;
use crate::relay::RelayConfig;

/// Server configuration options
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind_addr: SocketAddr,

    /// Upstream relay settings
    pub relay: RelayConfig,

    /// Recording settings
    pub recording: RecordingConfig,

    /// Per-client gateway settings
    pub gateway: GatewayConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from((Ipv4Addr::UNSPECIFIED, 5000)),
            relay: RelayConfig::default(),
            recording: RecordingConfig::default(),
            gateway: GatewayConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Create a new config with custom bind address
    pub fn with_addr(addr: SocketAddr) -> Self {
        Self {
            bind_addr: addr,
            ..Default::default()
        }
    }

    /// Set the bind address
    pub fn bind(mut self, addr: SocketAddr) -> Self {
        self.bind_addr = addr;
        self
    }

    /// Set the recordings directory
    pub fn recordings_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.recording = self.recording.recordings_dir(dir);
        self
    }

    /// Replace the relay settings
    pub fn relay(mut self, relay: RelayConfig) -> Self {
        self.relay = relay;
        self
    }

    /// Replace the recording settings
    pub fn recording(mut self, recording: RecordingConfig) -> Self {
        self.recording = recording;
        self
    }

    /// Replace the gateway settings
    pub fn gateway(mut self, gateway: GatewayConfig) -> Self {
        self.gateway = gateway;
        self
    }
}
