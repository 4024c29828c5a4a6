//! Gateway configuration

use std::time::Duration;

/// Configuration for client sessions
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Outbound queue capacity per client (events and audio frames)
    pub outbound_capacity: usize,

    /// Interval between `recording_update` events
    pub update_interval: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            outbound_capacity: 512,
            update_interval: Duration::from_secs(1),
        }
    }
}

impl GatewayConfig {
    /// Set the outbound queue capacity
    pub fn outbound_capacity(mut self, capacity: usize) -> Self {
        self.outbound_capacity = capacity.max(1);
        self
    }

    /// Set the recording update interval
    pub fn update_interval(mut self, interval: Duration) -> Self {
        self.update_interval = interval.max(Duration::from_millis(10));
        self
    }
}
