//! Runtime configuration for a single redundancy node.
//!
//! Builder style grounded on `roj-adapter-ocpp`'s `AdapterConfig`: a
//! `Default` impl with sane standalone-node values, plus `with_*` methods
//! for what `main.rs`'s CLI actually needs to override.

use std::time::Duration;

/// Complete node configuration.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Human-readable signal/tracker name, used for mDNS announcement.
    pub signal_name: String,

    pub heartbeat: HeartbeatConfig,
    pub transport: TransportConfig,
    pub coordinator: CoordinatorConfig,
}

/// Heartbeat Subsystem timing.
#[derive(Debug, Clone)]
pub struct HeartbeatConfig {
    /// Publish period on `tracker/heartbeat`.
    pub period: Duration,
    /// Threshold for the transport's missed-deadline notification: a peer
    /// not heard from in this long is logged as missing, independently of
    /// the coordinator's own 1s-window liveness scan.
    pub missed_after: Duration,
}

/// Transport-layer settings.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub port: u16,
    pub use_mdns: bool,
}

/// Coordinator State Machine timing.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Tick period driving state transitions.
    pub tick_period: Duration,
    /// Initialize-state ceiling before moving to Prevote with however many
    /// peers have been observed so far.
    pub initialize_window: Duration,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            signal_name: "redundancy-node".to_string(),
            heartbeat: HeartbeatConfig::default(),
            transport: TransportConfig::default(),
            coordinator: CoordinatorConfig::default(),
        }
    }
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        let period = Duration::from_millis(250);
        Self {
            period,
            missed_after: period * 2,
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            port: crate::transport::DEFAULT_PORT,
            use_mdns: true,
        }
    }
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            tick_period: crate::coordinator::DEFAULT_TICK_PERIOD,
            initialize_window: Duration::from_secs(10),
        }
    }
}

impl NodeConfig {
    pub fn with_signal_name(mut self, name: impl Into<String>) -> Self {
        self.signal_name = name.into();
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.transport.port = port;
        self
    }

    pub fn without_mdns(mut self) -> Self {
        self.transport.use_mdns = false;
        self
    }

    pub fn with_heartbeat_period(mut self, period: Duration) -> Self {
        self.heartbeat.period = period;
        self.heartbeat.missed_after = period * 2;
        self
    }

    pub fn with_heartbeat_missed_after(mut self, missed_after: Duration) -> Self {
        self.heartbeat.missed_after = missed_after;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_overrides_only_requested_fields() {
        let config = NodeConfig::default()
            .with_signal_name("tracker-alpha")
            .with_port(9991)
            .without_mdns();

        assert_eq!(config.signal_name, "tracker-alpha");
        assert_eq!(config.transport.port, 9991);
        assert!(!config.transport.use_mdns);
        assert_eq!(config.heartbeat.period, Duration::from_millis(250));
        assert_eq!(config.heartbeat.missed_after, Duration::from_millis(500));
    }

    #[test]
    fn heartbeat_period_override_rescales_missed_after() {
        let config = NodeConfig::default().with_heartbeat_period(Duration::from_millis(100));
        assert_eq!(config.heartbeat.missed_after, Duration::from_millis(200));
    }
}
