//! Bridge configuration.

use std::time::Duration;

/// Default bound for connect-driven discovery.
pub const DEFAULT_DISCOVERY_TIMEOUT: Duration = Duration::from_secs(20);

/// Default session length for `request_session`.
pub const DEFAULT_SESSION_DURATION: Duration = Duration::from_secs(60 * 60);

/// Tunables for a [`LockerBridge`](crate::LockerBridge).
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct BridgeConfig {
    /// Discovery bound used when the caller does not pass one.
    pub default_discovery_timeout: Duration,
    /// Whether plain broadcast discovery also feeds the long-lived connect cache.
    pub cache_broadcast_discovery: bool,
    /// Stop the SDK scan when a connect-driven discovery that started it ends.
    /// A scan the host started with `start_discovery` is never stopped this way.
    pub stop_discovery_after_connect_scan: bool,
    /// Capacity of the host event channel.
    pub event_channel_capacity: usize,
    /// Session length used by `request_session`.
    pub session_duration: Duration,
    /// Whether sessions opened by `request_session` sync events.
    pub session_sync_enabled: bool,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            default_discovery_timeout: DEFAULT_DISCOVERY_TIMEOUT,
            cache_broadcast_discovery: true,
            stop_discovery_after_connect_scan: true,
            event_channel_capacity: 64,
            session_duration: DEFAULT_SESSION_DURATION,
            session_sync_enabled: true,
        }
    }
}

impl BridgeConfig {
    /// Set the default discovery bound.
    pub fn with_default_discovery_timeout(mut self, timeout: Duration) -> Self {
        self.default_discovery_timeout = timeout;
        self
    }

    /// Choose whether broadcast discovery feeds the connect cache.
    pub fn with_cache_broadcast_discovery(mut self, enabled: bool) -> Self {
        self.cache_broadcast_discovery = enabled;
        self
    }

    /// Choose whether the scan is stopped after a connect-driven discovery.
    pub fn with_stop_discovery_after_connect_scan(mut self, enabled: bool) -> Self {
        self.stop_discovery_after_connect_scan = enabled;
        self
    }

    /// Set the event channel capacity (minimum 1).
    pub fn with_event_channel_capacity(mut self, capacity: usize) -> Self {
        self.event_channel_capacity = capacity.max(1);
        self
    }

    /// Set the session defaults.
    pub fn with_session(mut self, duration: Duration, sync_enabled: bool) -> Self {
        self.session_duration = duration;
        self.session_sync_enabled = sync_enabled;
        self
    }
}
