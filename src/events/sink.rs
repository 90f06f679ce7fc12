//! Fan-out of SDK discovery reports.

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, trace};

use crate::connect::ConnectOrchestrator;
use crate::device::{DeviceCache, DiscoveredDevice, RawDevice};
use crate::events::gate::SubscriberGate;
use crate::sdk::SdkLogLevel;

/// A log line forwarded from the SDK.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase"))]
pub struct LogRecord {
    /// Log message.
    pub message: String,
    /// Severity.
    #[cfg_attr(feature = "serde", serde(rename = "logType"))]
    pub level: SdkLogLevel,
    /// Structured context attached by the SDK.
    pub context: BTreeMap<String, String>,
    /// When the bridge received the line.
    pub timestamp: DateTime<Utc>,
}

impl LogRecord {
    /// Create a record stamped with the current time.
    pub fn new(
        message: impl Into<String>,
        level: SdkLogLevel,
        context: BTreeMap<String, String>,
    ) -> Self {
        Self {
            message: message.into(),
            level,
            context,
            timestamp: Utc::now(),
        }
    }
}

/// Notifications delivered to host listeners.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(tag = "event", content = "payload"))]
pub enum BridgeEvent {
    /// A full discovery batch, as reported.
    DevicesFound(Vec<DiscoveredDevice>),
    /// The connected tower went away.
    DeviceDisconnected(DiscoveredDevice),
    /// SDK log output.
    Log(LogRecord),
}

/// Routes discovery reports to the cache, the connect watcher and listeners.
pub struct DiscoveryEventSink {
    /// Every reported tower lands here first.
    cache: Arc<DeviceCache>,
    /// Checked for a watched tower on each batch.
    orchestrator: ConnectOrchestrator,
    /// Decides which events reach the host.
    gate: Arc<SubscriberGate>,
    /// Host event channel.
    event_tx: broadcast::Sender<BridgeEvent>,
    /// Plain discovery batches also feed the long-lived cache.
    cache_broadcast_discovery: bool,
}

impl DiscoveryEventSink {
    /// Create a sink with its own event channel of `capacity`.
    pub fn new(
        cache: Arc<DeviceCache>,
        orchestrator: ConnectOrchestrator,
        gate: Arc<SubscriberGate>,
        capacity: usize,
        cache_broadcast_discovery: bool,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(capacity.max(1));
        Self {
            cache,
            orchestrator,
            gate,
            event_tx,
            cache_broadcast_discovery,
        }
    }

    /// Receive host events.
    pub fn subscribe(&self) -> broadcast::Receiver<BridgeEvent> {
        self.event_tx.subscribe()
    }

    /// Handle a discovery batch.
    ///
    /// Every device is upserted into the cache and the batch is checked
    /// against the connect watch before anything is broadcast, so a connect
    /// never waits on listeners. The full batch is broadcast only while at
    /// least one listener is attached.
    pub fn on_devices_reported(&self, devices: Vec<DiscoveredDevice>) {
        let remember =
            self.cache_broadcast_discovery || self.orchestrator.is_discovering_for_connect();

        trace!("Discovery batch of {} towers", devices.len());
        for device in &devices {
            self.cache.upsert(device.clone(), remember);
        }

        self.orchestrator.on_devices_reported(&devices);

        if self.gate.has_subscribers() {
            self.emit(BridgeEvent::DevicesFound(devices));
        }
    }

    /// Handle a batch straight from the SDK, dropping towers with bad ids.
    pub fn on_raw_devices_reported(&self, raw: Vec<RawDevice>) {
        let devices = raw
            .into_iter()
            .filter_map(|r| match DiscoveredDevice::try_from(r) {
                Ok(device) => Some(device),
                Err(e) => {
                    debug!("Skipping reported tower: {}", e);
                    None
                }
            })
            .collect();
        self.on_devices_reported(devices);
    }

    /// Forward a disconnect if the gate allows it.
    pub fn on_device_disconnected(&self, device: DiscoveredDevice) {
        debug!("Tower {} disconnected", device.id);
        if self.gate.should_emit() {
            self.emit(BridgeEvent::DeviceDisconnected(device));
        }
    }

    /// Forward an SDK log line if the gate allows it.
    pub fn on_log(&self, record: LogRecord) {
        if self.gate.should_emit() {
            self.emit(BridgeEvent::Log(record));
        }
    }

    fn emit(&self, event: BridgeEvent) {
        // No receivers is not an error: the host may not have subscribed yet.
        let _ = self.event_tx.send(event);
    }
}
