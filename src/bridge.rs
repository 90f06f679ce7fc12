//! Host-facing bridge.
//!
//! [`LockerBridge`] is what the host runtime talks to. It owns the device
//! cache, the subscriber gate, the connect orchestrator and the discovery
//! sink, and forwards locker commands to the SDK. The SDK integration pushes
//! discovery batches, disconnects and log lines back in through an
//! [`SdkEventReporter`].

use bytes::Bytes;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::BridgeConfig;
use crate::connect::{ConnectOrchestrator, ConnectPhase, ConnectResult};
use crate::device::{DeviceCache, DiscoveredDevice, RawDevice};
use crate::error::{Error, Result};
use crate::events::{BridgeEvent, DiscoveryEventSink, LogRecord, SubscriberGate};
use crate::sdk::{
    CommandResponse, LockerCommand, SdkLogLevel, SessionPermission, SyncPullResult, SyncStatus,
    TowerSdk,
};

/// Keeps an [`LockerBridge::on_event`] callback running.
///
/// Dropping the handle stops the callback and detaches its listener.
pub struct ListenerHandle {
    /// Registration order of this listener.
    id: u64,
    /// Task feeding events to the callback; taken on detach.
    task: Option<JoinHandle<()>>,
    /// Gate the listener was counted in.
    gate: Arc<SubscriberGate>,
}

impl ListenerHandle {
    /// Registration id of this listener.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Stop the callback and detach the listener now.
    pub fn detach(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            let remaining = self.gate.detach();
            debug!("Listener {} detached, {} remaining", self.id, remaining);
        }
    }
}

impl Drop for ListenerHandle {
    fn drop(&mut self) {
        self.release();
    }
}

/// Entry point for SDK callbacks. Cheap to clone and callable from any thread.
#[derive(Clone)]
pub struct SdkEventReporter {
    /// Where reported events are routed.
    sink: Arc<DiscoveryEventSink>,
}

impl SdkEventReporter {
    /// The SDK discovered a batch of towers.
    pub fn devices_discovered(&self, devices: Vec<RawDevice>) {
        self.sink.on_raw_devices_reported(devices);
    }

    /// Same as [`devices_discovered`](Self::devices_discovered) for already-validated records.
    pub fn discovered(&self, devices: Vec<DiscoveredDevice>) {
        self.sink.on_devices_reported(devices);
    }

    /// The connected tower disconnected.
    pub fn tower_disconnected(&self, device: Option<RawDevice>) {
        let Some(raw) = device else {
            return;
        };
        match DiscoveredDevice::try_from(raw) {
            Ok(device) => self.sink.on_device_disconnected(device),
            Err(e) => debug!("Ignoring disconnect for unidentified tower: {}", e),
        }
    }

    /// The SDK produced a log line.
    pub fn log(
        &self,
        message: impl Into<String>,
        level: SdkLogLevel,
        context: BTreeMap<String, String>,
    ) {
        self.sink.on_log(LogRecord::new(message, level, context));
    }
}

/// Host-facing interface over a [`TowerSdk`].
pub struct LockerBridge {
    /// SDK that owns the radio and the locker protocol.
    sdk: Arc<dyn TowerSdk>,
    /// Defaults for connect and session calls.
    config: BridgeConfig,
    /// Long-lived and per-session tower views.
    cache: Arc<DeviceCache>,
    /// Host listener count.
    gate: Arc<SubscriberGate>,
    /// Connect-by-id state machine.
    orchestrator: ConnectOrchestrator,
    /// Fans SDK reports out to the cache, orchestrator and listeners.
    sink: Arc<DiscoveryEventSink>,
    /// Runtime for listener tasks.
    runtime: Handle,
    /// Source of listener ids.
    listener_counter: AtomicU64,
}

impl LockerBridge {
    /// Create a bridge on the current Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoRuntime`] when called outside a runtime.
    pub fn new(sdk: Arc<dyn TowerSdk>, config: BridgeConfig) -> Result<Self> {
        let runtime = Handle::try_current().map_err(|_| Error::NoRuntime)?;
        Ok(Self::with_runtime(sdk, config, runtime))
    }

    /// Create a bridge that spawns its timers and SDK calls on `runtime`.
    pub fn with_runtime(sdk: Arc<dyn TowerSdk>, config: BridgeConfig, runtime: Handle) -> Self {
        let cache = Arc::new(DeviceCache::new());
        let gate = Arc::new(SubscriberGate::new());
        let orchestrator = ConnectOrchestrator::new(
            sdk.clone(),
            cache.clone(),
            runtime.clone(),
            config.stop_discovery_after_connect_scan,
        );
        let sink = Arc::new(DiscoveryEventSink::new(
            cache.clone(),
            orchestrator.clone(),
            gate.clone(),
            config.event_channel_capacity,
            config.cache_broadcast_discovery,
        ));

        Self {
            sdk,
            config,
            cache,
            gate,
            orchestrator,
            sink,
            runtime,
            listener_counter: AtomicU64::new(0),
        }
    }

    /// Handle for the SDK integration to report events through.
    pub fn reporter(&self) -> SdkEventReporter {
        SdkEventReporter {
            sink: self.sink.clone(),
        }
    }

    /// Active configuration.
    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    // ------------------------------------------------------------------
    // Discovery and connect
    // ------------------------------------------------------------------

    /// Start a plain discovery session.
    ///
    /// Resets the list of towers visible in this session; the connect cache
    /// is kept.
    ///
    /// # Errors
    ///
    /// [`Error::AlreadyInProgress`] while a connect-driven discovery owns the
    /// scan, or the SDK's error.
    pub async fn start_discovery(&self) -> Result<()> {
        if let Err(e) = self.orchestrator.begin_plain_discovery() {
            debug!("Ignoring discovery request while discovering to connect");
            return Err(e);
        }

        info!("Starting tower discovery");
        self.cache.begin_session();
        if let Err(e) = self.sdk.start_discovery().await {
            self.orchestrator.reset_plain_discovery();
            return Err(e.into());
        }
        Ok(())
    }

    /// Stop discovery, unless a connect-driven discovery owns it.
    pub async fn stop_discovery(&self) -> Result<()> {
        self.orchestrator.end_plain_discovery()?;
        info!("Stopping tower discovery");
        self.sdk.stop_discovery().await?;
        Ok(())
    }

    /// Connect to a tower by hex id. See [`ConnectOrchestrator::connect_by_id`].
    pub async fn connect_by_id(
        &self,
        id: &str,
        timeout: Duration,
        want_full_info: bool,
    ) -> Result<ConnectResult> {
        self.orchestrator
            .connect_by_id(id, timeout, want_full_info)
            .await
    }

    /// Connect using the configured default timeout; resolves with the tower name.
    pub async fn connect_to_tower_with_identifier(&self, id: &str) -> Result<String> {
        let result = self
            .connect_by_id(id, self.config.default_discovery_timeout, false)
            .await?;
        Ok(result.name().to_string())
    }

    /// Connect with an explicit discovery bound; resolves with the full tower record.
    pub async fn connect_to_tower(&self, id: &str, timeout: Duration) -> Result<ConnectResult> {
        self.connect_by_id(id, timeout, true).await
    }

    /// Cancel the outstanding connect request, if any.
    pub fn cancel_connect(&self) -> bool {
        self.orchestrator.cancel()
    }

    /// Phase of the connect state machine.
    pub fn connect_phase(&self) -> ConnectPhase {
        self.orchestrator.phase()
    }

    /// Towers seen in the current discovery session.
    pub fn found_devices(&self) -> Vec<DiscoveredDevice> {
        self.cache.session_devices()
    }

    /// Towers in the long-lived connect cache.
    pub fn cached_devices(&self) -> Vec<DiscoveredDevice> {
        self.cache.known_devices()
    }

    /// Forget every cached tower.
    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    // ------------------------------------------------------------------
    // Listeners
    // ------------------------------------------------------------------

    /// Register one host listener.
    pub fn attach(&self) -> usize {
        self.gate.attach()
    }

    /// Unregister one host listener.
    pub fn detach(&self) -> usize {
        self.gate.detach()
    }

    /// Unregister `count` host listeners.
    pub fn remove_listeners(&self, count: usize) -> usize {
        self.gate.remove(count)
    }

    /// Number of attached listeners.
    pub fn listener_count(&self) -> usize {
        self.gate.count()
    }

    /// Receive host events. Does not attach a listener by itself.
    pub fn subscribe(&self) -> broadcast::Receiver<BridgeEvent> {
        self.sink.subscribe()
    }

    /// Attach a listener and run `callback` for every host event until the
    /// returned handle is dropped.
    pub fn on_event<F>(&self, callback: F) -> ListenerHandle
    where
        F: Fn(BridgeEvent) + Send + Sync + 'static,
    {
        let id = self.listener_counter.fetch_add(1, Ordering::SeqCst);
        let mut rx = self.sink.subscribe();
        self.gate.attach();

        let task = self.runtime.spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => callback(event),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("Event callback lagged, skipped {} events", skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        ListenerHandle {
            id,
            task: Some(task),
            gate: self.gate.clone(),
        }
    }

    // ------------------------------------------------------------------
    // Locker commands
    // ------------------------------------------------------------------

    /// Whether the SDK is syncing events.
    pub fn is_syncing(&self) -> bool {
        self.sdk.is_syncing()
    }

    /// Send any command to the connected tower.
    pub async fn send_command(&self, command: LockerCommand) -> Result<CommandResponse> {
        let name = command.name();
        debug!("Sending {} command", name);
        self.sdk.send(command).await.map_err(|e| {
            warn!("{} command failed: {}", name, e);
            Error::from(e)
        })
    }

    /// Open a session with the configured duration and sync setting.
    pub async fn request_session(&self, permission: SessionPermission) -> Result<()> {
        self.request_session_advanced(
            self.config.session_sync_enabled,
            self.config.session_duration,
            permission,
        )
        .await
    }

    /// Open a session with explicit settings.
    pub async fn request_session_advanced(
        &self,
        sync_enabled: bool,
        duration: Duration,
        permission: SessionPermission,
    ) -> Result<()> {
        let response = self
            .send_command(LockerCommand::RequestSession {
                duration,
                sync_enabled,
                permission,
            })
            .await?;
        match response {
            CommandResponse::Done(true) => Ok(()),
            CommandResponse::Done(false) => Err(Error::UnderlyingSdk {
                code: 0,
                message: "Unknown error".to_string(),
                domain: "sdk".to_string(),
            }),
            other => Err(unexpected("request_session", &other)),
        }
    }

    /// End the current session.
    pub async fn terminate_session(
        &self,
        error_code: i32,
        error_message: Option<String>,
    ) -> Result<bool> {
        let response = self
            .send_command(LockerCommand::TerminateSession {
                error_code,
                error_message,
            })
            .await?;
        expect_done("terminate_session", response)
    }

    /// Sync tower events with the backend.
    pub async fn sync_connected_tower(&self) -> Result<bool> {
        let response = self.send_command(LockerCommand::Sync).await?;
        expect_done("sync", response)
    }

    /// Sync counters, or `None` if the tower could not report them.
    pub async fn request_sync_status(&self) -> Option<SyncStatus> {
        match self.send_command(LockerCommand::RequestSyncStatus).await {
            Ok(CommandResponse::SyncStatus(status)) => Some(status),
            Ok(other) => {
                warn!("{}", unexpected("request_sync_status", &other));
                None
            }
            Err(_) => None,
        }
    }

    /// Pull events from `sync_event_start`, or `None` on failure.
    pub async fn sync_pull(&self, sync_event_start: u32) -> Option<SyncPullResult> {
        match self
            .send_command(LockerCommand::SyncPull { sync_event_start })
            .await
        {
            Ok(CommandResponse::SyncPull(result)) => Some(result),
            Ok(other) => {
                warn!("{}", unexpected("sync_pull", &other));
                None
            }
            Err(_) => None,
        }
    }

    /// Push a signed payload to the tower.
    pub async fn sync_push(&self, payload: Bytes, payload_auth: Bytes) -> Result<bool> {
        let response = self
            .send_command(LockerCommand::SyncPush {
                payload,
                payload_auth,
            })
            .await?;
        expect_done("sync_push", response)
    }

    /// Record a client event on the tower.
    pub async fn add_client_event(&self, client_info: Bytes) -> Result<bool> {
        let response = self
            .send_command(LockerCommand::AddClientEvent { client_info })
            .await?;
        expect_done("add_client_event", response)
    }

    /// Available lockers by type.
    pub async fn find_available_lockers(&self) -> Result<BTreeMap<u32, u32>> {
        let response = self.send_command(LockerCommand::FindAvailableLockers).await?;
        expect_availability("find_available_lockers", response)
    }

    /// Lockers matching `match_token`, by type.
    pub async fn find_lockers_with_token(
        &self,
        match_token: Bytes,
        match_available: bool,
    ) -> Result<BTreeMap<u32, u32>> {
        let response = self
            .send_command(LockerCommand::FindLockersWithToken {
                match_token,
                match_available,
            })
            .await?;
        expect_availability("find_lockers_with_token", response)
    }

    /// Open a locker with a signed token; resolves with its id.
    pub async fn open_locker_with_token(
        &self,
        payload: Bytes,
        payload_auth: Bytes,
    ) -> Result<u32> {
        let response = self
            .send_command(LockerCommand::OpenLockerWithToken {
                payload,
                payload_auth,
            })
            .await?;
        expect_locker_id("open_locker_with_token", response)
    }

    /// Open any available locker matching the criteria; resolves with its id.
    pub async fn open_available_locker(
        &self,
        locker_token: Bytes,
        locker_available: bool,
        client_info: Bytes,
        match_locker_type: u32,
        match_available: bool,
        match_token: Option<Bytes>,
    ) -> Result<u32> {
        let response = self
            .send_command(LockerCommand::OpenAvailableLocker {
                match_locker_type,
                match_available,
                match_token,
                locker_token,
                locker_available,
                client_info,
            })
            .await?;
        expect_locker_id("open_available_locker", response)
    }

    /// Reopen the last opened locker; resolves with its id.
    pub async fn reopen_locker(&self) -> Result<u32> {
        let response = self.send_command(LockerCommand::ReopenLocker).await?;
        expect_locker_id("reopen_locker", response)
    }

    /// Whether the last locker door is open. Failures read as closed.
    pub async fn check_locker_door(&self) -> bool {
        match self.send_command(LockerCommand::CheckLockerDoor).await {
            Ok(CommandResponse::DoorOpened(open)) => open,
            Ok(other) => {
                warn!("{}", unexpected("check_locker_door", &other));
                false
            }
            Err(_) => false,
        }
    }

    /// Undo the last locker state change.
    pub async fn revert_locker_state(&self, client_info: Bytes) -> Result<bool> {
        let response = self
            .send_command(LockerCommand::RevertLockerState { client_info })
            .await?;
        expect_done("revert_locker_state", response)
    }

    /// Set the keypad code of the last opened locker.
    pub async fn set_keypad_code(
        &self,
        code: impl Into<String>,
        persists: bool,
        next_token: Bytes,
        next_available: bool,
    ) -> Result<bool> {
        let response = self
            .send_command(LockerCommand::SetKeypadCode {
                code: code.into(),
                persists,
                next_token,
                next_available,
            })
            .await?;
        expect_done("set_keypad_code", response)
    }

    /// Pulse the locker latch `count` times.
    pub async fn tap_locker(&self, interval_ms: u32, count: u32) -> Result<bool> {
        let response = self
            .send_command(LockerCommand::TapLocker { interval_ms, count })
            .await?;
        expect_done("tap_locker", response)
    }

    /// Cancel any pending connect and stop discovery.
    pub async fn shutdown(&self) -> Result<()> {
        info!("Shutting down locker bridge");
        self.orchestrator.cancel();
        self.orchestrator.reset_plain_discovery();
        if let Err(e) = self.sdk.stop_discovery().await {
            warn!("Error stopping discovery during shutdown: {}", e);
        }
        Ok(())
    }
}

fn unexpected(command: &str, response: &CommandResponse) -> Error {
    Error::Internal(format!("unexpected response to {}: {:?}", command, response))
}

fn expect_done(command: &str, response: CommandResponse) -> Result<bool> {
    match response {
        CommandResponse::Done(ok) => Ok(ok),
        other => Err(unexpected(command, &other)),
    }
}

fn expect_availability(command: &str, response: CommandResponse) -> Result<BTreeMap<u32, u32>> {
    match response {
        CommandResponse::Availability(map) => Ok(map),
        other => Err(unexpected(command, &other)),
    }
}

fn expect_locker_id(command: &str, response: CommandResponse) -> Result<u32> {
    match response {
        CommandResponse::LockerId(id) => Ok(id),
        other => Err(unexpected(command, &other)),
    }
}
