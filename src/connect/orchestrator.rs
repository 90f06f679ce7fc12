//! Connect-by-id orchestration.
//!
//! Turns "some future discovery batch will contain this tower" into one
//! bounded-time connect outcome. A request moves through
//! `Idle -> DiscoveringForConnect -> Connecting` (the discovery phase is
//! skipped on a cache hit) and returns to `Idle` once its slot is settled.
//! The discovery match, the connect callback and the timer may all fire on
//! different threads; whichever settles the [`PendingRequestSlot`] first wins.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tracing::{debug, info, warn};

use crate::connect::slot::PendingRequestSlot;
use crate::connect::timer::TimeoutHandle;
use crate::device::{DeviceCache, DeviceId, DiscoveredDevice};
use crate::error::{Error, Result};
use crate::sdk::TowerSdk;

/// Successful connect payload.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(untagged))]
pub enum ConnectResult {
    /// Name reported by the SDK on connect.
    Name(String),
    /// Full record of the tower that was connected.
    Device(DiscoveredDevice),
}

impl ConnectResult {
    /// Tower name carried by either form.
    pub fn name(&self) -> &str {
        match self {
            Self::Name(name) => name,
            Self::Device(device) => &device.display_name,
        }
    }
}

/// Final outcome of a connect request.
pub type ConnectOutcome = Result<ConnectResult>;

/// Observable phase of the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConnectPhase {
    /// No request outstanding.
    #[default]
    Idle,
    /// Scanning for the requested tower.
    DiscoveringForConnect,
    /// Connect issued, waiting for the SDK.
    Connecting,
}

impl std::fmt::Display for ConnectPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "Idle"),
            Self::DiscoveringForConnect => write!(f, "DiscoveringForConnect"),
            Self::Connecting => write!(f, "Connecting"),
        }
    }
}

/// The one outstanding request.
struct PendingRequest {
    /// Tells this request apart from stale timers and connect callbacks.
    request_id: u64,
    /// Settled exactly once with the request's outcome.
    slot: Arc<PendingRequestSlot<ConnectOutcome>>,
    /// Tower being connected to.
    target: DeviceId,
    /// Resolve with the full record instead of the name.
    want_full_info: bool,
    /// Discovery bound; only set while discovering.
    timer: Option<TimeoutHandle>,
    /// No host session was scanning when the request started, so the scan
    /// is stopped again when the request leaves discovery.
    owns_scan: bool,
}

impl PendingRequest {
    fn cancel_timer(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.cancel();
        }
    }
}

#[derive(Default)]
enum ConnectState {
    #[default]
    Idle,
    DiscoveringForConnect(PendingRequest),
    Connecting(PendingRequest),
}

impl ConnectState {
    fn phase(&self) -> ConnectPhase {
        match self {
            Self::Idle => ConnectPhase::Idle,
            Self::DiscoveringForConnect(_) => ConnectPhase::DiscoveringForConnect,
            Self::Connecting(_) => ConnectPhase::Connecting,
        }
    }

    fn request_id(&self) -> Option<u64> {
        match self {
            Self::Idle => None,
            Self::DiscoveringForConnect(req) | Self::Connecting(req) => Some(req.request_id),
        }
    }
}

/// Everything behind the orchestrator lock.
#[derive(Default)]
struct SharedState {
    /// Connect request state machine.
    request: ConnectState,
    /// A host-started discovery session is running.
    plain_discovery: bool,
}

/// Coordinates connect-by-id requests against the SDK and the device cache.
///
/// Cheap to clone; clones share state.
#[derive(Clone)]
pub struct ConnectOrchestrator {
    /// SDK used for discovery and connect calls.
    sdk: Arc<dyn TowerSdk>,
    /// Consulted for the connect short-circuit.
    cache: Arc<DeviceCache>,
    /// Request state and the host discovery marker.
    state: Arc<Mutex<SharedState>>,
    /// Source of request ids.
    next_request_id: Arc<AtomicU64>,
    /// Runtime for timers and SDK calls.
    runtime: Handle,
    /// Stop a scan the orchestrator started once its request leaves discovery.
    stop_discovery_after_scan: bool,
}

impl ConnectOrchestrator {
    /// Create an orchestrator that spawns its timers and SDK calls on `runtime`.
    pub fn new(
        sdk: Arc<dyn TowerSdk>,
        cache: Arc<DeviceCache>,
        runtime: Handle,
        stop_discovery_after_scan: bool,
    ) -> Self {
        Self {
            sdk,
            cache,
            state: Arc::new(Mutex::new(SharedState::default())),
            next_request_id: Arc::new(AtomicU64::new(1)),
            runtime,
            stop_discovery_after_scan,
        }
    }

    /// Current phase.
    pub fn phase(&self) -> ConnectPhase {
        self.state.lock().request.phase()
    }

    /// Whether a connect-driven discovery currently owns the scan.
    pub fn is_discovering_for_connect(&self) -> bool {
        matches!(
            self.state.lock().request,
            ConnectState::DiscoveringForConnect(_)
        )
    }

    /// Tower id the discovery sink should watch for, if any.
    pub fn watched_id(&self) -> Option<DeviceId> {
        match &self.state.lock().request {
            ConnectState::DiscoveringForConnect(req) => Some(req.target),
            _ => None,
        }
    }

    /// Record that the host started a discovery session.
    ///
    /// A connect issued while the session runs leaves the scan alone when it
    /// finishes.
    ///
    /// # Errors
    ///
    /// [`Error::AlreadyInProgress`] while a connect-driven discovery owns the scan.
    pub fn begin_plain_discovery(&self) -> Result<()> {
        let mut state = self.state.lock();
        if matches!(state.request, ConnectState::DiscoveringForConnect(_)) {
            return Err(Error::AlreadyInProgress);
        }
        state.plain_discovery = true;
        Ok(())
    }

    /// Record that the host stopped its discovery session.
    ///
    /// # Errors
    ///
    /// [`Error::AlreadyInProgress`] while a connect-driven discovery owns the scan.
    pub fn end_plain_discovery(&self) -> Result<()> {
        let mut state = self.state.lock();
        if matches!(state.request, ConnectState::DiscoveringForConnect(_)) {
            return Err(Error::AlreadyInProgress);
        }
        state.plain_discovery = false;
        Ok(())
    }

    /// Whether a host-started discovery session is running.
    pub fn is_plain_discovery_active(&self) -> bool {
        self.state.lock().plain_discovery
    }

    /// Forget the host session without checking for a connect scan.
    pub(crate) fn reset_plain_discovery(&self) {
        self.state.lock().plain_discovery = false;
    }

    /// Connect to the tower with hex id `id`.
    ///
    /// A cached tower is connected directly. Otherwise discovery is started
    /// and the first batch containing the tower triggers the connect; if none
    /// arrives within `timeout` the request fails with
    /// [`Error::DiscoveryTimeout`]. With `want_full_info` the success payload
    /// is the full tower record instead of its name.
    ///
    /// Dropping the returned future cancels the request.
    ///
    /// # Errors
    ///
    /// - [`Error::AlreadyInProgress`] if another request is outstanding; that
    ///   request is not affected.
    /// - [`Error::InvalidIdentifier`] for a malformed id, before any SDK call.
    /// - [`Error::DiscoveryTimeout`], [`Error::ConnectFailed`],
    ///   [`Error::UnderlyingSdk`] or [`Error::Cancelled`] from the
    ///   asynchronous phase.
    pub async fn connect_by_id(
        &self,
        id: &str,
        timeout: Duration,
        want_full_info: bool,
    ) -> Result<ConnectResult> {
        let (settlement, request_id, needs_discovery) = {
            let mut state = self.state.lock();

            if !matches!(state.request, ConnectState::Idle) {
                warn!("Rejecting connect to {}: a request is already in progress", id);
                return Err(Error::AlreadyInProgress);
            }

            let target = DeviceId::parse_hex(id)?;
            let request_id = self.next_request_id.fetch_add(1, Ordering::SeqCst);
            let (slot, settlement) = PendingRequestSlot::new();

            let mut request = PendingRequest {
                request_id,
                slot: slot.clone(),
                target,
                want_full_info,
                timer: None,
                owns_scan: !state.plain_discovery,
            };

            match self.cache.get(&target) {
                Some(device) => {
                    info!("Tower {} is cached, connecting directly", target);
                    state.request = ConnectState::Connecting(request);
                    self.spawn_connect(request_id, slot, device, want_full_info);
                    (settlement, request_id, false)
                }
                None => {
                    info!(
                        "Tower {} not cached, discovering for up to {:?}",
                        target, timeout
                    );
                    let this = self.clone();
                    request.timer = Some(TimeoutHandle::schedule(
                        &self.runtime,
                        timeout,
                        move || this.on_timeout(request_id),
                    ));
                    state.request = ConnectState::DiscoveringForConnect(request);
                    (settlement, request_id, true)
                }
            }
        };

        let mut guard = CancelOnDrop {
            orchestrator: self,
            request_id,
            armed: true,
        };

        if needs_discovery {
            if let Err(e) = self.sdk.start_discovery().await {
                warn!("Failed to start discovery for connect: {}", e);
                if !self.abandon(request_id, Err(e.into()), false) {
                    debug!("Request {} already left discovery, keeping it", request_id);
                }
            }
        }

        let outcome = settlement.await;
        guard.armed = false;

        outcome.unwrap_or_else(|| Err(Error::Internal("connect request was dropped".to_string())))
    }

    /// Check a discovery batch for the watched tower.
    ///
    /// On a match the timer is cancelled, watching stops and the connect is
    /// issued for the matching record. Returns whether a match was taken.
    pub fn on_devices_reported(&self, devices: &[DiscoveredDevice]) -> bool {
        let (device, request_id, slot, want_full_info, owns_scan) = {
            let mut state = self.state.lock();
            let matched = match &mut state.request {
                ConnectState::DiscoveringForConnect(req) => {
                    let Some(device) = devices.iter().find(|d| d.id == req.target).cloned() else {
                        return false;
                    };
                    req.cancel_timer();
                    (
                        device,
                        req.request_id,
                        req.slot.clone(),
                        req.want_full_info,
                        req.owns_scan,
                    )
                }
                _ => return false,
            };
            if let ConnectState::DiscoveringForConnect(req) = std::mem::take(&mut state.request) {
                state.request = ConnectState::Connecting(req);
            }
            matched
        };

        info!(
            "Found tower {} ({}) while discovering, connecting",
            device.id, device.display_name
        );

        if owns_scan {
            self.spawn_stop_discovery();
        }
        self.spawn_connect(request_id, slot, device, want_full_info);
        true
    }

    /// Settle the outstanding request as cancelled.
    ///
    /// Returns `false` if nothing was outstanding.
    pub fn cancel(&self) -> bool {
        let Some(request_id) = self.state.lock().request.request_id() else {
            return false;
        };
        self.abandon(request_id, Err(Error::Cancelled), true)
    }

    fn on_timeout(&self, request_id: u64) {
        let request = {
            let mut state = self.state.lock();
            match std::mem::take(&mut state.request) {
                ConnectState::DiscoveringForConnect(req) if req.request_id == request_id => req,
                other => {
                    state.request = other;
                    debug!("Ignoring stale discovery timer for request {}", request_id);
                    return;
                }
            }
        };

        if let Some(timer) = request.timer {
            timer.disarm();
        }

        info!("Discovery for tower {} timed out", request.target);
        if !request.slot.try_settle(Err(Error::DiscoveryTimeout)) {
            debug!("Timeout lost the race for request {}", request_id);
        }
        if request.owns_scan {
            self.spawn_stop_discovery();
        }
    }

    /// Drop request `request_id` from the state machine and settle it with
    /// `outcome`. A request that already reached `Connecting` is only taken
    /// with `include_connecting`. Returns whether the request was taken.
    fn abandon(&self, request_id: u64, outcome: ConnectOutcome, include_connecting: bool) -> bool {
        let (mut request, was_discovering) = {
            let mut state = self.state.lock();
            if state.request.request_id() != Some(request_id) {
                return false;
            }
            match std::mem::take(&mut state.request) {
                ConnectState::DiscoveringForConnect(req) => (req, true),
                ConnectState::Connecting(req) if include_connecting => (req, false),
                other => {
                    state.request = other;
                    return false;
                }
            }
        };

        request.cancel_timer();
        if let Err(e) = &outcome {
            debug!("Abandoning connect to {}: {}", request.target, e);
        }
        request.slot.try_settle(outcome);

        if was_discovering && request.owns_scan {
            self.spawn_stop_discovery();
        }
        true
    }

    fn finish(
        &self,
        request_id: u64,
        slot: &PendingRequestSlot<ConnectOutcome>,
        outcome: ConnectOutcome,
    ) {
        {
            let mut state = self.state.lock();
            if matches!(&state.request, ConnectState::Connecting(req) if req.request_id == request_id)
            {
                state.request = ConnectState::Idle;
            }
        }

        if !slot.try_settle(outcome) {
            debug!("Dropping late connect result for request {}", request_id);
        }
    }

    fn spawn_connect(
        &self,
        request_id: u64,
        slot: Arc<PendingRequestSlot<ConnectOutcome>>,
        device: DiscoveredDevice,
        want_full_info: bool,
    ) {
        let this = self.clone();
        self.runtime.spawn(async move {
            debug!("Connecting to tower {}", device.id);
            let outcome = match this.sdk.connect(device.clone()).await {
                Ok(name) => {
                    info!("Connected to tower {} ({})", device.id, name);
                    Ok(if want_full_info {
                        ConnectResult::Device(device)
                    } else {
                        ConnectResult::Name(name)
                    })
                }
                Err(e) => {
                    warn!("Connect to tower {} failed: {}", device.id, e);
                    Err(Error::connect_failed(e))
                }
            };
            this.finish(request_id, &slot, outcome);
        });
    }

    fn spawn_stop_discovery(&self) {
        if !self.stop_discovery_after_scan {
            return;
        }
        let sdk = self.sdk.clone();
        self.runtime.spawn(async move {
            if let Err(e) = sdk.stop_discovery().await {
                warn!("Failed to stop discovery: {}", e);
            }
        });
    }
}

/// Cancels the tracked request if the caller stops waiting for it.
struct CancelOnDrop<'a> {
    /// Orchestrator holding the request.
    orchestrator: &'a ConnectOrchestrator,
    /// Request to cancel.
    request_id: u64,
    /// Cleared once the caller has its outcome.
    armed: bool,
}

impl Drop for CancelOnDrop<'_> {
    fn drop(&mut self) {
        if self.armed {
            debug!("Connect request {} dropped by caller", self.request_id);
            self.orchestrator
                .abandon(self.request_id, Err(Error::Cancelled), true);
        }
    }
}
