//! End-to-end connect flows through the host facade with a scripted SDK.

use async_trait::async_trait;
use locker_bridge::{
    BridgeConfig, BridgeEvent, CommandResponse, ConnectPhase, ConnectResult, DiscoveredDevice,
    Error, LockerBridge, LockerCommand, RawDevice, SdkError, SdkLogLevel, SdkResult, TowerSdk,
};
use pretty_assertions::assert_eq;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast::error::TryRecvError;
use tokio::time::Instant;

#[derive(Default)]
struct ScriptedSdk {
    starts: AtomicUsize,
    stops: AtomicUsize,
    connects: AtomicUsize,
    connect_delay: Duration,
    connect_error: Option<SdkError>,
    connected: Mutex<Vec<DiscoveredDevice>>,
}

impl ScriptedSdk {
    fn with_connect_delay(delay: Duration) -> Self {
        Self {
            connect_delay: delay,
            ..Default::default()
        }
    }

    fn failing(error: SdkError) -> Self {
        Self {
            connect_error: Some(error),
            ..Default::default()
        }
    }
}

#[async_trait]
impl TowerSdk for ScriptedSdk {
    async fn start_discovery(&self) -> SdkResult<()> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn stop_discovery(&self) -> SdkResult<()> {
        self.stops.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn connect(&self, device: DiscoveredDevice) -> SdkResult<String> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        if !self.connect_delay.is_zero() {
            tokio::time::sleep(self.connect_delay).await;
        }
        if let Some(err) = &self.connect_error {
            return Err(err.clone());
        }
        let name = device.display_name.clone();
        self.connected.lock().unwrap().push(device);
        Ok(name)
    }

    async fn send(&self, command: LockerCommand) -> SdkResult<CommandResponse> {
        match command {
            LockerCommand::ReopenLocker => Ok(CommandResponse::LockerId(12)),
            _ => Ok(CommandResponse::Done(true)),
        }
    }

    fn is_syncing(&self) -> bool {
        false
    }
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn raw(last: u8, name: &str) -> RawDevice {
    RawDevice {
        id: Some(vec![0x70, 0x77, 0x65, 0x72, 0, 0, 0, last]),
        name: name.to_string(),
        firmware_version: "4.2.1".to_string(),
        rssi: -40 - last as i32,
    }
}

fn hex_id(last: u8) -> String {
    format!("7077657200000{:03x}", last)
}

async fn wait_for_phase(bridge: &LockerBridge, phase: ConnectPhase) {
    while bridge.connect_phase() != phase {
        tokio::task::yield_now().await;
    }
}

fn setup(sdk: ScriptedSdk) -> (Arc<ScriptedSdk>, Arc<LockerBridge>) {
    init_tracing();
    let sdk = Arc::new(sdk);
    let bridge = LockerBridge::new(sdk.clone(), BridgeConfig::default()).unwrap();
    (sdk, Arc::new(bridge))
}

#[tokio::test]
async fn cached_tower_connects_without_discovery() {
    let (sdk, bridge) = setup(ScriptedSdk::default());
    bridge.reporter().devices_discovered(vec![raw(1, "Lobby")]);

    let result = bridge
        .connect_by_id(&hex_id(1), Duration::from_secs(5), false)
        .await
        .unwrap();

    assert_eq!(result, ConnectResult::Name("Lobby".to_string()));
    assert_eq!(sdk.starts.load(Ordering::SeqCst), 0);
    assert_eq!(sdk.connects.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn unknown_tower_times_out_after_bound() {
    let (sdk, bridge) = setup(ScriptedSdk::default());

    let started = Instant::now();
    let err = bridge
        .connect_by_id(&hex_id(9), Duration::from_secs(1), false)
        .await
        .unwrap_err();
    let elapsed = started.elapsed();

    assert_eq!(err, Error::DiscoveryTimeout);
    assert!(elapsed >= Duration::from_secs(1));
    assert!(elapsed < Duration::from_millis(1100));
    assert_eq!(sdk.starts.load(Ordering::SeqCst), 1);
    assert_eq!(sdk.connects.load(Ordering::SeqCst), 0);
    assert_eq!(err.to_payload().code, 2);
}

#[tokio::test]
async fn match_in_middle_of_batch_connects_and_caches_all() {
    let (sdk, bridge) = setup(ScriptedSdk::default());

    let task = {
        let bridge = bridge.clone();
        tokio::spawn(async move {
            bridge
                .connect_to_tower(&hex_id(3), Duration::from_secs(30))
                .await
        })
    };
    wait_for_phase(&bridge, ConnectPhase::DiscoveringForConnect).await;

    let batch: Vec<_> = (1..=5).map(|i| raw(i, &format!("Tower {}", i))).collect();
    bridge.reporter().devices_discovered(batch);

    match task.await.unwrap().unwrap() {
        ConnectResult::Device(device) => {
            assert_eq!(device.display_name, "Tower 3");
            assert_eq!(device.id.to_string(), hex_id(3));
        }
        other => panic!("expected full record, got {:?}", other),
    }
    assert_eq!(bridge.cached_devices().len(), 5);
    assert_eq!(sdk.connects.load(Ordering::SeqCst), 1);
    assert_eq!(sdk.connected.lock().unwrap()[0].display_name, "Tower 3");
}

#[tokio::test]
async fn second_request_is_rejected_and_first_completes() {
    let (_sdk, bridge) = setup(ScriptedSdk::with_connect_delay(Duration::from_millis(20)));

    let first = {
        let bridge = bridge.clone();
        tokio::spawn(async move {
            bridge
                .connect_by_id(&hex_id(4), Duration::from_secs(30), false)
                .await
        })
    };
    wait_for_phase(&bridge, ConnectPhase::DiscoveringForConnect).await;

    let second = bridge
        .connect_by_id(&hex_id(5), Duration::from_secs(30), false)
        .await;
    assert_eq!(second, Err(Error::AlreadyInProgress));

    bridge.reporter().devices_discovered(vec![raw(4, "First")]);

    // Still outstanding while connecting.
    wait_for_phase(&bridge, ConnectPhase::Connecting).await;
    let third = bridge
        .connect_by_id(&hex_id(4), Duration::from_secs(30), false)
        .await;
    assert_eq!(third, Err(Error::AlreadyInProgress));

    assert_eq!(
        first.await.unwrap(),
        Ok(ConnectResult::Name("First".to_string()))
    );
    assert_eq!(bridge.connect_phase(), ConnectPhase::Idle);
}

async fn connect_after_match(bridge: &Arc<LockerBridge>, last: u8) -> ConnectResult {
    let task = {
        let bridge = bridge.clone();
        let id = hex_id(last);
        tokio::spawn(async move {
            bridge
                .connect_by_id(&id, Duration::from_secs(30), false)
                .await
        })
    };
    wait_for_phase(bridge, ConnectPhase::DiscoveringForConnect).await;
    bridge.reporter().devices_discovered(vec![raw(last, "Hall")]);
    task.await.unwrap().unwrap()
}

#[tokio::test]
async fn connect_during_host_discovery_keeps_scan_running() {
    let (sdk, bridge) = setup(ScriptedSdk::default());

    bridge.start_discovery().await.unwrap();
    assert_eq!(connect_after_match(&bridge, 20).await.name(), "Hall");
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }

    assert_eq!(sdk.starts.load(Ordering::SeqCst), 2);
    assert_eq!(sdk.stops.load(Ordering::SeqCst), 0);

    bridge.stop_discovery().await.unwrap();
    assert_eq!(sdk.stops.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn connect_scan_is_stopped_when_bridge_started_it() {
    let (sdk, bridge) = setup(ScriptedSdk::default());

    assert_eq!(connect_after_match(&bridge, 21).await.name(), "Hall");
    tokio::time::timeout(Duration::from_secs(1), async {
        while sdk.stops.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }
    })
    .await
    .unwrap();

    assert_eq!(sdk.starts.load(Ordering::SeqCst), 1);
    assert_eq!(sdk.stops.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn connect_failure_is_delivered_once() {
    let (_sdk, bridge) = setup(ScriptedSdk::failing(SdkError::new(
        31,
        "tower rejected connection",
        "sdk.ble",
    )));
    bridge.reporter().devices_discovered(vec![raw(6, "Dock")]);

    let err = bridge
        .connect_to_tower_with_identifier(&hex_id(6))
        .await
        .unwrap_err();

    assert_eq!(err.to_payload().code, 31);
    assert_eq!(err.domain(), "sdk.ble");
    assert_eq!(bridge.connect_phase(), ConnectPhase::Idle);
}

#[tokio::test]
async fn no_listeners_no_devices_found() {
    let (_sdk, bridge) = setup(ScriptedSdk::default());
    let mut rx = bridge.subscribe();

    bridge.reporter().devices_discovered(vec![raw(1, "A"), raw(2, "B")]);
    assert_eq!(rx.try_recv().unwrap_err(), TryRecvError::Empty);
    assert_eq!(bridge.found_devices().len(), 2);

    bridge.attach();
    bridge.reporter().devices_discovered(vec![raw(1, "A")]);
    assert!(matches!(
        rx.try_recv().unwrap(),
        BridgeEvent::DevicesFound(batch) if batch.len() == 1
    ));

    bridge.remove_listeners(3);
    bridge
        .reporter()
        .log("hidden", SdkLogLevel::Debug, BTreeMap::new());
    bridge.reporter().tower_disconnected(Some(raw(1, "A")));
    assert_eq!(rx.try_recv().unwrap_err(), TryRecvError::Empty);
}

#[tokio::test]
async fn disconnect_reaches_callback_listener() {
    let (_sdk, bridge) = setup(ScriptedSdk::default());
    let events = Arc::new(Mutex::new(Vec::new()));

    let _handle = {
        let events = events.clone();
        bridge.on_event(move |event| events.lock().unwrap().push(event))
    };

    bridge.reporter().tower_disconnected(Some(raw(8, "Gone")));
    bridge.reporter().tower_disconnected(None);

    while events.lock().unwrap().is_empty() {
        tokio::task::yield_now().await;
    }
    match &events.lock().unwrap()[0] {
        BridgeEvent::DeviceDisconnected(device) => assert_eq!(device.display_name, "Gone"),
        other => panic!("unexpected event {:?}", other),
    };
}

#[tokio::test]
async fn commands_pass_through() {
    let (_sdk, bridge) = setup(ScriptedSdk::default());
    assert_eq!(bridge.reopen_locker().await.unwrap(), 12);
    assert!(bridge.sync_connected_tower().await.unwrap());
    assert!(!bridge.is_syncing());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn timeout_and_match_race_settles_once() {
    let (sdk, bridge) = setup(ScriptedSdk::default());
    let timeout = Duration::from_millis(20);
    let mut successes = 0;

    for round in 0..40u8 {
        let last = 100 + round;
        bridge.clear_cache();

        let task = {
            let bridge = bridge.clone();
            let id = hex_id(last);
            tokio::spawn(async move { bridge.connect_by_id(&id, timeout, false).await })
        };
        wait_for_phase(&bridge, ConnectPhase::DiscoveringForConnect).await;

        // Report the tower from a foreign thread right around the deadline.
        let reporter = bridge.reporter();
        let reporter_thread = std::thread::spawn(move || {
            std::thread::sleep(timeout - Duration::from_millis(1));
            reporter.devices_discovered(vec![raw(last, "Racer")]);
        });

        match task.await.unwrap() {
            Ok(result) => {
                assert_eq!(result.name(), "Racer");
                successes += 1;
            }
            Err(Error::DiscoveryTimeout) => {}
            Err(other) => panic!("unexpected outcome {:?}", other),
        }
        reporter_thread.join().unwrap();
        wait_for_phase(&bridge, ConnectPhase::Idle).await;
    }

    // A connect is only ever issued for a request the match actually won.
    assert_eq!(sdk.connects.load(Ordering::SeqCst), successes);
}
