//! Connect to a simulated tower by id.
//!
//! Run with: cargo run --example simulated_tower

use async_trait::async_trait;
use locker_bridge::{
    BridgeConfig, BridgeEvent, CommandResponse, DiscoveredDevice, LockerBridge, LockerCommand,
    RawDevice, Result, SdkEventReporter, SdkResult, SessionPermission, TowerSdk,
};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

/// Pretends to be the vendor SDK: discovery reports a few towers after a
/// short delay, connects always succeed.
#[derive(Default)]
struct SimulatedSdk {
    reporter: OnceLock<SdkEventReporter>,
}

#[async_trait]
impl TowerSdk for SimulatedSdk {
    async fn start_discovery(&self) -> SdkResult<()> {
        if let Some(reporter) = self.reporter.get().cloned() {
            tokio::spawn(async move {
                for round in 0..3u8 {
                    tokio::time::sleep(Duration::from_millis(400)).await;
                    let batch = (0..=round)
                        .map(|i| RawDevice {
                            id: Some(vec![0xca, 0xfe, 0, 0, 0, 0, 0, i]),
                            name: format!("Tower-{}", i),
                            firmware_version: "5.0.1".to_string(),
                            rssi: -45 - 7 * i as i32,
                        })
                        .collect();
                    reporter.devices_discovered(batch);
                }
            });
        }
        Ok(())
    }

    async fn stop_discovery(&self) -> SdkResult<()> {
        Ok(())
    }

    async fn connect(&self, device: DiscoveredDevice) -> SdkResult<String> {
        tokio::time::sleep(Duration::from_millis(150)).await;
        Ok(device.display_name)
    }

    async fn send(&self, command: LockerCommand) -> SdkResult<CommandResponse> {
        Ok(match command {
            LockerCommand::ReopenLocker => CommandResponse::LockerId(3),
            _ => CommandResponse::Done(true),
        })
    }

    fn is_syncing(&self) -> bool {
        false
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("locker_bridge=debug".parse().unwrap()),
        )
        .init();

    let sdk = Arc::new(SimulatedSdk::default());
    let bridge = LockerBridge::new(sdk.clone(), BridgeConfig::default())?;
    let _ = sdk.reporter.set(bridge.reporter());

    let _handle = bridge.on_event(|event| {
        if let BridgeEvent::DevicesFound(batch) = event {
            println!("Discovery batch:");
            for device in batch {
                println!(
                    "  {} {:<10} fw {} ({} dBm)",
                    device.id, device.display_name, device.firmware_version, device.signal_strength
                );
            }
        }
    });

    println!("Connecting to cafe000000000002 (not cached yet)...");
    let result = bridge
        .connect_to_tower("cafe000000000002", Duration::from_secs(5))
        .await?;
    println!("Connected: {:?}\n", result);

    bridge.request_session(SessionPermission::Owner).await?;
    println!("Reopened locker {}", bridge.reopen_locker().await?);

    println!("\nConnecting again (cached, no discovery)...");
    let name = bridge
        .connect_to_tower_with_identifier("cafe000000000002")
        .await?;
    println!("Connected: {}", name);

    match bridge
        .connect_by_id("cafe0000000000ff", Duration::from_secs(1), false)
        .await
    {
        Ok(_) => println!("Unexpectedly found cafe0000000000ff"),
        Err(e) => println!("\nExpected failure: {} ({:?})", e, e.to_payload()),
    }

    bridge.shutdown().await?;
    Ok(())
}
