//! # locker-bridge
//!
//! Host-facing bridge for a Bluetooth locker-tower SDK.
//!
//! The SDK does the heavy lifting (tower discovery, sessions, the locker
//! protocol). This crate sits between it and a host runtime and owns the one
//! stateful piece: turning "start discovery and wait for batches" into a
//! single connect-by-id call that resolves exactly once within a time bound,
//! while the same discovery stream also feeds listener-gated host events.
//!
//! ## Features
//!
//! - **Connect by id**: cache short-circuit, discovery with timeout, exactly-once settlement
//! - **Discovery fan-out**: device cache, connect watcher and host listeners from one stream
//! - **Listener gating**: no discovery events without an attached listener
//! - **Command pass-through**: sessions, sync and locker commands with typed results
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use locker_bridge::{BridgeConfig, LockerBridge, Result};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! async fn open(sdk: Arc<dyn locker_bridge::TowerSdk>) -> Result<()> {
//!     let bridge = LockerBridge::new(sdk, BridgeConfig::default())?;
//!
//!     // Hand this to the SDK integration so discovery batches reach the bridge.
//!     let _reporter = bridge.reporter();
//!
//!     let tower = bridge
//!         .connect_to_tower("0011223344556677", Duration::from_secs(10))
//!         .await?;
//!     println!("Connected to {}", tower.name());
//!
//!     let locker = bridge.reopen_locker().await?;
//!     println!("Reopened locker {}", locker);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! - `serde`: Enable serialization/deserialization for payload and config types

pub mod bridge;
pub mod config;
pub mod connect;
pub mod device;
pub mod error;
pub mod events;
pub mod sdk;

// Re-exports for convenience
pub use bridge::{ListenerHandle, LockerBridge, SdkEventReporter};
pub use config::BridgeConfig;
pub use connect::{ConnectOrchestrator, ConnectOutcome, ConnectPhase, ConnectResult};
pub use error::{Error, ErrorPayload, Result};
pub use events::{BridgeEvent, LogRecord, SubscriberGate};

pub use device::{DeviceCache, DeviceId, DiscoveredDevice, RawDevice};
pub use sdk::{
    CommandResponse, LockerCommand, SdkError, SdkLogLevel, SdkResult, SessionPermission,
    SyncPullResult, SyncStatus, TowerSdk,
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_public_exports() {
        // Verify that key types are exported
        let _ = std::any::TypeId::of::<LockerBridge>();
        let _ = std::any::TypeId::of::<ConnectOrchestrator>();
        let _ = std::any::TypeId::of::<Error>();
        let _ = std::any::TypeId::of::<DeviceId>();
        let _ = std::any::TypeId::of::<BridgeEvent>();
        let _ = std::any::TypeId::of::<SubscriberGate>();
    }
}
