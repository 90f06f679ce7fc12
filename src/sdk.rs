//! Capability interface over the external locker SDK.
//!
//! The SDK owns the radio, sessions and the locker wire protocol. The bridge
//! only needs to start and stop discovery, connect to a tower and forward
//! commands. Discovery batches, disconnects and log lines come back through
//! an [`SdkEventReporter`](crate::bridge::SdkEventReporter).

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

use crate::device::DiscoveredDevice;

/// Error reported by the SDK.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{code} ({domain}): {message}")]
pub struct SdkError {
    /// Numeric SDK error code.
    pub code: i32,
    /// Error text.
    pub message: String,
    /// SDK error domain (e.g. `sdk`, `ble`, `api`).
    pub domain: String,
}

impl SdkError {
    /// Create a new SDK error.
    pub fn new(code: i32, message: impl Into<String>, domain: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            domain: domain.into(),
        }
    }
}

/// Result type for SDK calls.
pub type SdkResult<T> = std::result::Result<T, SdkError>;

/// Session role requested from the tower.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u8)]
pub enum SessionPermission {
    /// Drop off / pick up.
    #[default]
    Owner = 0,
    /// Courier or service flows.
    Service = 1,
    /// Full maintenance access.
    Maintenance = 2,
    /// Tower setup.
    Setup = 3,
}

impl SessionPermission {
    /// Map the host's integer role. Unknown roles yield `None`.
    pub fn from_role(role: u8) -> Option<Self> {
        match role {
            0 => Some(Self::Owner),
            1 => Some(Self::Service),
            2 => Some(Self::Maintenance),
            3 => Some(Self::Setup),
            _ => None,
        }
    }
}

/// Severity of an SDK log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum SdkLogLevel {
    /// Very chatty output.
    Verbose,
    /// Debug output.
    Debug,
    /// Informational.
    Info,
    /// Warnings.
    Warning,
    /// Errors.
    Error,
}

impl fmt::Display for SdkLogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Verbose => "VERBOSE",
            Self::Debug => "DEBUG",
            Self::Info => "INFO",
            Self::Warning => "WARNING",
            Self::Error => "ERROR",
        };
        f.write_str(name)
    }
}

/// Commands passed straight through to the connected tower.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockerCommand {
    /// Establish a session with the connected tower.
    RequestSession {
        /// Session length.
        duration: Duration,
        /// Whether the SDK syncs events during the session.
        sync_enabled: bool,
        /// Requested role.
        permission: SessionPermission,
    },
    /// End the current session.
    TerminateSession {
        /// Client-side reason code.
        error_code: i32,
        /// Optional reason text.
        error_message: Option<String>,
    },
    /// Sync tower events with the backend.
    Sync,
    /// Ask for sync counters.
    RequestSyncStatus,
    /// Pull tower events starting at `sync_event_start`.
    SyncPull {
        /// First event id to pull.
        sync_event_start: u32,
    },
    /// Push a signed payload to the tower.
    SyncPush {
        /// Payload bytes.
        payload: Bytes,
        /// Payload signature.
        payload_auth: Bytes,
    },
    /// Record a client event on the tower.
    AddClientEvent {
        /// Opaque client info.
        client_info: Bytes,
    },
    /// Count available lockers by type.
    FindAvailableLockers,
    /// Count lockers matching a token.
    FindLockersWithToken {
        /// Token to match.
        match_token: Bytes,
        /// Only match available lockers.
        match_available: bool,
    },
    /// Open a locker using a signed token.
    OpenLockerWithToken {
        /// Payload bytes.
        payload: Bytes,
        /// Payload signature.
        payload_auth: Bytes,
    },
    /// Open any available locker of a type.
    OpenAvailableLocker {
        /// Locker type to match.
        match_locker_type: u32,
        /// Only match available lockers.
        match_available: bool,
        /// Optional token to match.
        match_token: Option<Bytes>,
        /// Token to store on the opened locker.
        locker_token: Bytes,
        /// Availability to store on the opened locker.
        locker_available: bool,
        /// Opaque client info.
        client_info: Bytes,
    },
    /// Reopen the last opened locker.
    ReopenLocker,
    /// Query whether the last locker door is open.
    CheckLockerDoor,
    /// Undo the last locker state change.
    RevertLockerState {
        /// Opaque client info.
        client_info: Bytes,
    },
    /// Set the keypad code of the last opened locker.
    SetKeypadCode {
        /// Keypad code.
        code: String,
        /// Whether the code survives the next open.
        persists: bool,
        /// Token stored after the keypad opens.
        next_token: Bytes,
        /// Availability stored after the keypad opens.
        next_available: bool,
    },
    /// Pulse the locker latch.
    TapLocker {
        /// Interval between taps in milliseconds.
        interval_ms: u32,
        /// Number of taps.
        count: u32,
    },
}

impl LockerCommand {
    /// Short name used in logs.
    pub fn name(&self) -> &'static str {
        match self {
            Self::RequestSession { .. } => "request_session",
            Self::TerminateSession { .. } => "terminate_session",
            Self::Sync => "sync",
            Self::RequestSyncStatus => "request_sync_status",
            Self::SyncPull { .. } => "sync_pull",
            Self::SyncPush { .. } => "sync_push",
            Self::AddClientEvent { .. } => "add_client_event",
            Self::FindAvailableLockers => "find_available_lockers",
            Self::FindLockersWithToken { .. } => "find_lockers_with_token",
            Self::OpenLockerWithToken { .. } => "open_locker_with_token",
            Self::OpenAvailableLocker { .. } => "open_available_locker",
            Self::ReopenLocker => "reopen_locker",
            Self::CheckLockerDoor => "check_locker_door",
            Self::RevertLockerState { .. } => "revert_locker_state",
            Self::SetKeypadCode { .. } => "set_keypad_code",
            Self::TapLocker { .. } => "tap_locker",
        }
    }
}

/// Sync counters reported by the tower.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase"))]
pub struct SyncStatus {
    /// First unsynced event id.
    pub sync_event_start: u32,
    /// Number of unsynced events.
    pub sync_event_count: u32,
    /// First unsynced command id.
    pub sync_command_start: u32,
}

/// Events pulled from the tower.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase"))]
pub struct SyncPullResult {
    /// Id of the first event in the payload.
    pub first_event_id: u32,
    /// Number of events in the payload.
    pub sync_event_count: u32,
    /// Event payload.
    pub payload: Bytes,
    /// Payload signature.
    pub payload_auth: Bytes,
}

/// Successful SDK command result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandResponse {
    /// Plain success flag.
    Done(bool),
    /// Sync counters.
    SyncStatus(SyncStatus),
    /// Pulled events.
    SyncPull(SyncPullResult),
    /// Locker counts keyed by locker type.
    Availability(BTreeMap<u32, u32>),
    /// Id of the locker that was opened.
    LockerId(u32),
    /// Whether the door is open.
    DoorOpened(bool),
}

/// The SDK operations the bridge depends on.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TowerSdk: Send + Sync + 'static {
    /// Begin scanning. Batches arrive via the event reporter.
    async fn start_discovery(&self) -> SdkResult<()>;

    /// Stop scanning.
    async fn stop_discovery(&self) -> SdkResult<()>;

    /// Connect to a discovered tower, returning its name.
    async fn connect(&self, device: DiscoveredDevice) -> SdkResult<String>;

    /// Send a command to the connected tower.
    async fn send(&self, command: LockerCommand) -> SdkResult<CommandResponse>;

    /// Whether the SDK is currently syncing events.
    fn is_syncing(&self) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_permission_from_role() {
        assert_eq!(SessionPermission::from_role(0), Some(SessionPermission::Owner));
        assert_eq!(SessionPermission::from_role(3), Some(SessionPermission::Setup));
        assert_eq!(SessionPermission::from_role(9), None);
    }

    #[test]
    fn test_command_names() {
        assert_eq!(LockerCommand::Sync.name(), "sync");
        assert_eq!(
            LockerCommand::TapLocker {
                interval_ms: 100,
                count: 2
            }
            .name(),
            "tap_locker"
        );
    }

    #[test]
    fn test_sdk_error_display() {
        let err = SdkError::new(5, "session expired", "api");
        assert_eq!(err.to_string(), "5 (api): session expired");

        let boxed: Box<dyn std::error::Error + Send + Sync> = Box::new(err);
        assert!(boxed.source().is_none());
    }
}
