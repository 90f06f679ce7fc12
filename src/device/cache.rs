//! Device cache shared by the discovery sink and the connect orchestrator.
//!
//! Two views are kept. The long-lived view survives discovery sessions and is
//! what connect-by-id consults to skip a scan. The session view holds what the
//! current plain discovery has seen and is reset each time one starts.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;

use crate::device::id::DeviceId;
use crate::device::info::DiscoveredDevice;

/// A cached discovery record plus when it was last reported.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CachedDevice {
    /// Latest report for this tower.
    pub device: DiscoveredDevice,
    /// Time of the latest report.
    pub last_seen: DateTime<Utc>,
}

#[derive(Default)]
struct CacheMaps {
    /// Towers usable for the connect short-circuit.
    known: HashMap<DeviceId, CachedDevice>,
    /// Towers seen since the last plain discovery start.
    session: HashMap<DeviceId, CachedDevice>,
}

/// Thread-safe store of towers seen by discovery.
#[derive(Default)]
pub struct DeviceCache {
    /// Both views behind one lock.
    maps: RwLock<CacheMaps>,
}

impl DeviceCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a device (last write wins).
    ///
    /// The session view is always updated; the long-lived view only when
    /// `remember` is set.
    pub fn upsert(&self, device: DiscoveredDevice, remember: bool) {
        let entry = CachedDevice {
            device,
            last_seen: Utc::now(),
        };
        let id = entry.device.id;

        let mut maps = self.maps.write();
        if remember {
            maps.known.insert(id, entry.clone());
        }
        maps.session.insert(id, entry);
    }

    /// Look up a tower in the long-lived view.
    pub fn get(&self, id: &DeviceId) -> Option<DiscoveredDevice> {
        self.maps.read().known.get(id).map(|e| e.device.clone())
    }

    /// Whether the long-lived view holds `id`.
    pub fn contains(&self, id: &DeviceId) -> bool {
        self.maps.read().known.contains_key(id)
    }

    /// Reset the session view. The long-lived view is untouched.
    pub fn begin_session(&self) {
        self.maps.write().session.clear();
    }

    /// Towers seen in the current session, strongest signal first.
    pub fn session_devices(&self) -> Vec<DiscoveredDevice> {
        sorted_by_signal(self.maps.read().session.values())
    }

    /// Every tower in the long-lived view, strongest signal first.
    pub fn known_devices(&self) -> Vec<DiscoveredDevice> {
        sorted_by_signal(self.maps.read().known.values())
    }

    /// Long-lived entry with its timestamp.
    pub fn entry(&self, id: &DeviceId) -> Option<CachedDevice> {
        self.maps.read().known.get(id).cloned()
    }

    /// Number of towers in the long-lived view.
    pub fn len(&self) -> usize {
        self.maps.read().known.len()
    }

    /// Whether the long-lived view is empty.
    pub fn is_empty(&self) -> bool {
        self.maps.read().known.is_empty()
    }

    /// Drop both views.
    pub fn clear(&self) {
        let mut maps = self.maps.write();
        maps.known.clear();
        maps.session.clear();
    }
}

fn sorted_by_signal<'a>(entries: impl Iterator<Item = &'a CachedDevice>) -> Vec<DiscoveredDevice> {
    let mut devices: Vec<_> = entries.map(|e| e.device.clone()).collect();
    devices.sort_by_key(|d| std::cmp::Reverse(d.signal_strength));
    devices
}
