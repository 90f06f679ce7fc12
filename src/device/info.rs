//! Discovery records reported by the SDK.

use crate::device::id::DeviceId;
use crate::error::{Error, Result};

/// A tower seen during discovery.
///
/// Later reports with the same id supersede earlier ones.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase"))]
pub struct DiscoveredDevice {
    /// Tower id.
    #[cfg_attr(feature = "serde", serde(rename = "towerId"))]
    pub id: DeviceId,
    /// Advertised tower name.
    #[cfg_attr(feature = "serde", serde(rename = "towerName"))]
    pub display_name: String,
    /// Firmware version string.
    pub firmware_version: String,
    /// Signal strength in dBm.
    #[cfg_attr(feature = "serde", serde(rename = "rssi"))]
    pub signal_strength: i32,
}

impl DiscoveredDevice {
    /// Create a new discovery record.
    pub fn new(
        id: DeviceId,
        display_name: impl Into<String>,
        firmware_version: impl Into<String>,
        signal_strength: i32,
    ) -> Self {
        Self {
            id,
            display_name: display_name.into(),
            firmware_version: firmware_version.into(),
            signal_strength,
        }
    }
}

/// A tower record as handed over by the SDK, before id validation.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RawDevice {
    /// Raw id bytes; may be missing or of the wrong length.
    pub id: Option<Vec<u8>>,
    /// Advertised tower name.
    pub name: String,
    /// Firmware version string.
    pub firmware_version: String,
    /// Signal strength in dBm.
    pub rssi: i32,
}

impl TryFrom<RawDevice> for DiscoveredDevice {
    type Error = Error;

    fn try_from(raw: RawDevice) -> Result<Self> {
        let bytes = raw
            .id
            .ok_or_else(|| Error::invalid_identifier("tower id cannot be null"))?;
        let id = DeviceId::from_slice(&bytes)?;

        Ok(Self {
            id,
            display_name: raw.name,
            firmware_version: raw.firmware_version,
            signal_strength: raw.rssi,
        })
    }
}
