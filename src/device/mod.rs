//! Tower identity, discovery records and the device cache.

pub mod cache;
pub mod id;
pub mod info;

pub use cache::DeviceCache;
pub use id::{DeviceId, DEVICE_ID_HEX_LEN, DEVICE_ID_LEN};
pub use info::{DiscoveredDevice, RawDevice};
