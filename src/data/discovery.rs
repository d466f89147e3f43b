//! Discovery records.

use chrono::{DateTime, Utc};

use crate::ble::adapter::{Advertisement, DeviceHandle};

/// Snapshot of one advertisement observed while scanning.
///
/// A new record is built for every advertisement the stack reports; nothing
/// is deduplicated here. A record can be used to connect only when it carries
/// both an RSSI and a discovery time (see [`DiscoveryRecord::is_connectable_record`]).
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DiscoveryRecord {
    /// The advertising device.
    handle: DeviceHandle,
    /// Local name from the advertisement.
    pub advertisement_name: Option<String>,
    /// GAP device name.
    pub name: Option<String>,
    /// When the advertisement was received.
    pub discovery_time: Option<DateTime<Utc>>,
    /// Signal strength in dBm (closer to 0 is stronger).
    pub rssi: Option<i16>,
}

impl DiscoveryRecord {
    /// Create an empty record for a device.
    pub fn new(handle: DeviceHandle) -> Self {
        Self {
            handle,
            advertisement_name: None,
            name: None,
            discovery_time: None,
            rssi: None,
        }
    }

    /// Get the device handle.
    pub fn handle(&self) -> &DeviceHandle {
        &self.handle
    }

    /// Get the peripheral identifier.
    pub fn peripheral_id(&self) -> &str {
        self.handle.as_str()
    }

    /// Check if the record carries everything a connection attempt needs.
    pub fn is_connectable_record(&self) -> bool {
        self.rssi.is_some() && self.discovery_time.is_some()
    }
}

impl From<&Advertisement> for DiscoveryRecord {
    fn from(advertisement: &Advertisement) -> Self {
        Self {
            handle: advertisement.device.clone(),
            advertisement_name: advertisement.local_name.clone(),
            name: advertisement.device_name.clone(),
            discovery_time: advertisement.timestamp,
            rssi: advertisement.rssi,
        }
    }
}
