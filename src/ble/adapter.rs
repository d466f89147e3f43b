//! The boundary between the orchestrators and the radio stack.
//!
//! The radio stack ("adapter") is driven through the [`CentralAdapter`] and
//! [`PeripheralAdapter`] command traits. Commands are fire-and-forget: a
//! returned `Ok(())` only means the stack accepted the command. Outcomes come
//! back later as [`CentralAdapterEvent`] / [`PeripheralAdapterEvent`] values,
//! which the owner of the adapter feeds into the matching orchestrator.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::hash::{Hash, Hasher};
use thiserror::Error;
use uuid::Uuid;

use crate::ble::connection::ConnectOptions;
use crate::ble::power::AdapterState;
use crate::ble::response_code::AttErrorCode;
use crate::data::{ConnectedCentral, LocalService};

/// Opaque, stack-owned identifier of a remote device.
///
/// Compared and hashed case-insensitively, since stacks disagree on the case
/// of the identifiers they hand out.
#[derive(Debug, Clone, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DeviceHandle(String);

impl DeviceHandle {
    /// Create a handle from the stack's identifier.
    pub fn new(identifier: impl Into<String>) -> Self {
        Self(identifier.into())
    }

    /// Get the identifier as given by the stack.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl PartialEq for DeviceHandle {
    fn eq(&self, other: &Self) -> bool {
        self.0.eq_ignore_ascii_case(&other.0)
    }
}

impl Hash for DeviceHandle {
    fn hash<H: Hasher>(&self, state: &mut H) {
        for byte in self.0.bytes() {
            state.write_u8(byte.to_ascii_lowercase());
        }
        state.write_u8(0xff);
    }
}

impl std::fmt::Display for DeviceHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DeviceHandle {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for DeviceHandle {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// An error reported by the radio stack.
///
/// Carried alongside asynchronous notifications; the orchestrators never retry
/// on their own.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct AdapterError {
    /// Human readable description from the stack.
    pub message: String,
    /// ATT error code, when the failure came from the remote attribute server.
    pub att_code: Option<AttErrorCode>,
}

impl AdapterError {
    /// Create an error with a message only.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            att_code: None,
        }
    }

    /// Create an error from an ATT response code.
    pub fn att(code: AttErrorCode) -> Self {
        Self {
            message: format!("ATT error {}", code),
            att_code: Some(code),
        }
    }
}

impl From<btleplug::Error> for AdapterError {
    fn from(err: btleplug::Error) -> Self {
        Self::new(err.to_string())
    }
}

/// Result of an adapter command.
pub type AdapterResult<T> = std::result::Result<T, AdapterError>;

/// One advertisement observed while scanning.
#[derive(Debug, Clone, PartialEq)]
pub struct Advertisement {
    /// The advertising device.
    pub device: DeviceHandle,
    /// Local name carried in the advertisement.
    pub local_name: Option<String>,
    /// GAP device name, if the stack knows it.
    pub device_name: Option<String>,
    /// Whether the advertisement is connectable.
    pub connectable: bool,
    /// Signal strength in dBm.
    pub rssi: Option<i16>,
    /// When the stack received the advertisement.
    pub timestamp: Option<DateTime<Utc>>,
}

/// Payload published while advertising.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdvertisementData {
    /// Advertised local name.
    pub local_name: String,
    /// UUIDs of every registered service.
    pub service_uuids: Vec<Uuid>,
}

/// Identifies an incoming ATT request so it can be answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestToken(pub u64);

/// An incoming ATT read or write request.
#[derive(Debug, Clone, PartialEq)]
pub struct AttRequest {
    /// Token to answer this request with.
    pub token: RequestToken,
    /// The remote central that sent the request.
    pub central: ConnectedCentral,
    /// Targeted characteristic.
    pub characteristic: Uuid,
    /// Value offset for long reads/writes.
    pub offset: u16,
    /// Written bytes (write requests only).
    pub value: Option<Bytes>,
}

/// Asynchronous notifications from the stack in the Central role.
#[derive(Debug, Clone, PartialEq)]
pub enum CentralAdapterEvent {
    /// The radio power state changed.
    StateChanged(AdapterState),
    /// An advertisement was received while scanning.
    Discovered(Advertisement),
    /// A connect command completed.
    Connected {
        /// The connected device.
        device: DeviceHandle,
    },
    /// A connect command failed.
    ConnectFailed {
        /// The device that could not be connected.
        device: DeviceHandle,
        /// Why the connection failed.
        error: AdapterError,
    },
    /// The link went down, on request or through link loss.
    Disconnected {
        /// The disconnected device.
        device: DeviceHandle,
        /// Set when the link was lost rather than closed.
        error: Option<AdapterError>,
    },
    /// Service discovery completed.
    ServicesDiscovered {
        /// The device whose services were discovered.
        device: DeviceHandle,
        /// Services found by this discovery round.
        services: Vec<Uuid>,
        /// Set when discovery failed.
        error: Option<AdapterError>,
    },
    /// Characteristic discovery for one service completed.
    CharacteristicsDiscovered {
        /// The device whose characteristics were discovered.
        device: DeviceHandle,
        /// The service that was searched.
        service: Uuid,
        /// Characteristics found in the service.
        characteristics: Vec<Uuid>,
        /// Set when discovery failed.
        error: Option<AdapterError>,
    },
    /// A characteristic value arrived, from a read or a notification.
    ValueUpdated {
        /// The remote device.
        device: DeviceHandle,
        /// Service of the characteristic.
        service: Uuid,
        /// The characteristic.
        characteristic: Uuid,
        /// Value bytes, if any.
        value: Option<Bytes>,
        /// Set when the read failed.
        error: Option<AdapterError>,
    },
    /// An acknowledged write completed.
    ValueWritten {
        /// The remote device.
        device: DeviceHandle,
        /// Service of the characteristic.
        service: Uuid,
        /// The characteristic.
        characteristic: Uuid,
        /// Set when the write failed.
        error: Option<AdapterError>,
    },
}

/// Asynchronous notifications from the stack in the Peripheral role.
#[derive(Debug, Clone, PartialEq)]
pub enum PeripheralAdapterEvent {
    /// The radio power state changed.
    StateChanged(AdapterState),
    /// A published service was accepted or rejected by the stack.
    ServicePublished {
        /// The service.
        service: Uuid,
        /// Set when publishing failed.
        error: Option<AdapterError>,
    },
    /// Advertising started, or failed to start.
    AdvertisingStarted {
        /// Set when advertising could not start.
        error: Option<AdapterError>,
    },
    /// One or more write requests arrived together.
    WriteRequests(Vec<AttRequest>),
    /// A read request arrived.
    ReadRequest(AttRequest),
    /// A central subscribed to a characteristic.
    Subscribed {
        /// The subscribing central.
        central: ConnectedCentral,
        /// The characteristic.
        characteristic: Uuid,
    },
    /// A central unsubscribed from a characteristic.
    Unsubscribed {
        /// The central.
        central: ConnectedCentral,
        /// The characteristic.
        characteristic: Uuid,
    },
}

/// Commands accepted by the stack in the Central role.
#[cfg_attr(test, mockall::automock)]
pub trait CentralAdapter: Send + Sync {
    /// Start scanning. An empty filter scans for every advertisement.
    fn start_scan(&self, services: Vec<Uuid>, allow_duplicates: bool) -> AdapterResult<()>;

    /// Stop scanning.
    fn stop_scan(&self) -> AdapterResult<()>;

    /// Connect to a device.
    fn connect(&self, device: &DeviceHandle, options: ConnectOptions) -> AdapterResult<()>;

    /// Cancel a connection or pending connection.
    fn cancel_connection(&self, device: &DeviceHandle) -> AdapterResult<()>;

    /// Discover services, optionally only the one given.
    fn discover_services(&self, device: &DeviceHandle, filter: Option<Uuid>) -> AdapterResult<()>;

    /// Discover every characteristic of a service.
    fn discover_characteristics(&self, device: &DeviceHandle, service: Uuid) -> AdapterResult<()>;

    /// Read a characteristic value.
    fn read(&self, device: &DeviceHandle, service: Uuid, characteristic: Uuid)
        -> AdapterResult<()>;

    /// Write a characteristic value.
    fn write(
        &self,
        device: &DeviceHandle,
        service: Uuid,
        characteristic: Uuid,
        value: Bytes,
        with_response: bool,
    ) -> AdapterResult<()>;

    /// Enable or disable notifications for a characteristic.
    fn set_notify(
        &self,
        device: &DeviceHandle,
        service: Uuid,
        characteristic: Uuid,
        enabled: bool,
    ) -> AdapterResult<()>;
}

/// Commands accepted by the stack in the Peripheral role.
#[cfg_attr(test, mockall::automock)]
pub trait PeripheralAdapter: Send + Sync {
    /// Publish a service in the local GATT database.
    fn publish_service(&self, service: &LocalService) -> AdapterResult<()>;

    /// Remove every published service.
    fn unpublish_all(&self) -> AdapterResult<()>;

    /// Start advertising.
    fn start_advertising(&self, data: &AdvertisementData) -> AdapterResult<()>;

    /// Stop advertising.
    fn stop_advertising(&self) -> AdapterResult<()>;

    /// Answer an incoming request. `value` replaces the bytes returned to a read.
    fn respond(
        &self,
        request: RequestToken,
        result: AttErrorCode,
        value: Option<Bytes>,
    ) -> AdapterResult<()>;

    /// Update the value the stack serves for a characteristic.
    fn set_characteristic_value(
        &self,
        service: Uuid,
        characteristic: Uuid,
        value: Bytes,
    ) -> AdapterResult<()>;
}
