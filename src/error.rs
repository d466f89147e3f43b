//! Error types for the ble-orchestra crate.

use thiserror::Error;

use crate::ble::adapter::AdapterError;
use crate::ble::connection::ConnectionState;

/// The main error type for this crate.
///
/// Every variant except [`Error::Adapter`] and [`Error::Bluetooth`] is a
/// precondition failure raised synchronously by the call that violated it.
/// Failures reported later by the radio stack travel as an [`AdapterError`]
/// inside the matching notification instead.
#[derive(Error, Debug)]
pub enum Error {
    /// A scan was requested while one is already running.
    #[error("Already scanning")]
    AlreadyScanning,

    /// Advertising was requested while already advertising.
    #[error("Already advertising")]
    AlreadyAdvertised,

    /// A connect or reconnect was requested for a device that is connected or connecting.
    #[error("Peripheral already connected or connecting")]
    AlreadyConnected,

    /// Advertising was requested before any service was registered.
    #[error("No advertisement service has been added")]
    AdvertisementServiceIdNotAdded,

    /// The operation needs the remote services, but they were never discovered.
    #[error("Services have not been fetched")]
    NotFetchedServices,

    /// The operation needs the characteristics of a service, but they were never discovered.
    #[error("Characteristics have not been fetched")]
    NotFetchedCharacteristics,

    /// A connection was requested from a discovery record missing RSSI or discovery time.
    #[error("Discovery record is incomplete (RSSI and discovery time are required)")]
    IncompleteDiscoveryRecord,

    /// Operation requires a connection but the peripheral is not connected.
    #[error("Peripheral not connected")]
    NotConnected,

    /// The session cannot be removed in its current state.
    #[error("Session {identifier} is busy ({state})")]
    SessionBusy {
        /// The device identifier of the session.
        identifier: String,
        /// The state the session was in.
        state: ConnectionState,
    },

    /// A string could not be parsed as a Bluetooth UUID.
    #[error("Invalid UUID: {value}")]
    InvalidUuid {
        /// The rejected input.
        value: String,
    },

    /// The adapter refused a command outright.
    #[error("Adapter error: {0}")]
    Adapter(#[from] AdapterError),

    /// Bluetooth-related error from btleplug.
    #[error("Bluetooth error: {0}")]
    Bluetooth(#[from] btleplug::Error),

    /// Bluetooth is not available or is disabled on this system.
    #[error("Bluetooth not available or disabled")]
    BluetoothUnavailable,

    /// An internal error occurred.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// A specialized Result type for this crate.
pub type Result<T> = std::result::Result<T, Error>;
