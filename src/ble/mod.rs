//! BLE communication module.
//!
//! This module holds the boundary to the radio stack (the adapter traits and
//! their btleplug implementation) together with the identifiers and protocol
//! codes shared by both roles.

pub mod adapter;
pub mod btleplug_adapter;
pub mod connection;
pub mod power;
pub mod response_code;
pub mod uuids;

pub use adapter::{
    AdapterError, AdapterResult, Advertisement, AdvertisementData, AttRequest, CentralAdapter,
    CentralAdapterEvent, DeviceHandle, PeripheralAdapter, PeripheralAdapterEvent, RequestToken,
};
pub use btleplug_adapter::BtleplugCentralAdapter;
pub use connection::{ConnectOptions, ConnectionState};
pub use power::{AdapterState, BluetoothState};
pub use response_code::{AttErrorCode, ResponseCode};
pub use uuids::*;
