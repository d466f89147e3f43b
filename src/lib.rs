//! # ble-orchestra
//!
//! Central and Peripheral role orchestration over a Bluetooth Low Energy
//! stack.
//!
//! The crate sits between an application and a radio stack ("adapter"). It
//! keeps the bookkeeping the stack leaves to the caller: single-flight scan
//! and advertising, a connection table with one session per remote device,
//! GATT discovery state, and dispatch of incoming ATT requests to the
//! application.
//!
//! ## Features
//!
//! - **Central role**: scan, auto-connect policy, connect/reconnect/disconnect
//! - **Sessions**: service and characteristic discovery, reads, acknowledged
//!   writes and notifications
//! - **Peripheral role**: local service registry, advertising, read/write
//!   request dispatch with ATT response codes
//! - **Typed payloads**: string, integer and double views over raw bytes
//! - **btleplug adapter**: a ready-made Central adapter for macOS, Linux and Windows
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use ble_orchestra::{
//!     BtleplugCentralAdapter, CentralConfig, CentralEvent, CentralService, Result,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let (adapter, events) = BtleplugCentralAdapter::new().await?;
//!     let central = Arc::new(CentralService::new(Arc::new(adapter), CentralConfig::default()));
//!     central.start_dispatch(events);
//!
//!     let mut rx = central.subscribe();
//!     central.start_scan(None, false)?;
//!
//!     while let Ok(event) = rx.recv().await {
//!         if let CentralEvent::PeripheralDiscovered { record, .. } = event {
//!             println!("Found {} ({:?})", record.peripheral_id(), record.rssi);
//!             let session = central.connect(&record)?;
//!             println!("Connecting to {}", session.peripheral_id());
//!             break;
//!         }
//!     }
//!
//!     central.shutdown()?;
//!     Ok(())
//! }
//! ```
//!
//! ## Platform Notes
//!
//! ### macOS
//! Requires Bluetooth permission. Add `NSBluetoothAlwaysUsageDescription`
//! to your Info.plist for bundled apps.
//!
//! ### Linux
//! Requires BlueZ. User may need to be in the `bluetooth` group.
//!
//! ### Windows
//! Requires Windows 10 or later with Bluetooth LE support.
//!
//! btleplug has no GATT server role, so the Peripheral role needs an
//! application-provided [`PeripheralAdapter`].
//!
//! ## Feature Flags
//!
//! - `serde`: Enable serialization/deserialization for data types

// Public modules
pub mod ble;
pub mod callback;
pub mod central_service;
pub mod config;
pub mod connected_peripheral;
pub mod data;
pub mod error;
pub mod peripheral_service;
pub mod service_builder;
pub mod utils;

// Re-exports for convenience
pub use callback::CallbackHandle;
pub use central_service::{CentralDelegate, CentralEvent, CentralService};
pub use config::{CentralConfig, PeripheralConfig, UnresolvedRequestPolicy};
pub use connected_peripheral::{ConnectedPeripheral, SessionEvent};
pub use error::{Error, Result};
pub use peripheral_service::{PeripheralDelegate, PeripheralEvent, PeripheralService};
pub use service_builder::PeripheralServiceBuilder;

// Re-export commonly used types from submodules
pub use ble::{
    AdapterError, AdapterState, AttErrorCode, BluetoothState, BtleplugCentralAdapter,
    CentralAdapter, CentralAdapterEvent, ConnectOptions, ConnectionState, DeviceHandle,
    PeripheralAdapter, PeripheralAdapterEvent, ResponseCode,
};
pub use data::{
    AttributeValue, CharacteristicAccess, ConnectedCentral, DiscoveryRecord, LocalCharacteristic,
    LocalService, ReadRequest, RequestData, ResponseData, WriteRequest,
};
