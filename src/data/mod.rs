//! Data structures exchanged with the application.
//!
//! This module contains the value types handed to and received from the
//! application: discovery records, request/response payloads, local service
//! definitions and remote central identities.

pub mod connected_central;
pub mod discovery;
pub mod request;
pub mod service;

pub use connected_central::ConnectedCentral;
pub use discovery::DiscoveryRecord;
pub use request::{AttributeValue, ReadRequest, RequestData, ResponseData, WriteRequest};
pub use service::{CharacteristicAccess, LocalCharacteristic, LocalService};
