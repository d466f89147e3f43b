//! Builder for local GATT services.
//!
//! ```
//! use ble_orchestra::PeripheralServiceBuilder;
//!
//! let mut builder = PeripheralServiceBuilder::new("6e400001-b5a3-f393-e0a9-e50e24dcca9e");
//! assert!(builder.append_characteristic("6e400002-b5a3-f393-e0a9-e50e24dcca9e"));
//! assert!(!builder.append_read_characteristic("6E400002-B5A3-F393-E0A9-E50E24DCCA9E"));
//! assert_eq!(builder.service().unwrap().characteristics.len(), 1);
//! ```

use tracing::{debug, warn};

use crate::ble::uuids;
use crate::data::{CharacteristicAccess, LocalCharacteristic, LocalService};

/// Builds one local service before it is handed to
/// [`PeripheralService::add_service`](crate::PeripheralService::add_service).
///
/// An empty or unparsable service UUID produces a builder without a service;
/// every append on it fails.
#[derive(Debug, Clone)]
pub struct PeripheralServiceBuilder {
    service: Option<LocalService>,
}

impl PeripheralServiceBuilder {
    /// Create a builder for the given service UUID.
    pub fn new(service_id: &str) -> Self {
        if service_id.trim().is_empty() {
            debug!("Empty service id, builder will produce no service");
            return Self { service: None };
        }

        let service = match uuids::parse(service_id) {
            Ok(id) => Some(LocalService::new(id)),
            Err(e) => {
                warn!("Cannot build service: {}", e);
                None
            }
        };

        Self { service }
    }

    /// Get the service built so far.
    pub fn service(&self) -> Option<&LocalService> {
        self.service.as_ref()
    }

    /// Consume the builder, returning the service.
    pub fn build(self) -> Option<LocalService> {
        self.service
    }

    /// Append a write-only characteristic.
    ///
    /// Returns `false` if there is no service, the UUID is invalid, or a
    /// characteristic with the same UUID already exists.
    pub fn append_write_characteristic(&mut self, characteristic_id: &str) -> bool {
        self.append(characteristic_id, CharacteristicAccess::WriteOnly)
    }

    /// Append a read-only characteristic.
    pub fn append_read_characteristic(&mut self, characteristic_id: &str) -> bool {
        self.append(characteristic_id, CharacteristicAccess::ReadOnly)
    }

    /// Append a readable and writable characteristic.
    pub fn append_characteristic(&mut self, characteristic_id: &str) -> bool {
        self.append(characteristic_id, CharacteristicAccess::ReadWrite)
    }

    fn append(&mut self, characteristic_id: &str, access: CharacteristicAccess) -> bool {
        let Some(service) = self.service.as_mut() else {
            return false;
        };

        let id = match uuids::parse(characteristic_id) {
            Ok(id) => id,
            Err(e) => {
                warn!("Cannot append characteristic: {}", e);
                return false;
            }
        };

        if service.contains(&id) {
            debug!("Characteristic {} already in service {}", id, service.id);
            return false;
        }

        service
            .characteristics
            .push(LocalCharacteristic::new(id, access));
        true
    }
}
