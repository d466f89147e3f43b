//! Remote centrals interacting with the local peripheral.

use crate::ble::adapter::DeviceHandle;

/// Identity of a remote central that sent a request or changed a subscription.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectedCentral {
    handle: DeviceHandle,
}

impl ConnectedCentral {
    /// Wrap the stack's handle for a remote central.
    pub fn new(handle: DeviceHandle) -> Self {
        Self { handle }
    }

    /// Get the central's identifier.
    pub fn central_id(&self) -> &str {
        self.handle.as_str()
    }

    /// Get the underlying handle.
    pub fn handle(&self) -> &DeviceHandle {
        &self.handle
    }
}

impl std::fmt::Display for ConnectedCentral {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "central {}", self.handle)
    }
}
