//! Sessions with connected remote peripherals.
//!
//! A [`ConnectedPeripheral`] is created by
//! [`CentralService::connect`](crate::CentralService::connect) and lives in
//! the central's connection table until the application removes it. It keeps
//! the GATT discovery state of the remote device and turns the adapter's
//! per-characteristic callbacks into [`SessionEvent`]s.
//!
//! Reads and writes are only possible after the services, and then the
//! characteristics of the target service, have been discovered:
//!
//! ```text
//! discover_all_services() -> ServicesDiscovered
//!     discover_characteristics(service) -> CharacteristicsDiscovered
//!         read_value / write_value -> ResponseReceived / WriteCompleted
//! ```

use bytes::Bytes;
use parking_lot::RwLock;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use crate::ble::adapter::{AdapterError, CentralAdapter, DeviceHandle};
use crate::ble::connection::ConnectionState;
use crate::callback::{spawn_listener, CallbackHandle};
use crate::data::{DiscoveryRecord, ResponseData};
use crate::error::{Error, Result};

/// Notification from a session.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// The connection state changed.
    StateChanged(ConnectionState),
    /// Service discovery completed.
    ServicesDiscovered {
        /// Every service known for the peripheral.
        services: Vec<Uuid>,
        /// Set when discovery failed.
        error: Option<AdapterError>,
    },
    /// Characteristic discovery for a service completed.
    CharacteristicsDiscovered {
        /// The service that was searched.
        service_id: Uuid,
        /// Characteristics known for the service.
        characteristics: Vec<Uuid>,
        /// Set when discovery failed.
        error: Option<AdapterError>,
    },
    /// A value arrived from a read or a notification.
    ResponseReceived {
        /// The received value.
        response: ResponseData,
        /// Set when the read failed.
        error: Option<AdapterError>,
    },
    /// An acknowledged write completed.
    WriteCompleted {
        /// Service of the written characteristic.
        service_id: Uuid,
        /// The written characteristic.
        characteristic_id: Uuid,
        /// Set when the write failed.
        error: Option<AdapterError>,
    },
}

/// A discovered remote service.
#[derive(Debug, Clone)]
struct DiscoveredService {
    id: Uuid,
    /// `None` until characteristic discovery ran for this service.
    characteristics: Option<Vec<Uuid>>,
}

/// Session with one remote peripheral.
pub struct ConnectedPeripheral {
    /// Device handle.
    handle: DeviceHandle,
    /// Adapter commands are issued through.
    adapter: Arc<dyn CentralAdapter>,
    /// Last known pre-connection information.
    discovery: RwLock<DiscoveryRecord>,
    /// Connection state.
    state: RwLock<ConnectionState>,
    /// `None` until service discovery ran.
    services: RwLock<Option<Vec<DiscoveredService>>>,
    /// Characteristics with notifications enabled, as (service, characteristic).
    notifying: RwLock<HashSet<(Uuid, Uuid)>>,
    /// Session event channel.
    event_tx: broadcast::Sender<SessionEvent>,
    /// Callback ID counter.
    callback_counter: AtomicU64,
}

impl ConnectedPeripheral {
    pub(crate) fn new(
        record: DiscoveryRecord,
        adapter: Arc<dyn CentralAdapter>,
        event_capacity: usize,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(event_capacity.max(1));

        Self {
            handle: record.handle().clone(),
            adapter,
            discovery: RwLock::new(record),
            state: RwLock::new(ConnectionState::Disconnected),
            services: RwLock::new(None),
            notifying: RwLock::new(HashSet::new()),
            event_tx,
            callback_counter: AtomicU64::new(0),
        }
    }

    // === Identification ===

    /// Get the peripheral identifier.
    pub fn peripheral_id(&self) -> &str {
        self.handle.as_str()
    }

    /// Get the device handle.
    pub fn handle(&self) -> &DeviceHandle {
        &self.handle
    }

    /// Get the discovery record the connection was made from.
    pub fn discovery_record(&self) -> DiscoveryRecord {
        self.discovery.read().clone()
    }

    // === Connection ===

    /// Get the current connection state.
    pub fn connection_state(&self) -> ConnectionState {
        *self.state.read()
    }

    /// Check if connected.
    pub fn is_connected(&self) -> bool {
        self.connection_state().is_connected()
    }

    /// Subscribe to session events.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.event_tx.subscribe()
    }

    /// Register a callback for session events.
    ///
    /// Must be called from within a tokio runtime.
    pub fn on_event<F>(&self, callback: F) -> CallbackHandle
    where
        F: Fn(SessionEvent) + Send + Sync + 'static,
    {
        let callback_id = self.callback_counter.fetch_add(1, Ordering::SeqCst);
        spawn_listener(callback_id, self.event_tx.subscribe(), callback)
    }

    // === Discovery ===

    /// Discover every service of the peripheral.
    ///
    /// Completion arrives as [`SessionEvent::ServicesDiscovered`].
    pub fn discover_all_services(&self) -> Result<()> {
        self.ensure_connected()?;
        debug!("Discovering all services of {}", self.handle);
        self.adapter.discover_services(&self.handle, None)?;
        Ok(())
    }

    /// Discover a single service.
    pub fn discover_services(&self, service_id: Uuid) -> Result<()> {
        self.ensure_connected()?;
        debug!("Discovering service {} of {}", service_id, self.handle);
        self.adapter
            .discover_services(&self.handle, Some(service_id))?;
        Ok(())
    }

    /// Discover the characteristics of a discovered service.
    ///
    /// Returns `Ok(false)` if the service is not among the discovered ones.
    ///
    /// # Errors
    ///
    /// [`Error::NotFetchedServices`] if service discovery never completed.
    pub fn discover_characteristics(&self, service_id: Uuid) -> Result<bool> {
        self.ensure_connected()?;

        let known = {
            let services = self.services.read();
            let services = services.as_ref().ok_or(Error::NotFetchedServices)?;
            services.iter().any(|s| s.id == service_id)
        };

        if !known {
            debug!("Service {} not found on {}", service_id, self.handle);
            return Ok(false);
        }

        self.adapter
            .discover_characteristics(&self.handle, service_id)?;
        Ok(true)
    }

    /// List the discovered services.
    ///
    /// # Errors
    ///
    /// [`Error::NotFetchedServices`] if service discovery never completed.
    pub fn list_services(&self) -> Result<Vec<Uuid>> {
        self.services
            .read()
            .as_ref()
            .map(|services| services.iter().map(|s| s.id).collect())
            .ok_or(Error::NotFetchedServices)
    }

    /// List the discovered characteristics of a service.
    ///
    /// Returns an empty list if the service is unknown.
    ///
    /// # Errors
    ///
    /// [`Error::NotFetchedServices`] if service discovery never completed,
    /// [`Error::NotFetchedCharacteristics`] if characteristic discovery never
    /// completed for this service.
    pub fn list_characteristics(&self, service_id: Uuid) -> Result<Vec<Uuid>> {
        let services = self.services.read();
        let services = services.as_ref().ok_or(Error::NotFetchedServices)?;

        let Some(service) = services.iter().find(|s| s.id == service_id) else {
            return Ok(Vec::new());
        };

        service
            .characteristics
            .clone()
            .ok_or(Error::NotFetchedCharacteristics)
    }

    // === Read / write ===

    /// Write a value with acknowledgement.
    ///
    /// Notifications on the characteristic are disabled first. Returns
    /// `Ok(false)` if the service or characteristic is unknown. Completion
    /// arrives as [`SessionEvent::WriteCompleted`].
    pub fn write_value(
        &self,
        service_id: Uuid,
        characteristic_id: Uuid,
        value: impl Into<Bytes>,
    ) -> Result<bool> {
        self.ensure_connected()?;

        let Some((service, characteristic)) =
            self.resolve_characteristic(service_id, characteristic_id)?
        else {
            debug!(
                "Write target {}/{} not found on {}",
                service_id, characteristic_id, self.handle
            );
            return Ok(false);
        };

        self.disable_notify_if_active(service, characteristic)?;

        let value = value.into();
        trace!(
            "Writing {} bytes to {}/{} on {}",
            value.len(),
            service,
            characteristic,
            self.handle
        );
        self.adapter
            .write(&self.handle, service, characteristic, value, true)?;
        Ok(true)
    }

    /// Read a value.
    ///
    /// Notifications on the characteristic are disabled first so that the
    /// reply is not interleaved with notification payloads. Returns
    /// `Ok(false)` if the service or characteristic is unknown. The value
    /// arrives as [`SessionEvent::ResponseReceived`].
    pub fn read_value(&self, service_id: Uuid, characteristic_id: Uuid) -> Result<bool> {
        self.ensure_connected()?;

        let Some((service, characteristic)) =
            self.resolve_characteristic(service_id, characteristic_id)?
        else {
            debug!(
                "Read target {}/{} not found on {}",
                service_id, characteristic_id, self.handle
            );
            return Ok(false);
        };

        self.disable_notify_if_active(service, characteristic)?;

        trace!("Reading {}/{} on {}", service, characteristic, self.handle);
        self.adapter.read(&self.handle, service, characteristic)?;
        Ok(true)
    }

    /// Enable or disable notifications for a characteristic.
    ///
    /// Notified values arrive as [`SessionEvent::ResponseReceived`].
    pub fn set_notify(
        &self,
        service_id: Uuid,
        characteristic_id: Uuid,
        enabled: bool,
    ) -> Result<bool> {
        self.ensure_connected()?;

        let Some((service, characteristic)) =
            self.resolve_characteristic(service_id, characteristic_id)?
        else {
            return Ok(false);
        };

        self.adapter
            .set_notify(&self.handle, service, characteristic, enabled)?;

        let mut notifying = self.notifying.write();
        if enabled {
            notifying.insert((service, characteristic));
        } else {
            notifying.remove(&(service, characteristic));
        }

        Ok(true)
    }

    /// Check if notifications are enabled for a characteristic.
    pub fn is_notifying(&self, service_id: Uuid, characteristic_id: Uuid) -> bool {
        self.notifying
            .read()
            .contains(&(service_id, characteristic_id))
    }

    // === Adapter callbacks ===

    /// Atomically move into `Connecting` unless a connection is active.
    ///
    /// Returns the previous state so a refused adapter command can be rolled back.
    pub(crate) fn begin_connect(&self, record: Option<DiscoveryRecord>) -> Result<ConnectionState> {
        let previous = {
            let mut state = self.state.write();
            if state.is_active() {
                return Err(Error::AlreadyConnected);
            }
            let previous = *state;
            *state = ConnectionState::Connecting;
            previous
        };

        if let Some(record) = record {
            *self.discovery.write() = record;
        }
        self.reset_gatt();
        self.emit(SessionEvent::StateChanged(ConnectionState::Connecting));

        Ok(previous)
    }

    /// Atomically move into `Disconnecting` unless already closing or closed.
    pub(crate) fn begin_disconnect(&self) -> Option<ConnectionState> {
        let previous = {
            let mut state = self.state.write();
            if state.is_closing_or_closed() {
                return None;
            }
            let previous = *state;
            *state = ConnectionState::Disconnecting;
            previous
        };

        self.emit(SessionEvent::StateChanged(ConnectionState::Disconnecting));
        Some(previous)
    }

    /// Update the connection state and emit an event.
    pub(crate) fn set_state(&self, new_state: ConnectionState) -> ConnectionState {
        let old_state = {
            let mut state = self.state.write();
            let old = *state;
            *state = new_state;
            old
        };

        if old_state != new_state {
            debug!(
                "{} connection state changed: {} -> {}",
                self.handle, old_state, new_state
            );
            if new_state == ConnectionState::Disconnected {
                self.notifying.write().clear();
            }
            self.emit(SessionEvent::StateChanged(new_state));
        }

        old_state
    }

    pub(crate) fn handle_services_discovered(
        &self,
        discovered: Vec<Uuid>,
        error: Option<AdapterError>,
    ) {
        let services: Vec<Uuid> = {
            let mut cache = self.services.write();

            if error.is_none() || !discovered.is_empty() {
                let services = cache.get_or_insert_with(Vec::new);
                for id in discovered {
                    if !services.iter().any(|s| s.id == id) {
                        services.push(DiscoveredService {
                            id,
                            characteristics: None,
                        });
                    }
                }
            }

            cache
                .as_ref()
                .map(|services| services.iter().map(|s| s.id).collect())
                .unwrap_or_default()
        };

        match &error {
            Some(e) => warn!("Service discovery on {} failed: {}", self.handle, e),
            None => info!("Discovered {} services on {}", services.len(), self.handle),
        }

        self.emit(SessionEvent::ServicesDiscovered { services, error });
    }

    pub(crate) fn handle_characteristics_discovered(
        &self,
        service_id: Uuid,
        discovered: Vec<Uuid>,
        error: Option<AdapterError>,
    ) {
        let characteristics = {
            let mut cache = self.services.write();
            let service = cache
                .as_mut()
                .and_then(|services| services.iter_mut().find(|s| s.id == service_id));

            match service {
                Some(service) => {
                    if error.is_none() || !discovered.is_empty() {
                        service.characteristics = Some(discovered);
                    }
                    service.characteristics.clone().unwrap_or_default()
                }
                None => {
                    warn!(
                        "Characteristics reported for unknown service {} on {}",
                        service_id, self.handle
                    );
                    discovered
                }
            }
        };

        if let Some(e) = &error {
            warn!(
                "Characteristic discovery for {} on {} failed: {}",
                service_id, self.handle, e
            );
        }

        self.emit(SessionEvent::CharacteristicsDiscovered {
            service_id,
            characteristics,
            error,
        });
    }

    pub(crate) fn handle_value_updated(
        &self,
        service_id: Uuid,
        characteristic_id: Uuid,
        value: Option<Bytes>,
        error: Option<AdapterError>,
    ) {
        trace!(
            "Value for {}/{} on {}: {:?}",
            service_id,
            characteristic_id,
            self.handle,
            value.as_ref().map(|v| v.len())
        );

        self.emit(SessionEvent::ResponseReceived {
            response: ResponseData::new(service_id, characteristic_id, value),
            error,
        });
    }

    pub(crate) fn handle_value_written(
        &self,
        service_id: Uuid,
        characteristic_id: Uuid,
        error: Option<AdapterError>,
    ) {
        if let Some(e) = &error {
            warn!(
                "Write to {}/{} on {} failed: {}",
                service_id, characteristic_id, self.handle, e
            );
        }

        self.emit(SessionEvent::WriteCompleted {
            service_id,
            characteristic_id,
            error,
        });
    }

    // === Internal ===

    fn ensure_connected(&self) -> Result<()> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(Error::NotConnected)
        }
    }

    fn resolve_characteristic(
        &self,
        service_id: Uuid,
        characteristic_id: Uuid,
    ) -> Result<Option<(Uuid, Uuid)>> {
        let services = self.services.read();
        let services = services.as_ref().ok_or(Error::NotFetchedServices)?;

        let Some(service) = services.iter().find(|s| s.id == service_id) else {
            return Ok(None);
        };

        let characteristics = service
            .characteristics
            .as_ref()
            .ok_or(Error::NotFetchedCharacteristics)?;

        Ok(characteristics
            .iter()
            .find(|c| **c == characteristic_id)
            .map(|c| (service.id, *c)))
    }

    fn disable_notify_if_active(&self, service: Uuid, characteristic: Uuid) -> Result<()> {
        if !self.notifying.read().contains(&(service, characteristic)) {
            return Ok(());
        }

        debug!(
            "Disabling notifications on {}/{} before request",
            service, characteristic
        );
        self.adapter
            .set_notify(&self.handle, service, characteristic, false)?;
        self.notifying.write().remove(&(service, characteristic));
        Ok(())
    }

    fn reset_gatt(&self) {
        *self.services.write() = None;
        self.notifying.write().clear();
    }

    fn emit(&self, event: SessionEvent) {
        let _ = self.event_tx.send(event);
    }
}

impl std::fmt::Debug for ConnectedPeripheral {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectedPeripheral")
            .field("handle", &self.handle)
            .field("connection_state", &self.connection_state())
            .finish()
    }
}
