//! The Peripheral role: local services, advertising and request dispatch.
//!
//! [`PeripheralService`] keeps the registry of local services built with
//! [`PeripheralServiceBuilder`] and answers read and write requests from
//! remote centrals by asking the [`PeripheralDelegate`].

use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use crate::ble::adapter::{
    AdapterError, AdvertisementData, AttRequest, PeripheralAdapter, PeripheralAdapterEvent,
    RequestToken,
};
use crate::ble::power::BluetoothState;
use crate::ble::response_code::{AttErrorCode, ResponseCode};
use crate::callback::{spawn_listener, CallbackHandle};
use crate::config::{PeripheralConfig, UnresolvedRequestPolicy};
use crate::data::{ConnectedCentral, LocalService, ReadRequest, RequestData, WriteRequest};
use crate::error::{Error, Result};
use crate::service_builder::PeripheralServiceBuilder;

/// Notification from the Peripheral role.
#[derive(Debug, Clone, PartialEq)]
pub enum PeripheralEvent {
    /// The radio power state changed.
    PowerStateChanged(BluetoothState),
    /// The stack accepted or rejected a published service.
    ServicePublished {
        /// The service.
        service_id: Uuid,
        /// Set when publishing failed.
        error: Option<AdapterError>,
    },
    /// Advertising started, or failed to start.
    AdvertisingStarted {
        /// Set when advertising could not start.
        error: Option<AdapterError>,
    },
    /// A central subscribed to a characteristic.
    Subscribed {
        /// The central.
        central: ConnectedCentral,
        /// The characteristic.
        characteristic_id: Uuid,
    },
    /// A central unsubscribed from a characteristic.
    Unsubscribed {
        /// The central.
        central: ConnectedCentral,
        /// The characteristic.
        characteristic_id: Uuid,
    },
}

/// Application answers to incoming requests.
///
/// Every method has a default, so implementations only override what they
/// handle. Methods are called from the dispatch context and must return
/// promptly.
pub trait PeripheralDelegate: Send + Sync {
    /// Local name to advertise when [`PeripheralService::start_advertising`]
    /// is called without one.
    fn advertisement_local_name(&self) -> Option<String> {
        None
    }

    /// New value for a written characteristic. `None` leaves it unchanged.
    fn write_value_for(&self, _central: &ConnectedCentral, _request: &WriteRequest) -> Option<Bytes> {
        None
    }

    /// Bytes to answer a read with. `None` lets the stack serve its cached value.
    fn read_value_for(&self, _central: &ConnectedCentral, _request: &ReadRequest) -> Option<Bytes> {
        None
    }

    /// Outcome to report for a request.
    fn response_code_for(&self, _central: &ConnectedCentral, _request: &RequestData) -> ResponseCode {
        ResponseCode::Success
    }
}

/// Peripheral role orchestrator.
pub struct PeripheralService {
    /// Unique identifier of this instance.
    identifier: Uuid,
    /// Adapter commands are issued through.
    adapter: Arc<dyn PeripheralAdapter>,
    /// Configuration.
    config: PeripheralConfig,
    /// Whether advertising is active.
    is_advertising: RwLock<bool>,
    /// Last reported power state.
    bluetooth_state: RwLock<Option<BluetoothState>>,
    /// Registered services in registration order.
    services: RwLock<Vec<LocalService>>,
    /// Application request handler.
    delegate: RwLock<Option<Arc<dyn PeripheralDelegate>>>,
    /// Peripheral event channel.
    event_tx: broadcast::Sender<PeripheralEvent>,
    /// Callback ID counter.
    callback_counter: AtomicU64,
    /// Dispatch task handle.
    dispatch_handle: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl PeripheralService {
    /// Create a new peripheral orchestrator over an adapter.
    pub fn new(adapter: Arc<dyn PeripheralAdapter>, config: PeripheralConfig) -> Self {
        let (event_tx, _) = broadcast::channel(config.event_capacity.max(1));

        Self {
            identifier: Uuid::new_v4(),
            adapter,
            config,
            is_advertising: RwLock::new(false),
            bluetooth_state: RwLock::new(None),
            services: RwLock::new(Vec::new()),
            delegate: RwLock::new(None),
            event_tx,
            callback_counter: AtomicU64::new(0),
            dispatch_handle: Mutex::new(None),
        }
    }

    /// Get the unique identifier of this orchestrator.
    pub fn identifier(&self) -> Uuid {
        self.identifier
    }

    /// Get the configuration.
    pub fn config(&self) -> &PeripheralConfig {
        &self.config
    }

    /// Set the application request handler.
    pub fn set_delegate(&self, delegate: Arc<dyn PeripheralDelegate>) {
        *self.delegate.write() = Some(delegate);
    }

    /// Remove the application request handler.
    pub fn clear_delegate(&self) {
        *self.delegate.write() = None;
    }

    /// Get the last power state reported by the adapter.
    pub fn bluetooth_state(&self) -> Option<BluetoothState> {
        *self.bluetooth_state.read()
    }

    // === Service registry ===

    /// Register and publish the service held by a builder.
    ///
    /// Returns `Ok(false)` if the builder holds no service. Services are not
    /// checked against each other for duplicate UUIDs.
    pub fn add_service(&self, builder: &PeripheralServiceBuilder) -> Result<bool> {
        let Some(service) = builder.service() else {
            debug!("Builder holds no service, nothing to add");
            return Ok(false);
        };

        self.adapter.publish_service(service)?;
        info!(
            "Published service {} with {} characteristics",
            service.id,
            service.characteristics.len()
        );
        self.services.write().push(service.clone());

        Ok(true)
    }

    /// Remove every registered service.
    pub fn clear_services(&self) -> Result<()> {
        self.adapter.unpublish_all()?;
        self.services.write().clear();
        info!("Cleared all services");
        Ok(())
    }

    /// Get a snapshot of the registered services.
    pub fn services(&self) -> Vec<LocalService> {
        self.services.read().clone()
    }

    /// Get the value a characteristic currently holds.
    pub fn value(&self, service_id: Uuid, characteristic_id: Uuid) -> Option<Bytes> {
        self.services
            .read()
            .iter()
            .find(|s| s.id == service_id)
            .and_then(|s| s.characteristic(&characteristic_id))
            .and_then(|c| c.value.clone())
    }

    /// Set the value of a characteristic and push it to the stack.
    ///
    /// Returns `Ok(false)` if the characteristic is not registered.
    pub fn set_value(
        &self,
        service_id: Uuid,
        characteristic_id: Uuid,
        value: impl Into<Bytes>,
    ) -> Result<bool> {
        let registered = self
            .services
            .read()
            .iter()
            .any(|s| s.id == service_id && s.contains(&characteristic_id));
        if !registered {
            return Ok(false);
        }

        let value = value.into();
        self.adapter
            .set_characteristic_value(service_id, characteristic_id, value.clone())?;
        self.store_value(service_id, characteristic_id, value);

        Ok(true)
    }

    // === Advertising ===

    /// Start advertising every registered service.
    ///
    /// The local name is taken from `local_name`, then from the delegate,
    /// then from [`PeripheralConfig::default_local_name`]; empty names are
    /// skipped.
    ///
    /// # Errors
    ///
    /// - [`Error::AlreadyAdvertised`] if advertising is active
    /// - [`Error::AdvertisementServiceIdNotAdded`] if no service is registered
    pub fn start_advertising(&self, local_name: Option<&str>) -> Result<()> {
        let local_name = self.resolve_local_name(local_name);

        let data = {
            let mut advertising = self.is_advertising.write();
            if *advertising {
                return Err(Error::AlreadyAdvertised);
            }

            let service_uuids: Vec<Uuid> = self.services.read().iter().map(|s| s.id).collect();
            if service_uuids.is_empty() {
                return Err(Error::AdvertisementServiceIdNotAdded);
            }

            *advertising = true;
            AdvertisementData {
                local_name,
                service_uuids,
            }
        };

        if let Err(e) = self.adapter.start_advertising(&data) {
            warn!("Adapter refused to start advertising: {}", e);
            *self.is_advertising.write() = false;
            return Err(e.into());
        }

        info!(
            "Advertising \"{}\" with {} services",
            data.local_name,
            data.service_uuids.len()
        );
        Ok(())
    }

    /// Stop advertising. Does nothing if not advertising.
    pub fn stop_advertising(&self) -> Result<()> {
        if !self.is_advertising() {
            debug!("Not advertising");
            return Ok(());
        }

        self.adapter.stop_advertising()?;
        *self.is_advertising.write() = false;
        info!("Stopped advertising");

        Ok(())
    }

    /// Check if advertising.
    pub fn is_advertising(&self) -> bool {
        *self.is_advertising.read()
    }

    // === Notifications ===

    /// Subscribe to peripheral events.
    pub fn subscribe(&self) -> broadcast::Receiver<PeripheralEvent> {
        self.event_tx.subscribe()
    }

    /// Register a callback for peripheral events.
    ///
    /// Must be called from within a tokio runtime.
    pub fn on_event<F>(&self, callback: F) -> CallbackHandle
    where
        F: Fn(PeripheralEvent) + Send + Sync + 'static,
    {
        let callback_id = self.callback_counter.fetch_add(1, Ordering::SeqCst);
        spawn_listener(callback_id, self.event_tx.subscribe(), callback)
    }

    // === Adapter events ===

    /// Process one event from the adapter.
    pub fn handle_adapter_event(&self, event: PeripheralAdapterEvent) {
        match event {
            PeripheralAdapterEvent::StateChanged(state) => {
                let state = BluetoothState::from(state);
                *self.bluetooth_state.write() = Some(state);
                if !state.is_powered_on() {
                    *self.is_advertising.write() = false;
                }
                info!("Bluetooth state: {}", state);
                self.emit(PeripheralEvent::PowerStateChanged(state));
            }
            PeripheralAdapterEvent::ServicePublished { service, error } => {
                match &error {
                    Some(e) => warn!("Stack rejected service {}: {}", service, e),
                    None => debug!("Stack accepted service {}", service),
                }
                self.emit(PeripheralEvent::ServicePublished {
                    service_id: service,
                    error,
                });
            }
            PeripheralAdapterEvent::AdvertisingStarted { error } => {
                if let Some(e) = &error {
                    warn!("Advertising failed to start: {}", e);
                    *self.is_advertising.write() = false;
                }
                self.emit(PeripheralEvent::AdvertisingStarted { error });
            }
            PeripheralAdapterEvent::WriteRequests(requests) => {
                for request in requests {
                    self.handle_write_request(request);
                }
            }
            PeripheralAdapterEvent::ReadRequest(request) => {
                self.handle_read_request(request);
            }
            PeripheralAdapterEvent::Subscribed {
                central,
                characteristic,
            } => {
                debug!("{} subscribed to {}", central, characteristic);
                self.emit(PeripheralEvent::Subscribed {
                    central,
                    characteristic_id: characteristic,
                });
            }
            PeripheralAdapterEvent::Unsubscribed {
                central,
                characteristic,
            } => {
                debug!("{} unsubscribed from {}", central, characteristic);
                self.emit(PeripheralEvent::Unsubscribed {
                    central,
                    characteristic_id: characteristic,
                });
            }
        }
    }

    /// Spawn the dispatch task feeding adapter events into this orchestrator.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start_dispatch(
        self: &Arc<Self>,
        mut events: mpsc::UnboundedReceiver<PeripheralAdapterEvent>,
    ) {
        let service = Arc::downgrade(self);

        let handle = tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                let Some(service) = service.upgrade() else {
                    break;
                };
                service.handle_adapter_event(event);
            }
            debug!("Peripheral dispatch task ended");
        });

        if let Some(previous) = self.dispatch_handle.lock().replace(handle) {
            previous.abort();
        }
    }

    /// Stop advertising and the dispatch task.
    pub fn shutdown(&self) -> Result<()> {
        info!("Shutting down peripheral {}", self.identifier);

        self.stop_advertising()?;

        if let Some(handle) = self.dispatch_handle.lock().take() {
            handle.abort();
        }

        Ok(())
    }

    // === Internal ===

    fn handle_write_request(&self, request: AttRequest) {
        let Some(service_id) = self.resolve_service(request.characteristic) else {
            self.reject_unresolved(&request);
            return;
        };

        trace!(
            "Write request from {} for {}/{}",
            request.central,
            service_id,
            request.characteristic
        );

        let write = WriteRequest {
            service_id,
            characteristic_id: request.characteristic,
            value: request.value.clone(),
            offset: request.offset,
        };

        let delegate = self.delegate.read().clone();
        let code = match delegate {
            Some(delegate) => {
                if let Some(value) = delegate.write_value_for(&request.central, &write) {
                    self.store_value(service_id, request.characteristic, value.clone());
                    if let Err(e) =
                        self.adapter
                            .set_characteristic_value(service_id, request.characteristic, value)
                    {
                        warn!("Failed to update {}: {}", request.characteristic, e);
                    }
                }
                delegate.response_code_for(&request.central, &RequestData::Write(write))
            }
            None => ResponseCode::Success,
        };

        self.respond(request.token, code.to_att_error(), None);
    }

    fn handle_read_request(&self, request: AttRequest) {
        let Some(service_id) = self.resolve_service(request.characteristic) else {
            self.reject_unresolved(&request);
            return;
        };

        trace!(
            "Read request from {} for {}/{}",
            request.central,
            service_id,
            request.characteristic
        );

        let read = ReadRequest {
            service_id,
            characteristic_id: request.characteristic,
            current_value: self.value(service_id, request.characteristic),
            offset: request.offset,
        };

        let delegate = self.delegate.read().clone();
        let (value, code) = match delegate {
            Some(delegate) => {
                let value = delegate.read_value_for(&request.central, &read);
                let code = delegate.response_code_for(&request.central, &RequestData::Read(read));
                (value, code)
            }
            None => (None, ResponseCode::Success),
        };

        self.respond(request.token, code.to_att_error(), value);
    }

    fn resolve_service(&self, characteristic_id: Uuid) -> Option<Uuid> {
        self.services
            .read()
            .iter()
            .find(|s| s.contains(&characteristic_id))
            .map(|s| s.id)
    }

    fn reject_unresolved(&self, request: &AttRequest) {
        match self.config.unresolved_requests {
            UnresolvedRequestPolicy::RespondAttributeNotFound => {
                warn!(
                    "Request from {} for unknown characteristic {}",
                    request.central, request.characteristic
                );
                self.respond(request.token, AttErrorCode::AttributeNotFound, None);
            }
            UnresolvedRequestPolicy::Ignore => {
                warn!(
                    "Ignoring request from {} for unknown characteristic {}",
                    request.central, request.characteristic
                );
            }
        }
    }

    fn respond(&self, token: RequestToken, code: AttErrorCode, value: Option<Bytes>) {
        if let Err(e) = self.adapter.respond(token, code, value) {
            warn!("Failed to answer request {:?}: {}", token, e);
        }
    }

    fn store_value(&self, service_id: Uuid, characteristic_id: Uuid, value: Bytes) {
        let mut services = self.services.write();
        if let Some(characteristic) = services
            .iter_mut()
            .find(|s| s.id == service_id)
            .and_then(|s| s.characteristic_mut(&characteristic_id))
        {
            characteristic.value = Some(value);
        }
    }

    fn resolve_local_name(&self, local_name: Option<&str>) -> String {
        if let Some(name) = local_name.filter(|n| !n.is_empty()) {
            return name.to_string();
        }

        let delegate = self.delegate.read().clone();
        delegate
            .and_then(|d| d.advertisement_local_name())
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| self.config.default_local_name.clone())
    }

    fn emit(&self, event: PeripheralEvent) {
        let _ = self.event_tx.send(event);
    }
}

impl Drop for PeripheralService {
    fn drop(&mut self) {
        if let Some(handle) = self.dispatch_handle.lock().take() {
            handle.abort();
        }
    }
}

impl std::fmt::Debug for PeripheralService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeripheralService")
            .field("identifier", &self.identifier)
            .field("is_advertising", &self.is_advertising())
            .field("services", &self.services.read().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ble::adapter::{DeviceHandle, MockPeripheralAdapter};
    use crate::ble::power::AdapterState;
    use crate::data::AttributeValue;
    use pretty_assertions::assert_eq;
    use tokio_test::{assert_err, assert_ok};

    const SERVICE: &str = "6e400001-b5a3-f393-e0a9-e50e24dcca9e";
    const CHARACTERISTIC: &str = "6e400002-b5a3-f393-e0a9-e50e24dcca9e";

    fn service_id() -> Uuid {
        Uuid::parse_str(SERVICE).unwrap()
    }

    fn characteristic_id() -> Uuid {
        Uuid::parse_str(CHARACTERISTIC).unwrap()
    }

    fn builder() -> PeripheralServiceBuilder {
        let mut builder = PeripheralServiceBuilder::new(SERVICE);
        assert!(builder.append_characteristic(CHARACTERISTIC));
        builder
    }

    fn peripheral(adapter: MockPeripheralAdapter) -> PeripheralService {
        PeripheralService::new(Arc::new(adapter), PeripheralConfig::default())
    }

    fn published(mut adapter: MockPeripheralAdapter) -> PeripheralService {
        adapter.expect_publish_service().returning(|_| Ok(()));
        let peripheral = peripheral(adapter);
        assert!(assert_ok!(peripheral.add_service(&builder())));
        peripheral
    }

    fn request(token: u64, characteristic: Uuid, value: Option<&'static [u8]>) -> AttRequest {
        AttRequest {
            token: RequestToken(token),
            central: ConnectedCentral::new(DeviceHandle::new("X")),
            characteristic,
            offset: 0,
            value: value.map(Bytes::from_static),
        }
    }

    /// Acknowledges every write by appending ":ack".
    struct Acknowledger {
        seen: Mutex<Vec<RequestData>>,
    }

    impl Acknowledger {
        fn new() -> Self {
            Self {
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    impl PeripheralDelegate for Acknowledger {
        fn advertisement_local_name(&self) -> Option<String> {
            Some("Acknowledger".to_string())
        }

        fn write_value_for(&self, _central: &ConnectedCentral, request: &WriteRequest) -> Option<Bytes> {
            let text = request.string_value()?;
            Some(Bytes::from(format!("{}:ack", text)))
        }

        fn read_value_for(&self, _central: &ConnectedCentral, _request: &ReadRequest) -> Option<Bytes> {
            Some(Bytes::from_static(b"served"))
        }

        fn response_code_for(&self, _central: &ConnectedCentral, request: &RequestData) -> ResponseCode {
            self.seen.lock().push(request.clone());
            if request.is_write() {
                ResponseCode::Success
            } else {
                ResponseCode::InsufficientAuthentication
            }
        }
    }

    #[test]
    fn test_write_request_stores_delegate_value() {
        let mut adapter = MockPeripheralAdapter::new();
        adapter.expect_start_advertising().returning(|_| Ok(()));
        adapter
            .expect_set_characteristic_value()
            .withf(|_, _, value| *value == Bytes::from_static(b"hello:ack"))
            .times(1)
            .returning(|_, _, _| Ok(()));
        adapter
            .expect_respond()
            .withf(|token, code, value| {
                *token == RequestToken(1) && *code == AttErrorCode::Success && value.is_none()
            })
            .times(1)
            .returning(|_, _, _| Ok(()));
        let peripheral = published(adapter);
        let delegate = Arc::new(Acknowledger::new());
        peripheral.set_delegate(delegate.clone());

        assert_ok!(peripheral.start_advertising(None));
        peripheral.handle_adapter_event(PeripheralAdapterEvent::WriteRequests(vec![request(
            1,
            characteristic_id(),
            Some(b"hello"),
        )]));

        assert_eq!(
            peripheral.value(service_id(), characteristic_id()),
            Some(Bytes::from_static(b"hello:ack"))
        );
        let seen = delegate.seen.lock();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].string_value().as_deref(), Some("hello"));
    }

    #[test]
    fn test_read_request_uses_delegate_answer() {
        let mut adapter = MockPeripheralAdapter::new();
        adapter
            .expect_respond()
            .withf(|token, code, value| {
                *token == RequestToken(2)
                    && *code == AttErrorCode::InsufficientAuthentication
                    && value.as_ref() == Some(&Bytes::from_static(b"served"))
            })
            .times(1)
            .returning(|_, _, _| Ok(()));
        let peripheral = published(adapter);
        peripheral.set_delegate(Arc::new(Acknowledger::new()));

        peripheral.handle_adapter_event(PeripheralAdapterEvent::ReadRequest(request(
            2,
            characteristic_id(),
            None,
        )));
    }

    #[test]
    fn test_requests_without_delegate_succeed() {
        let mut adapter = MockPeripheralAdapter::new();
        adapter
            .expect_respond()
            .withf(|_, code, value| *code == AttErrorCode::Success && value.is_none())
            .times(2)
            .returning(|_, _, _| Ok(()));
        let peripheral = published(adapter);

        peripheral.handle_adapter_event(PeripheralAdapterEvent::WriteRequests(vec![request(
            1,
            characteristic_id(),
            Some(b"x"),
        )]));
        peripheral.handle_adapter_event(PeripheralAdapterEvent::ReadRequest(request(
            2,
            characteristic_id(),
            None,
        )));
        assert_eq!(peripheral.value(service_id(), characteristic_id()), None);
    }

    #[test]
    fn test_unresolved_request_answers_not_found() {
        let mut adapter = MockPeripheralAdapter::new();
        adapter
            .expect_respond()
            .withf(|_, code, _| *code == AttErrorCode::AttributeNotFound)
            .times(1)
            .returning(|_, _, _| Ok(()));
        let peripheral = published(adapter);

        peripheral.handle_adapter_event(PeripheralAdapterEvent::ReadRequest(request(
            3,
            Uuid::new_v4(),
            None,
        )));
    }

    #[test]
    fn test_unresolved_request_can_be_ignored() {
        let mut adapter = MockPeripheralAdapter::new();
        adapter.expect_publish_service().returning(|_| Ok(()));
        adapter.expect_respond().times(0);
        let peripheral = PeripheralService::new(
            Arc::new(adapter),
            PeripheralConfig::default().with_unresolved_requests(UnresolvedRequestPolicy::Ignore),
        );
        assert_ok!(peripheral.add_service(&builder()));

        peripheral.handle_adapter_event(PeripheralAdapterEvent::WriteRequests(vec![request(
            4,
            Uuid::new_v4(),
            Some(b"x"),
        )]));
    }

    #[test]
    fn test_advertising_without_service_fails() {
        let mut adapter = MockPeripheralAdapter::new();
        adapter.expect_publish_service().times(0);
        let peripheral = peripheral(adapter);

        let mut builder = PeripheralServiceBuilder::new("");
        assert!(!builder.append_characteristic(CHARACTERISTIC));
        assert!(!assert_ok!(peripheral.add_service(&builder)));

        let err = assert_err!(peripheral.start_advertising(Some("Name")));
        assert!(matches!(err, Error::AdvertisementServiceIdNotAdded));
        assert!(!peripheral.is_advertising());
    }

    #[test]
    fn test_start_advertising_twice_fails() {
        let mut adapter = MockPeripheralAdapter::new();
        adapter
            .expect_start_advertising()
            .withf(|data| {
                data.local_name == PeripheralConfig::DEFAULT_LOCAL_NAME
                    && data.service_uuids == vec![service_id()]
            })
            .times(1)
            .returning(|_| Ok(()));
        adapter.expect_stop_advertising().times(1).returning(|| Ok(()));
        let peripheral = published(adapter);

        assert_ok!(peripheral.start_advertising(Some("")));
        assert!(matches!(
            peripheral.start_advertising(None),
            Err(Error::AlreadyAdvertised)
        ));

        assert_ok!(peripheral.stop_advertising());
        assert_ok!(peripheral.stop_advertising());
        assert!(!peripheral.is_advertising());
    }

    #[test]
    fn test_local_name_precedence() {
        let mut adapter = MockPeripheralAdapter::new();
        adapter.expect_stop_advertising().returning(|| Ok(()));
        let mut seq = mockall::Sequence::new();
        adapter
            .expect_start_advertising()
            .withf(|data| data.local_name == "Explicit")
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(()));
        adapter
            .expect_start_advertising()
            .withf(|data| data.local_name == "Acknowledger")
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(()));
        let peripheral = published(adapter);
        peripheral.set_delegate(Arc::new(Acknowledger::new()));

        assert_ok!(peripheral.start_advertising(Some("Explicit")));
        assert_ok!(peripheral.stop_advertising());
        assert_ok!(peripheral.start_advertising(None));
    }

    #[test]
    fn test_advertising_failure_clears_flag() {
        let mut adapter = MockPeripheralAdapter::new();
        adapter.expect_start_advertising().returning(|_| Ok(()));
        let peripheral = published(adapter);
        let mut rx = peripheral.subscribe();

        assert_ok!(peripheral.start_advertising(None));
        peripheral.handle_adapter_event(PeripheralAdapterEvent::AdvertisingStarted {
            error: Some(AdapterError::new("too large")),
        });

        assert!(!peripheral.is_advertising());
        assert_eq!(
            rx.try_recv().unwrap(),
            PeripheralEvent::AdvertisingStarted {
                error: Some(AdapterError::new("too large")),
            }
        );
    }

    #[test]
    fn test_power_off_stops_advertising() {
        let mut adapter = MockPeripheralAdapter::new();
        adapter.expect_start_advertising().returning(|_| Ok(()));
        let peripheral = published(adapter);

        assert_ok!(peripheral.start_advertising(None));
        peripheral.handle_adapter_event(PeripheralAdapterEvent::StateChanged(
            AdapterState::Unauthorized,
        ));

        assert!(!peripheral.is_advertising());
        assert_eq!(
            peripheral.bluetooth_state(),
            Some(BluetoothState::Unauthorized)
        );
    }

    #[test]
    fn test_clear_services() {
        let mut adapter = MockPeripheralAdapter::new();
        adapter.expect_unpublish_all().times(1).returning(|| Ok(()));
        let peripheral = published(adapter);
        assert_ok!(peripheral.add_service(&builder()));
        assert_eq!(peripheral.services().len(), 2);

        assert_ok!(peripheral.clear_services());
        assert!(peripheral.services().is_empty());
        assert!(matches!(
            peripheral.start_advertising(None),
            Err(Error::AdvertisementServiceIdNotAdded)
        ));
    }

    #[test]
    fn test_set_value() {
        let mut adapter = MockPeripheralAdapter::new();
        adapter
            .expect_set_characteristic_value()
            .times(1)
            .returning(|_, _, _| Ok(()));
        let peripheral = published(adapter);

        assert!(assert_ok!(peripheral.set_value(
            service_id(),
            characteristic_id(),
            Bytes::from_static(b"42")
        )));
        assert!(!assert_ok!(peripheral.set_value(
            service_id(),
            Uuid::new_v4(),
            Bytes::from_static(b"42")
        )));
        assert_eq!(
            peripheral.value(service_id(), characteristic_id()),
            Some(Bytes::from_static(b"42"))
        );
    }

    #[test]
    fn test_subscriptions_are_forwarded() {
        let peripheral = published(MockPeripheralAdapter::new());
        let mut rx = peripheral.subscribe();
        let central = ConnectedCentral::new(DeviceHandle::new("X"));

        peripheral.handle_adapter_event(PeripheralAdapterEvent::Subscribed {
            central: central.clone(),
            characteristic: characteristic_id(),
        });
        peripheral.handle_adapter_event(PeripheralAdapterEvent::Unsubscribed {
            central: central.clone(),
            characteristic: characteristic_id(),
        });

        assert_eq!(
            rx.try_recv().unwrap(),
            PeripheralEvent::Subscribed {
                central: central.clone(),
                characteristic_id: characteristic_id(),
            }
        );
        assert_eq!(
            rx.try_recv().unwrap(),
            PeripheralEvent::Unsubscribed {
                central,
                characteristic_id: characteristic_id(),
            }
        );
    }
}
