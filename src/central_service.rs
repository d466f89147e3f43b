//! The Central role: scanning and connection management.
//!
//! [`CentralService`] owns the scan lifecycle and the table of remote
//! peripherals it has connected to. Adapter callbacks are fed in as
//! [`CentralAdapterEvent`]s, either through [`CentralService::start_dispatch`]
//! or by calling [`CentralService::handle_adapter_event`] directly, and come
//! out as [`CentralEvent`]s and [`SessionEvent`](crate::SessionEvent)s.

use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use crate::ble::adapter::{AdapterError, CentralAdapter, CentralAdapterEvent, DeviceHandle};
use crate::ble::connection::{ConnectOptions, ConnectionState};
use crate::ble::power::BluetoothState;
use crate::callback::{spawn_listener, CallbackHandle};
use crate::config::CentralConfig;
use crate::connected_peripheral::ConnectedPeripheral;
use crate::data::DiscoveryRecord;
use crate::error::{Error, Result};

/// Notification from the Central role.
#[derive(Debug, Clone, PartialEq)]
pub enum CentralEvent {
    /// The radio power state changed.
    PowerStateChanged(BluetoothState),
    /// An advertisement was received.
    PeripheralDiscovered {
        /// What was observed.
        record: DiscoveryRecord,
        /// Whether the advertisement accepts connections.
        connectable: bool,
    },
    /// A connection attempt finished.
    PeripheralConnected {
        /// The peripheral.
        peripheral_id: DeviceHandle,
        /// Set when the attempt failed.
        error: Option<AdapterError>,
    },
    /// A connection went down.
    PeripheralDisconnected {
        /// The peripheral.
        peripheral_id: DeviceHandle,
        /// Set when the link was lost rather than closed.
        error: Option<AdapterError>,
    },
}

/// Policy questions asked while scanning.
///
/// Both are asked from the dispatch context for every discovered
/// advertisement, `should_connect` first. Implementations must return
/// promptly.
pub trait CentralDelegate: Send + Sync {
    /// Whether to connect to the peripheral right away.
    fn should_connect(&self, _record: &DiscoveryRecord) -> bool {
        false
    }

    /// Whether to stop scanning now.
    fn should_stop_scanning(&self) -> bool {
        false
    }
}

/// Central role orchestrator.
pub struct CentralService {
    /// Unique identifier of this instance.
    identifier: Uuid,
    /// Adapter commands are issued through.
    adapter: Arc<dyn CentralAdapter>,
    /// Configuration.
    config: CentralConfig,
    /// Whether a scan is running.
    is_scanning: RwLock<bool>,
    /// Last reported power state.
    bluetooth_state: RwLock<Option<BluetoothState>>,
    /// Connection table.
    sessions: RwLock<HashMap<DeviceHandle, Arc<ConnectedPeripheral>>>,
    /// Application policy.
    delegate: RwLock<Option<Arc<dyn CentralDelegate>>>,
    /// Central event channel.
    event_tx: broadcast::Sender<CentralEvent>,
    /// Callback ID counter.
    callback_counter: AtomicU64,
    /// Dispatch task handle.
    dispatch_handle: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl CentralService {
    /// Create a new central orchestrator over an adapter.
    pub fn new(adapter: Arc<dyn CentralAdapter>, config: CentralConfig) -> Self {
        let (event_tx, _) = broadcast::channel(config.event_capacity.max(1));

        Self {
            identifier: Uuid::new_v4(),
            adapter,
            config,
            is_scanning: RwLock::new(false),
            bluetooth_state: RwLock::new(None),
            sessions: RwLock::new(HashMap::new()),
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
    pub fn config(&self) -> &CentralConfig {
        &self.config
    }

    /// Set the application policy delegate.
    pub fn set_delegate(&self, delegate: Arc<dyn CentralDelegate>) {
        *self.delegate.write() = Some(delegate);
    }

    /// Remove the application policy delegate.
    pub fn clear_delegate(&self) {
        *self.delegate.write() = None;
    }

    /// Get the last power state reported by the adapter.
    pub fn bluetooth_state(&self) -> Option<BluetoothState> {
        *self.bluetooth_state.read()
    }

    // === Scanning ===

    /// Start scanning.
    ///
    /// # Arguments
    ///
    /// * `service_filter` - Only report peripherals advertising this service.
    ///   `None` reports every advertisement.
    /// * `allow_duplicates` - Report every advertisement instead of only the
    ///   first per device.
    ///
    /// # Errors
    ///
    /// [`Error::AlreadyScanning`] if a scan is running.
    pub fn start_scan(&self, service_filter: Option<Uuid>, allow_duplicates: bool) -> Result<()> {
        {
            let mut scanning = self.is_scanning.write();
            if *scanning {
                return Err(Error::AlreadyScanning);
            }
            *scanning = true;
        }

        let services: Vec<Uuid> = service_filter.into_iter().collect();
        if let Err(e) = self.adapter.start_scan(services, allow_duplicates) {
            warn!("Adapter refused to start scanning: {}", e);
            *self.is_scanning.write() = false;
            return Err(e.into());
        }

        match service_filter {
            Some(service) => info!("Started scanning for service {}", service),
            None => info!("Started scanning for all peripherals"),
        }

        Ok(())
    }

    /// Stop scanning. Does nothing if not scanning.
    pub fn stop_scan(&self) -> Result<()> {
        if !self.is_scanning() {
            debug!("Not scanning");
            return Ok(());
        }

        self.adapter.stop_scan()?;
        *self.is_scanning.write() = false;
        info!("Stopped scanning");

        Ok(())
    }

    /// Check if scanning.
    pub fn is_scanning(&self) -> bool {
        *self.is_scanning.read()
    }

    // === Connections ===

    /// Connect to a discovered peripheral.
    ///
    /// Returns the session in the `Connecting` state; the outcome arrives as
    /// [`CentralEvent::PeripheralConnected`]. A disconnected session for the
    /// same device is reused.
    ///
    /// # Errors
    ///
    /// - [`Error::IncompleteDiscoveryRecord`] if the record lacks RSSI or discovery time
    /// - [`Error::AlreadyConnected`] if the device is connected or connecting
    /// - [`Error::Adapter`] if the adapter refused the command
    pub fn connect(&self, record: &DiscoveryRecord) -> Result<Arc<ConnectedPeripheral>> {
        if !record.is_connectable_record() {
            return Err(Error::IncompleteDiscoveryRecord);
        }

        let handle = record.handle().clone();
        let (session, previous) = {
            let mut sessions = self.sessions.write();
            match sessions.get(&handle) {
                Some(existing) => {
                    let previous = existing.begin_connect(Some(record.clone()))?;
                    (existing.clone(), Some(previous))
                }
                None => {
                    let session = Arc::new(ConnectedPeripheral::new(
                        record.clone(),
                        self.adapter.clone(),
                        self.config.session_event_capacity,
                    ));
                    session.begin_connect(None)?;
                    sessions.insert(handle, session.clone());
                    (session, None)
                }
            }
        };

        self.issue_connect(&session, previous)?;
        Ok(session)
    }

    /// Connect an existing session again.
    ///
    /// The session takes over the device's table entry unless another
    /// session for the same device still holds a link.
    ///
    /// # Errors
    ///
    /// Same as [`CentralService::connect`].
    pub fn reconnect(&self, session: &Arc<ConnectedPeripheral>) -> Result<()> {
        if !session.discovery_record().is_connectable_record() {
            return Err(Error::IncompleteDiscoveryRecord);
        }

        let previous = {
            let mut sessions = self.sessions.write();
            if let Some(existing) = sessions.get(session.handle()) {
                if !Arc::ptr_eq(existing, session)
                    && existing.connection_state() != ConnectionState::Disconnected
                {
                    return Err(Error::AlreadyConnected);
                }
            }
            let previous = session.begin_connect(None)?;
            sessions.insert(session.handle().clone(), session.clone());
            previous
        };

        self.issue_connect(session, Some(previous))
    }

    /// Disconnect a session.
    ///
    /// Returns `Ok(false)` if the session is already disconnecting or
    /// disconnected. The final state arrives as
    /// [`CentralEvent::PeripheralDisconnected`].
    pub fn disconnect(&self, session: &ConnectedPeripheral) -> Result<bool> {
        let Some(previous) = session.begin_disconnect() else {
            debug!("{} already disconnecting or disconnected", session.handle());
            return Ok(false);
        };

        if let Err(e) = self.adapter.cancel_connection(session.handle()) {
            warn!("Adapter refused to disconnect {}: {}", session.handle(), e);
            session.set_state(previous);
            return Err(e.into());
        }

        info!("Disconnecting from {}", session.handle());
        Ok(true)
    }

    /// Get a session by peripheral identifier.
    pub fn session(&self, peripheral_id: &str) -> Option<Arc<ConnectedPeripheral>> {
        self.sessions
            .read()
            .get(&DeviceHandle::new(peripheral_id))
            .cloned()
    }

    /// Get all sessions.
    pub fn sessions(&self) -> Vec<Arc<ConnectedPeripheral>> {
        self.sessions.read().values().cloned().collect()
    }

    /// Get the number of sessions in the connection table.
    pub fn session_count(&self) -> usize {
        self.sessions.read().len()
    }

    /// Remove a disconnected session from the connection table.
    ///
    /// Returns `Ok(None)` if there is no such session.
    ///
    /// # Errors
    ///
    /// [`Error::SessionBusy`] if the session is not disconnected.
    pub fn remove_session(&self, peripheral_id: &str) -> Result<Option<Arc<ConnectedPeripheral>>> {
        let handle = DeviceHandle::new(peripheral_id);
        let mut sessions = self.sessions.write();

        let Some(session) = sessions.get(&handle) else {
            return Ok(None);
        };

        let state = session.connection_state();
        if state != ConnectionState::Disconnected {
            return Err(Error::SessionBusy {
                identifier: peripheral_id.to_string(),
                state,
            });
        }

        debug!("Removing session {}", handle);
        Ok(sessions.remove(&handle))
    }

    // === Notifications ===

    /// Subscribe to central events.
    pub fn subscribe(&self) -> broadcast::Receiver<CentralEvent> {
        self.event_tx.subscribe()
    }

    /// Register a callback for central events.
    ///
    /// Must be called from within a tokio runtime.
    pub fn on_event<F>(&self, callback: F) -> CallbackHandle
    where
        F: Fn(CentralEvent) + Send + Sync + 'static,
    {
        let callback_id = self.callback_counter.fetch_add(1, Ordering::SeqCst);
        spawn_listener(callback_id, self.event_tx.subscribe(), callback)
    }

    // === Adapter events ===

    /// Process one event from the adapter.
    ///
    /// Events must be fed in the order the adapter produced them, one at a time.
    pub fn handle_adapter_event(&self, event: CentralAdapterEvent) {
        match event {
            CentralAdapterEvent::StateChanged(state) => {
                let state = BluetoothState::from(state);
                *self.bluetooth_state.write() = Some(state);
                if !state.is_powered_on() {
                    *self.is_scanning.write() = false;
                }
                info!("Bluetooth state: {}", state);
                self.emit(CentralEvent::PowerStateChanged(state));
            }
            CentralAdapterEvent::Discovered(advertisement) => {
                let record = DiscoveryRecord::from(&advertisement);
                trace!(
                    "Discovered {} ({:?}) rssi {:?}",
                    record.handle(),
                    record.advertisement_name,
                    record.rssi
                );
                self.emit(CentralEvent::PeripheralDiscovered {
                    record: record.clone(),
                    connectable: advertisement.connectable,
                });
                self.consult_delegate(&record);
            }
            CentralAdapterEvent::Connected { device } => {
                let Some(session) = self.lookup(&device) else {
                    return;
                };
                if session.connection_state() != ConnectionState::Connecting {
                    debug!(
                        "Ignoring connect of {} in state {}",
                        device,
                        session.connection_state()
                    );
                    return;
                }
                session.set_state(ConnectionState::Connected);
                info!("Connected to {}", device);
                self.emit(CentralEvent::PeripheralConnected {
                    peripheral_id: device,
                    error: None,
                });
            }
            CentralAdapterEvent::ConnectFailed { device, error } => {
                let Some(session) = self.lookup(&device) else {
                    return;
                };
                session.set_state(ConnectionState::Disconnected);
                warn!("Failed to connect to {}: {}", device, error);
                self.emit(CentralEvent::PeripheralConnected {
                    peripheral_id: device,
                    error: Some(error),
                });
            }
            CentralAdapterEvent::Disconnected { device, error } => {
                let Some(session) = self.lookup(&device) else {
                    return;
                };
                if session.connection_state() == ConnectionState::Disconnected {
                    debug!("{} already disconnected", device);
                    return;
                }
                session.set_state(ConnectionState::Disconnected);
                match &error {
                    Some(e) => info!("Lost connection to {}: {}", device, e),
                    None => info!("Disconnected from {}", device),
                }
                self.emit(CentralEvent::PeripheralDisconnected {
                    peripheral_id: device,
                    error,
                });
            }
            CentralAdapterEvent::ServicesDiscovered {
                device,
                services,
                error,
            } => {
                if let Some(session) = self.lookup(&device) {
                    session.handle_services_discovered(services, error);
                }
            }
            CentralAdapterEvent::CharacteristicsDiscovered {
                device,
                service,
                characteristics,
                error,
            } => {
                if let Some(session) = self.lookup(&device) {
                    session.handle_characteristics_discovered(service, characteristics, error);
                }
            }
            CentralAdapterEvent::ValueUpdated {
                device,
                service,
                characteristic,
                value,
                error,
            } => {
                if let Some(session) = self.lookup(&device) {
                    session.handle_value_updated(service, characteristic, value, error);
                }
            }
            CentralAdapterEvent::ValueWritten {
                device,
                service,
                characteristic,
                error,
            } => {
                if let Some(session) = self.lookup(&device) {
                    session.handle_value_written(service, characteristic, error);
                }
            }
        }
    }

    /// Spawn the dispatch task feeding adapter events into this orchestrator.
    ///
    /// Replaces a previously started dispatch task. Must be called from within
    /// a tokio runtime.
    pub fn start_dispatch(self: &Arc<Self>, mut events: mpsc::UnboundedReceiver<CentralAdapterEvent>) {
        let service = Arc::downgrade(self);

        let handle = tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                let Some(service) = service.upgrade() else {
                    break;
                };
                service.handle_adapter_event(event);
            }
            debug!("Central dispatch task ended");
        });

        if let Some(previous) = self.dispatch_handle.lock().replace(handle) {
            previous.abort();
        }
    }

    /// Stop scanning, cancel active connections and stop the dispatch task.
    pub fn shutdown(&self) -> Result<()> {
        info!("Shutting down central {}", self.identifier);

        self.stop_scan()?;

        for session in self.sessions() {
            if let Err(e) = self.disconnect(&session) {
                warn!("Error disconnecting {}: {}", session.handle(), e);
            }
        }

        if let Some(handle) = self.dispatch_handle.lock().take() {
            handle.abort();
        }

        Ok(())
    }

    // === Internal ===

    fn issue_connect(
        &self,
        session: &Arc<ConnectedPeripheral>,
        previous: Option<ConnectionState>,
    ) -> Result<()> {
        let handle = session.handle();

        if let Err(e) = self.adapter.connect(handle, ConnectOptions::default()) {
            warn!("Adapter refused to connect {}: {}", handle, e);
            match previous {
                Some(state) => {
                    session.set_state(state);
                }
                None => {
                    self.sessions.write().remove(handle);
                    session.set_state(ConnectionState::Disconnected);
                }
            }
            return Err(e.into());
        }

        info!("Connecting to {}", handle);
        Ok(())
    }

    fn consult_delegate(&self, record: &DiscoveryRecord) {
        let Some(delegate) = self.delegate.read().clone() else {
            return;
        };

        if delegate.should_connect(record) {
            if let Err(e) = self.connect(record) {
                debug!("Auto-connect to {} skipped: {}", record.handle(), e);
            }
        }

        if delegate.should_stop_scanning() {
            if let Err(e) = self.stop_scan() {
                warn!("Failed to stop scanning: {}", e);
            }
        }
    }

    fn lookup(&self, device: &DeviceHandle) -> Option<Arc<ConnectedPeripheral>> {
        let session = self.sessions.read().get(device).cloned();
        if session.is_none() {
            warn!("Dropping event for unknown peripheral {}", device);
        }
        session
    }

    fn emit(&self, event: CentralEvent) {
        let _ = self.event_tx.send(event);
    }
}

impl Drop for CentralService {
    fn drop(&mut self) {
        if let Some(handle) = self.dispatch_handle.lock().take() {
            handle.abort();
        }
    }
}

impl std::fmt::Debug for CentralService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CentralService")
            .field("identifier", &self.identifier)
            .field("is_scanning", &self.is_scanning())
            .field("sessions", &self.session_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ble::adapter::{Advertisement, MockCentralAdapter};
    use crate::ble::power::AdapterState;
    use crate::ble::uuids::from_short;
    use crate::connected_peripheral::SessionEvent;
    use chrono::Utc;
    use pretty_assertions::assert_eq;
    use tokio_test::{assert_err, assert_ok};

    fn central(adapter: MockCentralAdapter) -> CentralService {
        CentralService::new(Arc::new(adapter), CentralConfig::default())
    }

    fn record(id: &str) -> DiscoveryRecord {
        let mut record = DiscoveryRecord::new(DeviceHandle::new(id));
        record.rssi = Some(-50);
        record.discovery_time = Some(Utc::now());
        record
    }

    fn advertisement(id: &str, rssi: i16) -> Advertisement {
        Advertisement {
            device: DeviceHandle::new(id),
            local_name: Some("Sensor".to_string()),
            device_name: None,
            connectable: true,
            rssi: Some(rssi),
            timestamp: Some(Utc::now()),
        }
    }

    fn expect_connects(adapter: &mut MockCentralAdapter, times: usize) {
        adapter
            .expect_connect()
            .withf(|_, options| *options == ConnectOptions::default())
            .times(times)
            .returning(|_, _| Ok(()));
    }

    #[test]
    fn test_start_scan_twice_fails() {
        let mut adapter = MockCentralAdapter::new();
        adapter
            .expect_start_scan()
            .times(1)
            .returning(|_, _| Ok(()));
        let central = central(adapter);

        assert_ok!(central.start_scan(None, false));
        assert!(matches!(
            central.start_scan(None, true),
            Err(Error::AlreadyScanning)
        ));
        assert!(central.is_scanning());
    }

    #[test]
    fn test_stop_scan_is_idempotent() {
        let mut adapter = MockCentralAdapter::new();
        adapter.expect_start_scan().returning(|_, _| Ok(()));
        adapter.expect_stop_scan().times(1).returning(|| Ok(()));
        let central = central(adapter);

        assert_ok!(central.stop_scan());
        assert_ok!(central.start_scan(None, false));
        assert_ok!(central.stop_scan());
        assert_ok!(central.stop_scan());
        assert!(!central.is_scanning());
    }

    #[test]
    fn test_refused_scan_rolls_back() {
        let mut adapter = MockCentralAdapter::new();
        adapter
            .expect_start_scan()
            .returning(|_, _| Err(AdapterError::new("radio off")));
        let central = central(adapter);

        let err = assert_err!(central.start_scan(None, false));
        assert!(matches!(err, Error::Adapter(_)));
        assert!(!central.is_scanning());
    }

    #[test]
    fn test_scan_discover_connect() {
        let filter = from_short(0xFFF0);
        let mut adapter = MockCentralAdapter::new();
        adapter
            .expect_start_scan()
            .withf(move |services, allow_duplicates| {
                services == &vec![filter] && !*allow_duplicates
            })
            .times(1)
            .returning(|_, _| Ok(()));
        expect_connects(&mut adapter, 1);
        let central = central(adapter);
        let mut rx = central.subscribe();

        assert_ok!(central.start_scan(Some(filter), false));
        central.handle_adapter_event(CentralAdapterEvent::Discovered(advertisement("H1", -40)));

        let record = match rx.try_recv().unwrap() {
            CentralEvent::PeripheralDiscovered {
                record,
                connectable,
            } => {
                assert!(connectable);
                record
            }
            other => panic!("unexpected event {:?}", other),
        };
        assert_eq!(record.rssi, Some(-40));
        assert_eq!(record.peripheral_id(), "H1");

        let session = assert_ok!(central.connect(&record));
        assert_eq!(session.connection_state(), ConnectionState::Connecting);

        central.handle_adapter_event(CentralAdapterEvent::Connected {
            device: DeviceHandle::new("H1"),
        });
        assert_eq!(session.connection_state(), ConnectionState::Connected);
        assert_eq!(
            rx.try_recv().unwrap(),
            CentralEvent::PeripheralConnected {
                peripheral_id: DeviceHandle::new("H1"),
                error: None,
            }
        );
    }

    #[test]
    fn test_connect_guard_issues_single_command() {
        let mut adapter = MockCentralAdapter::new();
        expect_connects(&mut adapter, 1);
        let central = central(adapter);

        let session = assert_ok!(central.connect(&record("H1")));
        assert!(matches!(
            central.connect(&record("h1")),
            Err(Error::AlreadyConnected)
        ));
        assert!(matches!(
            central.reconnect(&session),
            Err(Error::AlreadyConnected)
        ));

        central.handle_adapter_event(CentralAdapterEvent::Connected {
            device: DeviceHandle::new("H1"),
        });
        assert!(matches!(
            central.connect(&record("H1")),
            Err(Error::AlreadyConnected)
        ));
        assert_eq!(central.session_count(), 1);
    }

    #[test]
    fn test_incomplete_record_is_rejected() {
        let central = central(MockCentralAdapter::new());

        let mut incomplete = record("H1");
        incomplete.discovery_time = None;
        assert!(matches!(
            central.connect(&incomplete),
            Err(Error::IncompleteDiscoveryRecord)
        ));
        assert_eq!(central.session_count(), 0);
    }

    #[test]
    fn test_refused_connect_removes_session() {
        let mut adapter = MockCentralAdapter::new();
        adapter
            .expect_connect()
            .returning(|_, _| Err(AdapterError::new("busy")));
        let central = central(adapter);

        assert!(matches!(
            central.connect(&record("H1")),
            Err(Error::Adapter(_))
        ));
        assert!(central.session("H1").is_none());
    }

    #[test]
    fn test_connect_failure_notifies() {
        let mut adapter = MockCentralAdapter::new();
        expect_connects(&mut adapter, 1);
        let central = central(adapter);
        let mut rx = central.subscribe();

        let session = assert_ok!(central.connect(&record("H1")));
        central.handle_adapter_event(CentralAdapterEvent::ConnectFailed {
            device: DeviceHandle::new("H1"),
            error: AdapterError::new("timeout"),
        });

        assert_eq!(session.connection_state(), ConnectionState::Disconnected);
        assert_eq!(
            rx.try_recv().unwrap(),
            CentralEvent::PeripheralConnected {
                peripheral_id: DeviceHandle::new("H1"),
                error: Some(AdapterError::new("timeout")),
            }
        );
    }

    #[test]
    fn test_disconnect_and_remove() {
        let mut adapter = MockCentralAdapter::new();
        expect_connects(&mut adapter, 1);
        adapter
            .expect_cancel_connection()
            .times(1)
            .returning(|_| Ok(()));
        let central = central(adapter);
        let mut rx = central.subscribe();

        let session = assert_ok!(central.connect(&record("H1")));
        central.handle_adapter_event(CentralAdapterEvent::Connected {
            device: DeviceHandle::new("H1"),
        });

        assert!(assert_ok!(central.disconnect(&session)));
        assert!(!assert_ok!(central.disconnect(&session)));
        assert!(matches!(
            central.remove_session("H1"),
            Err(Error::SessionBusy {
                state: ConnectionState::Disconnecting,
                ..
            })
        ));

        central.handle_adapter_event(CentralAdapterEvent::Disconnected {
            device: DeviceHandle::new("H1"),
            error: None,
        });
        central.handle_adapter_event(CentralAdapterEvent::Disconnected {
            device: DeviceHandle::new("H1"),
            error: None,
        });
        assert_eq!(session.connection_state(), ConnectionState::Disconnected);

        let events: Vec<_> = std::iter::from_fn(|| rx.try_recv().ok()).collect();
        assert_eq!(
            events
                .iter()
                .filter(|e| matches!(e, CentralEvent::PeripheralDisconnected { .. }))
                .count(),
            1
        );

        let removed = assert_ok!(central.remove_session("H1"));
        assert!(removed.is_some());
        assert_eq!(central.session_count(), 0);
    }

    #[test]
    fn test_link_loss_then_reconnect_reuses_session() {
        let mut adapter = MockCentralAdapter::new();
        expect_connects(&mut adapter, 2);
        let central = central(adapter);

        let session = assert_ok!(central.connect(&record("H1")));
        central.handle_adapter_event(CentralAdapterEvent::Connected {
            device: DeviceHandle::new("H1"),
        });
        session.handle_services_discovered(vec![from_short(0x180F)], None);

        central.handle_adapter_event(CentralAdapterEvent::Disconnected {
            device: DeviceHandle::new("H1"),
            error: Some(AdapterError::new("link lost")),
        });
        assert_eq!(session.connection_state(), ConnectionState::Disconnected);

        assert_ok!(central.reconnect(&session));
        assert_eq!(session.connection_state(), ConnectionState::Connecting);
        assert!(matches!(
            session.list_services(),
            Err(Error::NotFetchedServices)
        ));
        assert!(Arc::ptr_eq(&session, &central.session("H1").unwrap()));
    }

    #[test]
    fn test_reconnect_stale_session_refused_while_replacement_active() {
        let mut adapter = MockCentralAdapter::new();
        expect_connects(&mut adapter, 2);
        let central = central(adapter);

        let stale = assert_ok!(central.connect(&record("H1")));
        central.handle_adapter_event(CentralAdapterEvent::ConnectFailed {
            device: DeviceHandle::new("H1"),
            error: AdapterError::new("timeout"),
        });
        assert_ok!(central.remove_session("H1"));

        let fresh = assert_ok!(central.connect(&record("H1")));
        assert_eq!(fresh.connection_state(), ConnectionState::Connecting);

        assert!(matches!(
            central.reconnect(&stale),
            Err(Error::AlreadyConnected)
        ));
        assert_eq!(stale.connection_state(), ConnectionState::Disconnected);
        assert!(Arc::ptr_eq(&fresh, &central.session("H1").unwrap()));
    }

    #[test]
    fn test_reconnect_stale_session_replaces_disconnected_entry() {
        let mut adapter = MockCentralAdapter::new();
        expect_connects(&mut adapter, 3);
        let central = central(adapter);

        let stale = assert_ok!(central.connect(&record("H1")));
        central.handle_adapter_event(CentralAdapterEvent::ConnectFailed {
            device: DeviceHandle::new("H1"),
            error: AdapterError::new("timeout"),
        });
        assert_ok!(central.remove_session("H1"));

        let fresh = assert_ok!(central.connect(&record("H1")));
        central.handle_adapter_event(CentralAdapterEvent::ConnectFailed {
            device: DeviceHandle::new("H1"),
            error: AdapterError::new("timeout"),
        });

        assert_ok!(central.reconnect(&stale));
        assert_eq!(stale.connection_state(), ConnectionState::Connecting);
        assert_eq!(fresh.connection_state(), ConnectionState::Disconnected);
        assert!(Arc::ptr_eq(&stale, &central.session("H1").unwrap()));
        assert_eq!(central.session_count(), 1);
    }

    #[test]
    fn test_power_off_stops_scanning() {
        let mut adapter = MockCentralAdapter::new();
        adapter.expect_start_scan().returning(|_, _| Ok(()));
        let central = central(adapter);
        let mut rx = central.subscribe();

        assert_ok!(central.start_scan(None, false));
        central.handle_adapter_event(CentralAdapterEvent::StateChanged(AdapterState::PoweredOff));
        central.handle_adapter_event(CentralAdapterEvent::StateChanged(AdapterState::Unknown));

        assert!(!central.is_scanning());
        assert_eq!(central.bluetooth_state(), Some(BluetoothState::ServiceError));
        assert_eq!(
            rx.try_recv().unwrap(),
            CentralEvent::PowerStateChanged(BluetoothState::PoweredOff)
        );
        assert_eq!(
            rx.try_recv().unwrap(),
            CentralEvent::PowerStateChanged(BluetoothState::ServiceError)
        );
    }

    struct ConnectFirst;

    impl CentralDelegate for ConnectFirst {
        fn should_connect(&self, record: &DiscoveryRecord) -> bool {
            record.rssi.map_or(false, |rssi| rssi > -60)
        }

        fn should_stop_scanning(&self) -> bool {
            true
        }
    }

    #[test]
    fn test_delegate_auto_connects_and_stops() {
        let mut adapter = MockCentralAdapter::new();
        adapter.expect_start_scan().returning(|_, _| Ok(()));
        adapter.expect_stop_scan().times(1).returning(|| Ok(()));
        expect_connects(&mut adapter, 1);
        let central = central(adapter);
        central.set_delegate(Arc::new(ConnectFirst));

        assert_ok!(central.start_scan(None, false));
        central.handle_adapter_event(CentralAdapterEvent::Discovered(advertisement("H1", -40)));

        assert!(!central.is_scanning());
        let session = central.session("H1").unwrap();
        assert_eq!(session.connection_state(), ConnectionState::Connecting);
    }

    #[test]
    fn test_default_delegate_never_connects() {
        struct Passive;
        impl CentralDelegate for Passive {}

        let central = central(MockCentralAdapter::new());
        central.set_delegate(Arc::new(Passive));
        central.handle_adapter_event(CentralAdapterEvent::Discovered(advertisement("H1", -40)));

        assert_eq!(central.session_count(), 0);
    }

    #[test]
    fn test_gatt_events_reach_session() {
        let mut adapter = MockCentralAdapter::new();
        expect_connects(&mut adapter, 1);
        let central = central(adapter);

        let session = assert_ok!(central.connect(&record("H1")));
        let mut rx = session.subscribe();

        central.handle_adapter_event(CentralAdapterEvent::ServicesDiscovered {
            device: DeviceHandle::new("h1"),
            services: vec![from_short(0x180A)],
            error: None,
        });

        assert_eq!(assert_ok!(session.list_services()), vec![from_short(0x180A)]);
        assert!(matches!(
            rx.try_recv().unwrap(),
            SessionEvent::ServicesDiscovered { .. }
        ));
    }

    #[test]
    fn test_unknown_device_events_are_dropped() {
        let central = central(MockCentralAdapter::new());
        central.handle_adapter_event(CentralAdapterEvent::Connected {
            device: DeviceHandle::new("nobody"),
        });
        assert_eq!(central.session_count(), 0);
    }
}
