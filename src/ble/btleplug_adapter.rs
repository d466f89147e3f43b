//! [`CentralAdapter`] implementation over btleplug.
//!
//! Every command is issued on the tokio runtime the adapter was created on;
//! its outcome comes back as a [`CentralAdapterEvent`] on the receiver
//! returned by the constructor. Feed that receiver to
//! [`CentralService::start_dispatch`](crate::CentralService::start_dispatch).

use btleplug::api::{
    Central, CentralEvent, CentralState, Characteristic, Manager as _, Peripheral as _,
    ScanFilter, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral, PeripheralId};
use bytes::Bytes;
use chrono::Utc;
use futures::stream::StreamExt;
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

use crate::ble::adapter::{
    AdapterError, AdapterResult, Advertisement, CentralAdapter, CentralAdapterEvent, DeviceHandle,
};
use crate::ble::connection::ConnectOptions;
use crate::ble::power::AdapterState;
use crate::error::{Error, Result};

type EventSender = mpsc::UnboundedSender<CentralAdapterEvent>;
type PeripheralMap = Arc<RwLock<HashMap<DeviceHandle, Peripheral>>>;

/// Scan settings in effect.
#[derive(Debug, Clone, Default)]
struct ScanState {
    /// Whether a scan was requested.
    active: bool,
    /// Report repeated advertisements.
    allow_duplicates: bool,
    /// Services a peripheral must advertise to be reported. Empty reports all.
    services: Vec<Uuid>,
    /// Devices reported during the current scan.
    reported: HashSet<DeviceHandle>,
}

/// A [`CentralAdapter`] driving the system Bluetooth stack through btleplug.
pub struct BtleplugCentralAdapter {
    /// The btleplug adapter.
    adapter: Adapter,
    /// Runtime commands are spawned on.
    runtime: Handle,
    /// Outgoing adapter events.
    event_tx: EventSender,
    /// Peripherals seen so far.
    peripherals: PeripheralMap,
    /// Current scan settings.
    scan: Arc<RwLock<ScanState>>,
    /// Central event pump task.
    pump_handle: Mutex<Option<JoinHandle<()>>>,
    /// Notification pump per connected device.
    notification_handles: NotificationHandles,
}

impl BtleplugCentralAdapter {
    /// Create an adapter over the first Bluetooth adapter of the system.
    ///
    /// # Errors
    ///
    /// Returns an error if Bluetooth is not available.
    pub async fn new() -> Result<(Self, mpsc::UnboundedReceiver<CentralAdapterEvent>)> {
        let manager = Manager::new()
            .await
            .map_err(|_e| Error::BluetoothUnavailable)?;

        let adapters = manager.adapters().await.map_err(Error::Bluetooth)?;

        let adapter = adapters
            .into_iter()
            .next()
            .ok_or(Error::BluetoothUnavailable)?;

        info!(
            "Using Bluetooth adapter: {:?}",
            adapter.adapter_info().await.ok()
        );

        Self::with_adapter(adapter)
    }

    /// Create an adapter over a specific btleplug adapter.
    ///
    /// Must be called from within a tokio runtime.
    pub fn with_adapter(
        adapter: Adapter,
    ) -> Result<(Self, mpsc::UnboundedReceiver<CentralAdapterEvent>)> {
        let runtime = Handle::try_current().map_err(|e| Error::Internal(e.to_string()))?;
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        let this = Self {
            adapter,
            runtime,
            event_tx,
            peripherals: Arc::new(RwLock::new(HashMap::new())),
            scan: Arc::new(RwLock::new(ScanState::default())),
            pump_handle: Mutex::new(None),
            notification_handles: Arc::new(Mutex::new(HashMap::new())),
        };
        this.start_event_pump();

        Ok((this, event_rx))
    }

    /// Get the underlying btleplug adapter.
    pub fn adapter(&self) -> &Adapter {
        &self.adapter
    }

    fn start_event_pump(&self) {
        let adapter = self.adapter.clone();
        let event_tx = self.event_tx.clone();
        let peripherals = self.peripherals.clone();
        let scan = self.scan.clone();
        let notification_handles = self.notification_handles.clone();

        let handle = self.runtime.spawn(async move {
            match adapter.adapter_state().await {
                Ok(state) => {
                    let _ = event_tx.send(CentralAdapterEvent::StateChanged(adapter_state(state)));
                }
                Err(e) => warn!("Failed to read adapter state: {}", e),
            }

            let mut events = match adapter.events().await {
                Ok(events) => events,
                Err(e) => {
                    error!("Failed to get adapter events: {}", e);
                    return;
                }
            };

            while let Some(event) = events.next().await {
                match event {
                    CentralEvent::DeviceDiscovered(id) | CentralEvent::DeviceUpdated(id) => {
                        Self::process_peripheral(&adapter, id, &peripherals, &scan, &event_tx)
                            .await;
                    }
                    CentralEvent::DeviceDisconnected(id) => {
                        let device = DeviceHandle::new(id.to_string());
                        debug!("Device disconnected: {}", device);
                        if let Some(handle) = notification_handles.lock().remove(&device) {
                            handle.abort();
                        }
                        let _ = event_tx.send(CentralAdapterEvent::Disconnected {
                            device,
                            error: None,
                        });
                    }
                    CentralEvent::StateUpdate(state) => {
                        let _ = event_tx.send(CentralAdapterEvent::StateChanged(adapter_state(state)));
                    }
                    _ => {}
                }
            }

            debug!("Adapter event pump ended");
        });

        *self.pump_handle.lock() = Some(handle);
    }

    async fn process_peripheral(
        adapter: &Adapter,
        id: PeripheralId,
        peripherals: &PeripheralMap,
        scan: &Arc<RwLock<ScanState>>,
        event_tx: &EventSender,
    ) {
        if !scan.read().active {
            return;
        }

        let peripheral = match adapter.peripheral(&id).await {
            Ok(p) => p,
            Err(e) => {
                trace!("Failed to get peripheral: {}", e);
                return;
            }
        };

        let properties = match peripheral.properties().await {
            Ok(Some(p)) => p,
            _ => return,
        };

        let device = DeviceHandle::new(id.to_string());
        peripherals.write().insert(device.clone(), peripheral);

        {
            let mut scan = scan.write();
            if !matches_filter(&scan.services, &properties.services) {
                return;
            }
            if !scan.reported.insert(device.clone()) && !scan.allow_duplicates {
                return;
            }
        }

        let _ = event_tx.send(CentralAdapterEvent::Discovered(Advertisement {
            device,
            local_name: properties.local_name,
            device_name: None,
            // btleplug does not report connectability
            connectable: true,
            rssi: properties.rssi,
            timestamp: Some(Utc::now()),
        }));
    }

    fn peripheral(&self, device: &DeviceHandle) -> AdapterResult<Peripheral> {
        self.peripherals
            .read()
            .get(device)
            .cloned()
            .ok_or_else(|| AdapterError::new(format!("Unknown device {}", device)))
    }
}

impl CentralAdapter for BtleplugCentralAdapter {
    fn start_scan(&self, services: Vec<Uuid>, allow_duplicates: bool) -> AdapterResult<()> {
        *self.scan.write() = ScanState {
            active: true,
            allow_duplicates,
            services: services.clone(),
            reported: HashSet::new(),
        };

        let adapter = self.adapter.clone();
        let scan = self.scan.clone();
        self.runtime.spawn(async move {
            if let Err(e) = adapter.start_scan(ScanFilter { services }).await {
                warn!("Failed to start scan: {}", e);
                scan.write().active = false;
            }
        });

        Ok(())
    }

    fn stop_scan(&self) -> AdapterResult<()> {
        self.scan.write().active = false;

        let adapter = self.adapter.clone();
        self.runtime.spawn(async move {
            if let Err(e) = adapter.stop_scan().await {
                warn!("Failed to stop scan: {}", e);
            }
        });

        Ok(())
    }

    /// The background alert flags in `options` have no btleplug
    /// counterpart and are ignored.
    fn connect(&self, device: &DeviceHandle, _options: ConnectOptions) -> AdapterResult<()> {
        let peripheral = self.peripheral(device)?;
        let device = device.clone();
        let event_tx = self.event_tx.clone();
        let runtime = self.runtime.clone();
        let handles = self.notification_handles.clone();

        self.runtime.spawn(async move {
            let result = peripheral.connect().await;
            if result.is_ok() {
                spawn_notifications(
                    &runtime,
                    &handles,
                    event_tx.clone(),
                    device.clone(),
                    peripheral,
                );
            }
            let _ = event_tx.send(connect_outcome(device, result));
        });

        Ok(())
    }

    fn cancel_connection(&self, device: &DeviceHandle) -> AdapterResult<()> {
        let peripheral = self.peripheral(device)?;
        let device = device.clone();
        let event_tx = self.event_tx.clone();

        if let Some(handle) = self.notification_handles.lock().remove(&device) {
            handle.abort();
        }

        self.runtime.spawn(async move {
            match peripheral.disconnect().await {
                Ok(()) => {
                    let _ = event_tx.send(CentralAdapterEvent::Disconnected {
                        device,
                        error: None,
                    });
                }
                Err(e) => warn!("Failed to disconnect {}: {}", device, e),
            }
        });

        Ok(())
    }

    fn discover_services(&self, device: &DeviceHandle, filter: Option<Uuid>) -> AdapterResult<()> {
        let peripheral = self.peripheral(device)?;
        let device = device.clone();
        let event_tx = self.event_tx.clone();

        self.runtime.spawn(async move {
            let event = match peripheral.discover_services().await {
                Ok(()) => CentralAdapterEvent::ServicesDiscovered {
                    device,
                    services: peripheral
                        .services()
                        .into_iter()
                        .map(|s| s.uuid)
                        .filter(|uuid| filter.map_or(true, |f| f == *uuid))
                        .collect(),
                    error: None,
                },
                Err(e) => CentralAdapterEvent::ServicesDiscovered {
                    device,
                    services: Vec::new(),
                    error: Some(e.into()),
                },
            };
            let _ = event_tx.send(event);
        });

        Ok(())
    }

    fn discover_characteristics(&self, device: &DeviceHandle, service: Uuid) -> AdapterResult<()> {
        let peripheral = self.peripheral(device)?;
        let device = device.clone();
        let event_tx = self.event_tx.clone();

        // btleplug discovers characteristics together with services.
        self.runtime.spawn(async move {
            let found = peripheral.services().into_iter().find(|s| s.uuid == service);
            let event = match found {
                Some(found) => CentralAdapterEvent::CharacteristicsDiscovered {
                    device,
                    service,
                    characteristics: found.characteristics.iter().map(|c| c.uuid).collect(),
                    error: None,
                },
                None => CentralAdapterEvent::CharacteristicsDiscovered {
                    device,
                    service,
                    characteristics: Vec::new(),
                    error: Some(AdapterError::new(format!("Service {} not found", service))),
                },
            };
            let _ = event_tx.send(event);
        });

        Ok(())
    }

    fn read(&self, device: &DeviceHandle, service: Uuid, characteristic: Uuid) -> AdapterResult<()> {
        let peripheral = self.peripheral(device)?;
        let target = find_characteristic(&peripheral, service, characteristic)?;
        let device = device.clone();
        let event_tx = self.event_tx.clone();

        self.runtime.spawn(async move {
            let (value, error) = match peripheral.read(&target).await {
                Ok(data) => {
                    trace!("Read {} bytes from characteristic {}", data.len(), characteristic);
                    (Some(Bytes::from(data)), None)
                }
                Err(e) => (None, Some(e.into())),
            };
            let _ = event_tx.send(CentralAdapterEvent::ValueUpdated {
                device,
                service,
                characteristic,
                value,
                error,
            });
        });

        Ok(())
    }

    fn write(
        &self,
        device: &DeviceHandle,
        service: Uuid,
        characteristic: Uuid,
        value: Bytes,
        with_response: bool,
    ) -> AdapterResult<()> {
        let peripheral = self.peripheral(device)?;
        let target = find_characteristic(&peripheral, service, characteristic)?;
        let device = device.clone();
        let event_tx = self.event_tx.clone();

        let write_type = if with_response {
            WriteType::WithResponse
        } else {
            WriteType::WithoutResponse
        };

        self.runtime.spawn(async move {
            let result = peripheral.write(&target, &value, write_type).await;
            trace!("Wrote {} bytes to characteristic {}", value.len(), characteristic);

            if with_response {
                let _ = event_tx.send(CentralAdapterEvent::ValueWritten {
                    device,
                    service,
                    characteristic,
                    error: result.err().map(AdapterError::from),
                });
            } else if let Err(e) = result {
                warn!("Write without response to {} failed: {}", characteristic, e);
            }
        });

        Ok(())
    }

    fn set_notify(
        &self,
        device: &DeviceHandle,
        service: Uuid,
        characteristic: Uuid,
        enabled: bool,
    ) -> AdapterResult<()> {
        let peripheral = self.peripheral(device)?;
        let target = find_characteristic(&peripheral, service, characteristic)?;

        self.runtime.spawn(async move {
            let result = if enabled {
                peripheral.subscribe(&target).await
            } else {
                peripheral.unsubscribe(&target).await
            };
            match result {
                Ok(()) => debug!("Notifications on {} set to {}", characteristic, enabled),
                Err(e) => warn!("Failed to set notifications on {}: {}", characteristic, e),
            }
        });

        Ok(())
    }
}

impl Drop for BtleplugCentralAdapter {
    fn drop(&mut self) {
        if let Some(handle) = self.pump_handle.lock().take() {
            handle.abort();
        }
        for (_, handle) in self.notification_handles.lock().drain() {
            handle.abort();
        }
    }
}

type NotificationHandles = Arc<Mutex<HashMap<DeviceHandle, JoinHandle<()>>>>;

/// Spawn the task forwarding a peripheral's notifications as value updates.
fn spawn_notifications(
    runtime: &Handle,
    handles: &NotificationHandles,
    event_tx: EventSender,
    device: DeviceHandle,
    peripheral: Peripheral,
) {
    let handle = runtime.spawn(pump_notifications(device.clone(), peripheral, event_tx));
    if let Some(previous) = handles.lock().insert(device, handle) {
        previous.abort();
    }
}

async fn pump_notifications(device: DeviceHandle, peripheral: Peripheral, event_tx: EventSender) {
    let mut notifications = match peripheral.notifications().await {
        Ok(n) => n,
        Err(e) => {
            error!("Failed to get notifications stream: {}", e);
            return;
        }
    };

    while let Some(notification) = notifications.next().await {
        let service = peripheral
            .characteristics()
            .into_iter()
            .find(|c| c.uuid == notification.uuid)
            .map(|c| c.service_uuid);

        let Some(service) = service else {
            trace!("Notification from unknown characteristic {}", notification.uuid);
            continue;
        };

        let _ = event_tx.send(CentralAdapterEvent::ValueUpdated {
            device: device.clone(),
            service,
            characteristic: notification.uuid,
            value: Some(Bytes::from(notification.value)),
            error: None,
        });
    }

    debug!("Notification pump for {} ended", device);
}

fn find_characteristic(
    peripheral: &Peripheral,
    service: Uuid,
    characteristic: Uuid,
) -> AdapterResult<Characteristic> {
    peripheral
        .characteristics()
        .into_iter()
        .find(|c| c.service_uuid == service && c.uuid == characteristic)
        .ok_or_else(|| {
            AdapterError::new(format!(
                "Characteristic {} not found in service {}",
                characteristic, service
            ))
        })
}

/// Map btleplug's adapter state onto the stack state.
fn connect_outcome(device: DeviceHandle, result: btleplug::Result<()>) -> CentralAdapterEvent {
    match result {
        Ok(()) => CentralAdapterEvent::Connected { device },
        Err(e) => CentralAdapterEvent::ConnectFailed {
            device,
            error: e.into(),
        },
    }
}

fn adapter_state(state: CentralState) -> AdapterState {
    match state {
        CentralState::PoweredOn => AdapterState::PoweredOn,
        CentralState::PoweredOff => AdapterState::PoweredOff,
        _ => AdapterState::Unknown,
    }
}

/// Check whether an advertisement's services pass a scan filter.
fn matches_filter(filter: &[Uuid], advertised: &[Uuid]) -> bool {
    filter.is_empty() || filter.iter().any(|f| advertised.contains(f))
}
