//! Scan, auto-connect and walk the GATT tree of a peripheral
//!
//! Connects to the first connectable peripheral stronger than -70 dBm, lists
//! its services and characteristics, and reads the battery level if the
//! peripheral has a battery service.
//!
//! Run with: cargo run --example scan_and_connect
//!
//! To only scan for a specific service:
//!   cargo run --example scan_and_connect -- --service 180f

use ble_orchestra::ble::uuids::{self, BATTERY_SERVICE_UUID};
use ble_orchestra::{
    AttributeValue, BtleplugCentralAdapter, CentralConfig, CentralDelegate, CentralEvent,
    CentralService, DiscoveryRecord, Result, SessionEvent,
};
use std::sync::Arc;
use std::time::Duration;

/// Battery Level characteristic.
const BATTERY_LEVEL_UUID: uuid::Uuid = uuids::from_short(0x2A19);

/// Print assigned numbers in their short form.
fn describe(uuid: &uuid::Uuid) -> String {
    match uuids::to_short(uuid) {
        Some(short) => format!("0x{:04X}", short),
        None => uuid.to_string(),
    }
}

struct NearestFirst;

impl CentralDelegate for NearestFirst {
    fn should_connect(&self, record: &DiscoveryRecord) -> bool {
        record.rssi.map_or(false, |rssi| rssi > -70)
    }

    fn should_stop_scanning(&self) -> bool {
        false
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("ble_orchestra=debug".parse().unwrap()),
        )
        .init();

    // Parse command line arguments
    let args: Vec<String> = std::env::args().collect();
    let service_filter = match args
        .iter()
        .position(|arg| arg == "--service")
        .and_then(|i| args.get(i + 1))
    {
        Some(value) => Some(uuids::parse(value)?),
        None => None,
    };

    let (adapter, adapter_events) = BtleplugCentralAdapter::new().await?;
    let central = Arc::new(CentralService::new(
        Arc::new(adapter),
        CentralConfig::default(),
    ));
    central.set_delegate(Arc::new(NearestFirst));
    central.start_dispatch(adapter_events);

    let mut events = central.subscribe();

    // Scanning needs a powered-on radio
    loop {
        match events.recv().await {
            Ok(CentralEvent::PowerStateChanged(state)) if state.is_powered_on() => break,
            Ok(CentralEvent::PowerStateChanged(state)) => println!("Bluetooth is {}", state),
            Ok(_) => {}
            Err(_) => return Ok(()),
        }
    }

    central.start_scan(service_filter, false)?;
    println!("Scanning...");

    let session = loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(CentralEvent::PeripheralDiscovered { record, .. }) => {
                    println!(
                        "  {} {:?} (RSSI: {:?})",
                        record.peripheral_id(),
                        record.advertisement_name,
                        record.rssi
                    );
                }
                Ok(CentralEvent::PeripheralConnected { peripheral_id, error: None }) => {
                    if let Some(session) = central.session(peripheral_id.as_str()) {
                        break session;
                    }
                }
                Ok(CentralEvent::PeripheralConnected { peripheral_id, error: Some(e) }) => {
                    println!("Failed to connect to {}: {}", peripheral_id, e);
                }
                Ok(_) => {}
                Err(_) => return Ok(()),
            },
            _ = tokio::signal::ctrl_c() => {
                println!("\nInterrupted!");
                central.shutdown()?;
                return Ok(());
            }
        }
    };

    central.stop_scan()?;
    println!("\nConnected to {}", session.peripheral_id());

    let mut session_events = session.subscribe();
    session.discover_all_services()?;

    let mut pending = 0usize;
    let deadline = tokio::time::sleep(Duration::from_secs(15));
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            event = session_events.recv() => match event {
                Ok(SessionEvent::ServicesDiscovered { services, error }) => {
                    if let Some(e) = error {
                        println!("Service discovery failed: {}", e);
                        break;
                    }
                    for service in services {
                        println!("  Service {}", describe(&service));
                        if session.discover_characteristics(service)? {
                            pending += 1;
                        }
                    }
                }
                Ok(SessionEvent::CharacteristicsDiscovered { service_id, characteristics, .. }) => {
                    for characteristic in &characteristics {
                        println!("    {} / {}", describe(&service_id), describe(characteristic));
                    }
                    if service_id == BATTERY_SERVICE_UUID {
                        session.read_value(service_id, BATTERY_LEVEL_UUID)?;
                    }
                    pending = pending.saturating_sub(1);
                    if pending == 0 && service_id != BATTERY_SERVICE_UUID {
                        break;
                    }
                }
                Ok(SessionEvent::ResponseReceived { response, error: None }) => {
                    if let Some(level) = response.value().and_then(|v| v.first()) {
                        println!("Battery level: {}%", level);
                    }
                    if pending == 0 {
                        break;
                    }
                }
                Ok(_) => {}
                Err(_) => break,
            },
            _ = &mut deadline => {
                println!("Timed out waiting for the peripheral");
                break;
            }
        }
    }

    central.shutdown()?;
    println!("\nDone!");

    Ok(())
}
