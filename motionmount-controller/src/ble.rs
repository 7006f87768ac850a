//! btleplug transport for MotionMounts
//!
//! Scans for mounts advertising the MotionMount service and drives a
//! connected peripheral through [`GattLink`].

use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use btleplug::api::{
    Central, CentralEvent, Characteristic, Manager as _, Peripheral as _, ScanFilter, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral};
use futures::StreamExt;
use motionmount_proto::ble::SERVICE_UUID;
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::MountError;
use crate::link::{GattLink, LinkEvents};

/// A BLE device seen during a scan
#[derive(Debug, Clone, Serialize)]
pub struct DiscoveredMount {
    pub name: String,
    pub address: String,
    pub rssi: Option<i16>,
    /// Advertises the MotionMount service
    pub is_motionmount: bool,
}

fn parse_uuid(s: &str) -> Result<Uuid, MountError> {
    Uuid::parse_str(s).map_err(|_| MountError::CharacteristicNotFound { uuid: s.to_string() })
}

/// Get the default Bluetooth adapter
pub async fn get_adapter() -> Result<Adapter, MountError> {
    let manager = Manager::new().await?;
    let adapters = manager.adapters().await?;
    adapters
        .into_iter()
        .next()
        .ok_or_else(|| MountError::Connection("no Bluetooth adapter found".to_string()))
}

async fn scan_peripherals(adapter: &Adapter, duration: Duration) -> Result<Vec<Peripheral>, MountError> {
    adapter.start_scan(ScanFilter::default()).await?;
    tokio::time::sleep(duration).await;
    let peripherals = adapter.peripherals().await?;
    adapter.stop_scan().await?;
    Ok(peripherals)
}

/// Scan for BLE devices
///
/// MotionMounts have `is_motionmount = true`.
pub async fn scan(duration: Duration) -> Result<Vec<DiscoveredMount>, MountError> {
    let adapter = get_adapter().await?;
    let service = parse_uuid(SERVICE_UUID)?;
    let mut devices = Vec::new();

    for peripheral in scan_peripherals(&adapter, duration).await? {
        if let Some(props) = peripheral.properties().await? {
            devices.push(DiscoveredMount {
                name: props.local_name.unwrap_or_else(|| "Unknown".to_string()),
                address: peripheral.address().to_string(),
                rssi: props.rssi,
                is_motionmount: props.services.contains(&service),
            });
        }
    }

    Ok(devices)
}

/// Find a mount by name/address pattern, or the first MotionMount seen
pub async fn find_device(target: Option<&str>, duration: Duration) -> Result<BtleLink, MountError> {
    let adapter = get_adapter().await?;
    let service = parse_uuid(SERVICE_UUID)?;

    for peripheral in scan_peripherals(&adapter, duration).await? {
        let Some(props) = peripheral.properties().await? else {
            continue;
        };
        let name = props.local_name.unwrap_or_default();
        let address = peripheral.address().to_string();

        let matches = match target {
            Some(t) => name.contains(t) || address.eq_ignore_ascii_case(t),
            None => props.services.contains(&service),
        };
        if matches {
            info!(%name, %address, "found MotionMount");
            return Ok(BtleLink::new(adapter, peripheral));
        }
    }

    Err(MountError::DeviceNotFound(
        target.unwrap_or("any MotionMount").to_string(),
    ))
}

/// [`GattLink`] over a btleplug peripheral.
pub struct BtleLink {
    adapter: Adapter,
    peripheral: Peripheral,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl BtleLink {
    pub fn new(adapter: Adapter, peripheral: Peripheral) -> Self {
        Self {
            adapter,
            peripheral,
            tasks: Mutex::new(Vec::new()),
        }
    }

    pub fn address(&self) -> String {
        self.peripheral.address().to_string()
    }

    fn find_characteristic(&self, uuid: &str) -> Result<Characteristic, MountError> {
        let wanted = parse_uuid(uuid)?;
        self.peripheral
            .characteristics()
            .into_iter()
            .find(|c| c.uuid == wanted)
            .ok_or_else(|| MountError::CharacteristicNotFound { uuid: uuid.to_string() })
    }

    fn abort_tasks(&self) {
        let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        for task in tasks.drain(..) {
            task.abort();
        }
    }

    async fn spawn_listeners(&self, events: LinkEvents) -> Result<(), MountError> {
        let mut notifications = self.peripheral.notifications().await?;
        let mut central = self.adapter.events().await?;
        let id = self.peripheral.id();

        let forward = events.clone();
        let notify = tokio::spawn(async move {
            while let Some(n) = notifications.next().await {
                forward.notification(&n.uuid.to_string(), &n.value);
            }
        });

        let watch = tokio::spawn(async move {
            while let Some(event) = central.next().await {
                match event {
                    CentralEvent::DeviceDisconnected(peer) if peer == id => {
                        events.disconnected();
                        break;
                    }
                    _ => {}
                }
            }
        });

        let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        tasks.push(notify);
        tasks.push(watch);
        Ok(())
    }
}

#[async_trait]
impl GattLink for BtleLink {
    async fn connect(&self, events: LinkEvents) -> Result<(), MountError> {
        self.abort_tasks();
        if !self.peripheral.is_connected().await? {
            self.peripheral.connect().await?;
        }
        self.peripheral.discover_services().await?;
        self.spawn_listeners(events).await?;
        debug!(address = %self.address(), "GATT services discovered");
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), MountError> {
        self.abort_tasks();
        if self.peripheral.is_connected().await? {
            self.peripheral.disconnect().await?;
        }
        Ok(())
    }

    async fn read(&self, uuid: &str) -> Result<Vec<u8>, MountError> {
        let characteristic = self.find_characteristic(uuid)?;
        Ok(self.peripheral.read(&characteristic).await?)
    }

    async fn write(&self, uuid: &str, data: &[u8]) -> Result<(), MountError> {
        let characteristic = self.find_characteristic(uuid)?;
        self.peripheral
            .write(&characteristic, data, WriteType::WithResponse)
            .await?;
        Ok(())
    }

    async fn subscribe(&self, uuid: &str) -> Result<(), MountError> {
        let characteristic = self.find_characteristic(uuid)?;
        self.peripheral.subscribe(&characteristic).await?;
        Ok(())
    }
}

impl Drop for BtleLink {
    fn drop(&mut self) {
        self.abort_tasks();
    }
}
