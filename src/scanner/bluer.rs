//! BlueZ D-Bus backend.
//!
//! This backend uses the `bluer` crate to communicate with the BlueZ daemon
//! via D-Bus. It requires the `bluetoothd` daemon to be running.
//!
//! Discovery runs with duplicate reporting enabled so every advertisement
//! updates the device's RSSI property; each update is forwarded as an
//! [`AdvertisementEvent`]. Identity characteristic reads run on a separate
//! task and report back on the same channel.

use super::{
    GATT_REQUEST_BUFFER_SIZE, GattTarget, SOURCE_CHANNEL_BUFFER_SIZE, ScanError, ScanHandle,
    SourceResult,
};
use crate::advertisement::{AdvertisementEvent, SourceEvent};
use bluer::{
    Adapter, AdapterEvent, Address, Device, DiscoveryFilter, DiscoveryTransport, Session,
};
use futures::StreamExt;
use log::{debug, warn};
use tokio::sync::mpsc;

impl From<bluer::Error> for ScanError {
    fn from(err: bluer::Error) -> Self {
        ScanError::Bluetooth(err.to_string())
    }
}

/// Start LE discovery on the default adapter.
///
/// Discovered advertisements are sent through the returned handle until the
/// handle is dropped. If `gatt` is set, the handle also accepts addresses to
/// read the identity characteristic from.
pub async fn start_scan(gatt: Option<GattTarget>) -> Result<ScanHandle, ScanError> {
    let session = Session::new().await?;
    let adapter = session.default_adapter().await?;
    adapter.set_powered(true).await?;

    adapter
        .set_discovery_filter(DiscoveryFilter {
            transport: DiscoveryTransport::Le,
            duplicate_data: true,
            ..Default::default()
        })
        .await?;

    let discovery = adapter.discover_devices_with_changes().await?;
    let (tx, rx) = mpsc::channel(SOURCE_CHANNEL_BUFFER_SIZE);

    let gatt_requests = gatt.map(|target| spawn_gatt_worker(adapter.clone(), target, tx.clone()));

    // Spawn a task that owns all Bluetooth state and runs the event loop
    tokio::spawn(async move {
        // Keep the session alive by moving it into this task
        let _session = session;
        let mut discovery = Box::pin(discovery);

        while let Some(event) = discovery.next().await {
            let AdapterEvent::DeviceAdded(address) = event else {
                continue;
            };

            match read_advertisement(&adapter, address).await {
                Ok(Some(advertisement)) => {
                    if tx.send(Ok(advertisement.into())).await.is_err() {
                        return;
                    }
                }
                Ok(None) => {}
                // Devices can disappear between the event and the property read
                Err(e) => debug!("{address}: failed to read properties: {e}"),
            }
        }

        let _ = tx
            .send(Err(ScanError::Bluetooth("discovery stopped".into())))
            .await;
    });

    Ok(ScanHandle {
        events: rx,
        gatt_requests,
    })
}

/// Snapshot the advertisement-derived properties of a device.
///
/// Returns `None` for devices BlueZ only knows from its cache (no RSSI).
async fn read_advertisement(
    adapter: &Adapter,
    address: Address,
) -> Result<Option<AdvertisementEvent>, ScanError> {
    let device = adapter.device(address)?;

    let Some(rssi) = device.rssi().await? else {
        return Ok(None);
    };

    Ok(Some(AdvertisementEvent {
        address: address.to_string(),
        name: device.name().await?.unwrap_or_default(),
        rssi: i32::from(rssi),
        manufacturer_data: device
            .manufacturer_data()
            .await?
            .unwrap_or_default()
            .into_iter()
            .collect(),
    }))
}

/// Spawn the task serving identity characteristic reads.
///
/// Requests are handled one at a time so only one connection is open.
fn spawn_gatt_worker(
    adapter: Adapter,
    target: GattTarget,
    events: mpsc::Sender<SourceResult>,
) -> mpsc::Sender<String> {
    let (tx, mut rx) = mpsc::channel::<String>(GATT_REQUEST_BUFFER_SIZE);

    tokio::spawn(async move {
        while let Some(address) = rx.recv().await {
            match read_characteristic(&adapter, &address, target).await {
                Ok(payload) => {
                    let event = SourceEvent::Characteristic { address, payload };
                    if events.send(Ok(event)).await.is_err() {
                        return;
                    }
                }
                Err(e) => warn!("{address}: identity read failed: {e}"),
            }
        }
    });

    tx
}

/// Connect, find the identity characteristic, read it and disconnect.
async fn read_characteristic(
    adapter: &Adapter,
    address: &str,
    target: GattTarget,
) -> Result<Vec<u8>, ScanError> {
    let address: Address = address
        .parse()
        .map_err(|e| ScanError::Bluetooth(format!("invalid address {address}: {e}")))?;
    let device = adapter.device(address)?;

    let was_connected = device.is_connected().await?;
    if !was_connected {
        debug!("{address}: connecting for identity read");
        device.connect().await?;
    }

    let result = find_and_read(&device, target).await;

    if !was_connected && let Err(e) = device.disconnect().await {
        debug!("{address}: disconnect failed: {e}");
    }

    result
}

async fn find_and_read(device: &Device, target: GattTarget) -> Result<Vec<u8>, ScanError> {
    for service in device.services().await? {
        if service.uuid().await? != target.service {
            continue;
        }
        for characteristic in service.characteristics().await? {
            if characteristic.uuid().await? == target.characteristic {
                return Ok(characteristic.read().await?);
            }
        }
    }

    Err(ScanError::CharacteristicNotFound {
        service: target.service,
        characteristic: target.characteristic,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bluer_error_to_scan_error() {
        let err: ScanError = bluer::Error {
            kind: bluer::ErrorKind::NotReady,
            message: "adapter not ready".to_string(),
        }
        .into();
        assert!(matches!(err, ScanError::Bluetooth(_)));
    }

    #[test]
    fn test_address_display_matches_session_keys() {
        let addr = Address([0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF]);
        assert_eq!(addr.to_string(), "AA:BB:CC:DD:EE:FF");
        assert_eq!("AA:BB:CC:DD:EE:FF".parse::<Address>().unwrap(), addr);
    }
}
