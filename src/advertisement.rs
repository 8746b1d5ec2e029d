//! Events delivered by the scanner backends.

use std::collections::BTreeMap;

/// RSSI value used when the platform reports no signal strength.
pub const NO_RSSI: i32 = 0;

/// One received BLE advertisement.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AdvertisementEvent {
    /// Device address, or the platform identifier where addresses are hidden
    pub address: String,
    /// Advertised local name, empty if none was seen
    pub name: String,
    /// Received signal strength in dBm ([`NO_RSSI`] if unknown)
    pub rssi: i32,
    /// Manufacturer-specific data keyed by company id, without the id bytes
    pub manufacturer_data: BTreeMap<u16, Vec<u8>>,
}

/// Anything a backend can feed into a scan session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceEvent {
    Advertisement(AdvertisementEvent),
    /// Value read from the beacon's identity characteristic over GATT
    Characteristic { address: String, payload: Vec<u8> },
}

impl From<AdvertisementEvent> for SourceEvent {
    fn from(event: AdvertisementEvent) -> Self {
        SourceEvent::Advertisement(event)
    }
}
