use crate::advertisement::AdvertisementEvent;
use crate::beacon::{APPLE_MANUFACTURER_ID, BeaconIdentity, encode_manufacturer_payload};
use uuid::Uuid;

/// A stable device address for unit tests.
pub const TEST_ADDRESS: &str = "AA:BB:CC:DD:EE:FF";

/// Identity used across decoder and session tests.
pub fn sample_identity() -> BeaconIdentity {
    BeaconIdentity {
        uuid: Uuid::from_u128(0xd35b76e2_e01c_9fac_ba8d_7ce20bdba0c6),
        major: 10001,
        minor: 20001,
        tx_power: -59,
    }
}

/// Build a MeeBlue-named advertisement with no manufacturer data.
///
/// Tests can add manufacturer entries as needed.
pub fn advertisement(address: &str, rssi: i32) -> AdvertisementEvent {
    AdvertisementEvent {
        address: address.to_string(),
        name: "MeeBlue-Tag".to_string(),
        rssi,
        manufacturer_data: Default::default(),
    }
}

/// Build a MeeBlue-named advertisement carrying an iBeacon payload.
pub fn beacon_advertisement(
    address: &str,
    rssi: i32,
    identity: &BeaconIdentity,
) -> AdvertisementEvent {
    let mut event = advertisement(address, rssi);
    event
        .manufacturer_data
        .insert(APPLE_MANUFACTURER_ID, encode_manufacturer_payload(identity));
    event
}
