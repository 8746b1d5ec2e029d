//! Proximity-beacon payload decoding.
//!
//! MeeBlue beacons broadcast the iBeacon record (UUID, major, minor, calibrated
//! TX power) in Apple manufacturer-specific data, and expose the same record
//! through a vendor GATT characteristic. The two byte layouts differ, so each
//! has its own entry point and the caller picks the one that matches where the
//! bytes came from.
//!
//! The offsets below follow captures from the beacons in use; they have been
//! seen to drift between firmware revisions, so check new hardware against a
//! real capture before trusting them.

use thiserror::Error;
use uuid::Uuid;

/// Apple Inc. company identifier, used for iBeacon manufacturer data.
pub const APPLE_MANUFACTURER_ID: u16 = 0x004C;

/// iBeacon sub-type (0x02) followed by the remaining record length (0x15 = 21).
pub const IBEACON_PREFIX: [u8; 2] = [0x02, 0x15];

/// Minimum manufacturer payload length before the prefix is even inspected.
pub const MIN_MANUFACTURER_PAYLOAD_LEN: usize = 20;

/// Fixed marker following the length byte of a characteristic payload:
/// flags value, AD length, AD type (manufacturer data), company id (LE) and
/// the iBeacon prefix.
pub const CHARACTERISTIC_MARKER: [u8; 7] = [0x06, 0x1A, 0xFF, 0x4C, 0x00, 0x02, 0x15];

/// Length byte written by [`encode_characteristic_payload`].
const CHARACTERISTIC_LENGTH_BYTE: u8 = 0x02;

/// UUID (16) + major (2) + minor (2) + TX power (1).
const RECORD_LEN: usize = 21;

const MANUFACTURER_RECORD_OFFSET: usize = IBEACON_PREFIX.len();
const CHARACTERISTIC_RECORD_OFFSET: usize = 1 + CHARACTERISTIC_MARKER.len();

/// Identity fields carried by a proximity-beacon payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BeaconIdentity {
    /// Proximity UUID; `Display` renders the lowercase hyphenated form.
    pub uuid: Uuid,
    pub major: u16,
    pub minor: u16,
    /// Calibrated RSSI at 1 m, in dBm.
    pub tx_power: i8,
}

/// Reasons a payload could not be decoded into a [`BeaconIdentity`].
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeFailure {
    /// The manufacturer id is not the proximity-beacon vendor code.
    #[error("manufacturer id {0:#06x} does not carry a beacon payload")]
    NotApplicable(u16),
    /// The payload is too short to hold a beacon record.
    #[error("payload too short: {0} bytes")]
    TooShort(usize),
    /// Marker bytes do not match the expected layout.
    #[error("payload does not match the beacon layout")]
    FormatMismatch,
}

/// Decode manufacturer-specific data from an advertisement.
///
/// `data` is the manufacturer payload without the company id, i.e. starting
/// with the `02 15` iBeacon prefix.
///
/// # Errors
/// * [`DecodeFailure::NotApplicable`] for any manufacturer id other than
///   [`APPLE_MANUFACTURER_ID`], whatever the payload holds
/// * [`DecodeFailure::TooShort`] if the record does not fit in `data`
/// * [`DecodeFailure::FormatMismatch`] if the iBeacon prefix is missing
pub fn decode_manufacturer_payload(
    manufacturer_id: u16,
    data: &[u8],
) -> Result<BeaconIdentity, DecodeFailure> {
    if manufacturer_id != APPLE_MANUFACTURER_ID {
        return Err(DecodeFailure::NotApplicable(manufacturer_id));
    }
    if data.len() < MIN_MANUFACTURER_PAYLOAD_LEN {
        return Err(DecodeFailure::TooShort(data.len()));
    }
    if data[..IBEACON_PREFIX.len()] != IBEACON_PREFIX {
        return Err(DecodeFailure::FormatMismatch);
    }

    data.get(MANUFACTURER_RECORD_OFFSET..MANUFACTURER_RECORD_OFFSET + RECORD_LEN)
        .map(parse_record)
        .ok_or(DecodeFailure::TooShort(data.len()))
}

/// Decode the value read from the beacon's GATT characteristic.
///
/// The buffer starts with a length byte and the fixed
/// [`CHARACTERISTIC_MARKER`], followed by the beacon record.
///
/// # Errors
/// [`DecodeFailure::FormatMismatch`] if the marker differs or the buffer is
/// too short to hold the record.
pub fn decode_characteristic_payload(data: &[u8]) -> Result<BeaconIdentity, DecodeFailure> {
    let marker = data
        .get(1..CHARACTERISTIC_RECORD_OFFSET)
        .ok_or(DecodeFailure::FormatMismatch)?;
    if marker != CHARACTERISTIC_MARKER {
        return Err(DecodeFailure::FormatMismatch);
    }

    data.get(CHARACTERISTIC_RECORD_OFFSET..CHARACTERISTIC_RECORD_OFFSET + RECORD_LEN)
        .map(parse_record)
        .ok_or(DecodeFailure::FormatMismatch)
}

/// Parse a 21-byte record: UUID, big-endian major and minor, signed TX power.
fn parse_record(record: &[u8]) -> BeaconIdentity {
    let mut uuid = [0u8; 16];
    uuid.copy_from_slice(&record[..16]);

    BeaconIdentity {
        uuid: Uuid::from_bytes(uuid),
        major: u16::from_be_bytes([record[16], record[17]]),
        minor: u16::from_be_bytes([record[18], record[19]]),
        tx_power: record[20] as i8,
    }
}

fn write_record(identity: &BeaconIdentity, out: &mut Vec<u8>) {
    out.extend_from_slice(identity.uuid.as_bytes());
    out.extend_from_slice(&identity.major.to_be_bytes());
    out.extend_from_slice(&identity.minor.to_be_bytes());
    out.push(identity.tx_power as u8);
}

/// Encode an identity as manufacturer data (without company id).
///
/// Inverse of [`decode_manufacturer_payload`].
pub fn encode_manufacturer_payload(identity: &BeaconIdentity) -> Vec<u8> {
    let mut out = Vec::with_capacity(MANUFACTURER_RECORD_OFFSET + RECORD_LEN);
    out.extend_from_slice(&IBEACON_PREFIX);
    write_record(identity, &mut out);
    out
}

/// Encode an identity in the GATT characteristic layout.
///
/// Inverse of [`decode_characteristic_payload`].
pub fn encode_characteristic_payload(identity: &BeaconIdentity) -> Vec<u8> {
    let mut out = Vec::with_capacity(CHARACTERISTIC_RECORD_OFFSET + RECORD_LEN);
    out.push(CHARACTERISTIC_LENGTH_BYTE);
    out.extend_from_slice(&CHARACTERISTIC_MARKER);
    write_record(identity, &mut out);
    out
}
