//! Per-device tracking state and smoothed reading emission.
//!
//! A [`ScanSession`] is fed advertisements (and optionally GATT reads) from a
//! single task and asked for readings on a fixed cadence. It does no I/O and
//! no locking; callers delivering from several threads must serialize calls.

use crate::advertisement::{AdvertisementEvent, NO_RSSI};
use crate::beacon::{BeaconIdentity, decode_characteristic_payload, decode_manufacturer_payload};
use crate::distance::PathLossModel;
use crate::history::{MAX_HISTORY, RssiHistory};
use crate::target::TargetFilter;
use log::{debug, info};
use std::collections::BTreeMap;
use std::time::SystemTime;

/// Tunables for a scan session.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    pub targets: TargetFilter,
    pub model: PathLossModel,
    /// Samples kept per device for the median
    pub history_size: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            targets: TargetFilter::default(),
            model: PathLossModel::default(),
            history_size: MAX_HISTORY,
        }
    }
}

/// Tracking state for one matching device.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceTrackingEntry {
    pub address: String,
    /// Set once from the first decodable payload, never replaced
    pub identity: Option<BeaconIdentity>,
    pub history: RssiHistory,
}

/// A median RSSI and the distance derived from it.
#[derive(Debug, Clone, PartialEq)]
pub struct SmoothedReading {
    pub address: String,
    pub rssi: i32,
    /// Meters, or [`crate::distance::INVALID_DISTANCE`]
    pub distance: f64,
    pub timestamp: SystemTime,
}

/// Notifications for presentation and logging.
#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    IdentityDiscovered {
        address: String,
        identity: BeaconIdentity,
    },
    SmoothedReading(SmoothedReading),
    /// The scan transport failed; the scan cycle is over
    SessionError(String),
}

#[derive(Debug, Default)]
pub struct ScanSession {
    config: SessionConfig,
    devices: BTreeMap<String, DeviceTrackingEntry>,
}

impl ScanSession {
    pub fn new(config: SessionConfig) -> Self {
        Self {
            config,
            devices: BTreeMap::new(),
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Handle one received advertisement.
    ///
    /// Non-target devices are ignored. The first time a tracked device's
    /// manufacturer data decodes as a beacon payload its identity is stored and
    /// an [`Notification::IdentityDiscovered`] is returned. The RSSI sample is
    /// recorded whether or not the device has been identified, unless it is
    /// [`NO_RSSI`].
    pub fn on_advertisement(&mut self, event: &AdvertisementEvent) -> Option<Notification> {
        if !self.config.targets.matches(&event.address, &event.name) {
            return None;
        }

        let history_size = self.config.history_size;
        let entry = self
            .devices
            .entry(event.address.clone())
            .or_insert_with(|| {
                debug!("tracking new device {} ({:?})", event.address, event.name);
                DeviceTrackingEntry {
                    address: event.address.clone(),
                    identity: None,
                    history: RssiHistory::new(history_size),
                }
            });

        let mut notification = None;
        if entry.identity.is_none() {
            for (&manufacturer_id, data) in &event.manufacturer_data {
                match decode_manufacturer_payload(manufacturer_id, data) {
                    Ok(identity) => {
                        notification = Some(identify(entry, identity));
                        break;
                    }
                    Err(failure) => {
                        debug!(
                            "{}: skipping manufacturer data {:#06x}: {}",
                            event.address, manufacturer_id, failure
                        );
                    }
                }
            }
        }

        if event.rssi != NO_RSSI {
            entry.history.append(event.rssi);
        }
        notification
    }

    /// Handle a value read from a device's identity characteristic.
    ///
    /// Only applies to tracked devices that have no identity yet.
    pub fn on_characteristic(&mut self, address: &str, payload: &[u8]) -> Option<Notification> {
        let entry = self.devices.get_mut(address)?;
        if entry.identity.is_some() {
            return None;
        }

        match decode_characteristic_payload(payload) {
            Ok(identity) => Some(identify(entry, identity)),
            Err(failure) => {
                debug!("{address}: skipping characteristic value: {failure}");
                None
            }
        }
    }

    /// Smoothed readings for every device with at least one sample.
    ///
    /// Histories are left in place, so consecutive ticks without new
    /// advertisements repeat the same reading.
    pub fn on_tick(&self) -> Vec<SmoothedReading> {
        let timestamp = SystemTime::now();

        self.devices
            .values()
            .filter(|entry| !entry.history.is_empty())
            .map(|entry| {
                let rssi = entry.history.median();
                SmoothedReading {
                    address: entry.address.clone(),
                    rssi,
                    distance: self.config.model.estimate(rssi),
                    timestamp,
                }
            })
            .collect()
    }

    /// Whether `address` is tracked but not yet identified.
    pub fn needs_identity(&self, address: &str) -> bool {
        self.devices
            .get(address)
            .is_some_and(|entry| entry.identity.is_none())
    }

    pub fn device(&self, address: &str) -> Option<&DeviceTrackingEntry> {
        self.devices.get(address)
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// Drop all tracking state.
    pub fn reset(&mut self) {
        self.devices.clear();
    }
}

fn identify(entry: &mut DeviceTrackingEntry, identity: BeaconIdentity) -> Notification {
    info!(
        "{}: beacon {} major {} minor {} tx power {} dBm",
        entry.address, identity.uuid, identity.major, identity.minor, identity.tx_power
    );
    entry.identity = Some(identity);

    Notification::IdentityDiscovered {
        address: entry.address.clone(),
        identity,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::beacon::{encode_characteristic_payload, encode_manufacturer_payload};
    use crate::test_utils::{TEST_ADDRESS, advertisement, beacon_advertisement, sample_identity};
    use uuid::Uuid;

    fn session() -> ScanSession {
        ScanSession::new(SessionConfig::default())
    }

    #[test]
    fn test_ignores_non_targets() {
        let mut s = session();
        let event = AdvertisementEvent {
            address: "11:22:33:44:55:66".to_string(),
            name: "Other".to_string(),
            rssi: -50,
            ..Default::default()
        };
        assert_eq!(s.on_advertisement(&event), None);
        assert!(s.is_empty());
        assert!(s.on_tick().is_empty());
    }

    #[test]
    fn test_tracks_known_address_without_name() {
        let config = SessionConfig {
            targets: TargetFilter::new(["DD:2B:7C:C0:A0:84"]),
            ..Default::default()
        };
        let mut s = ScanSession::new(config);
        let event = AdvertisementEvent {
            address: "dd:2b:7c:c0:a0:84".to_string(),
            rssi: -70,
            ..Default::default()
        };
        s.on_advertisement(&event);
        assert_eq!(s.len(), 1);
        assert!(s.device("dd:2b:7c:c0:a0:84").is_some());
    }

    #[test]
    fn test_three_samples_then_tick() {
        let mut s = session();
        for rssi in [-55, -65, -60] {
            s.on_advertisement(&advertisement(TEST_ADDRESS, rssi));
        }

        let readings = s.on_tick();
        assert_eq!(readings.len(), 1);
        assert_eq!(readings[0].address, TEST_ADDRESS);
        assert_eq!(readings[0].rssi, -60);
        assert!(readings[0].distance.is_finite());
        assert!(readings[0].distance > 0.0);
        assert!((readings[0].distance - 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_tick_does_not_drain_history() {
        let mut s = session();
        s.on_advertisement(&advertisement(TEST_ADDRESS, -40));

        let first = s.on_tick();
        let second = s.on_tick();
        assert_eq!(first.len(), 1);
        assert_eq!(second.len(), 1);
        assert_eq!(first[0].rssi, second[0].rssi);
        assert_eq!(second[0].distance, 1.0);
    }

    #[test]
    fn test_tick_follows_sliding_window() {
        let mut s = session();
        for rssi in [-90, -90, -90, -90, -50, -50, -50] {
            s.on_advertisement(&advertisement(TEST_ADDRESS, rssi));
        }
        // window: [-90, -50, -50, -50]
        assert_eq!(s.on_tick()[0].rssi, -50);
    }

    #[test]
    fn test_respects_history_size() {
        let config = SessionConfig {
            history_size: 2,
            ..Default::default()
        };
        let mut s = ScanSession::new(config);
        for rssi in [-40, -60, -80] {
            s.on_advertisement(&advertisement(TEST_ADDRESS, rssi));
        }
        let entry = s.device(TEST_ADDRESS).unwrap();
        assert_eq!(entry.history.samples().collect::<Vec<_>>(), vec![-60, -80]);
        assert_eq!(s.on_tick()[0].rssi, -70);
    }

    #[test]
    fn test_identity_discovered_once() {
        let mut s = session();
        let identity = sample_identity();

        let first = s.on_advertisement(&beacon_advertisement(TEST_ADDRESS, -60, &identity));
        assert_eq!(
            first,
            Some(Notification::IdentityDiscovered {
                address: TEST_ADDRESS.to_string(),
                identity,
            })
        );

        let second = s.on_advertisement(&beacon_advertisement(TEST_ADDRESS, -62, &identity));
        assert_eq!(second, None);
        assert_eq!(s.device(TEST_ADDRESS).unwrap().history.len(), 2);
    }

    #[test]
    fn test_identity_is_not_replaced() {
        let mut s = session();
        let identity = sample_identity();
        let other = BeaconIdentity {
            uuid: Uuid::nil(),
            major: 1,
            minor: 2,
            tx_power: -70,
        };

        s.on_advertisement(&beacon_advertisement(TEST_ADDRESS, -60, &identity));
        assert_eq!(
            s.on_advertisement(&beacon_advertisement(TEST_ADDRESS, -60, &other)),
            None
        );
        assert_eq!(s.device(TEST_ADDRESS).unwrap().identity, Some(identity));
    }

    #[test]
    fn test_malformed_payloads_are_skipped() {
        let mut s = session();
        let identity = sample_identity();
        let mut event = advertisement(TEST_ADDRESS, -60);
        event.manufacturer_data.insert(0x0006, vec![0x01, 0x09]);
        event
            .manufacturer_data
            .insert(0x004C, encode_manufacturer_payload(&identity));
        event.manufacturer_data.insert(0x0499, vec![0x05; 24]);

        assert!(matches!(
            s.on_advertisement(&event),
            Some(Notification::IdentityDiscovered { .. })
        ));
        assert_eq!(s.device(TEST_ADDRESS).unwrap().identity, Some(identity));
    }

    #[test]
    fn test_unidentified_device_still_emits_readings() {
        let mut s = session();
        let mut event = advertisement(TEST_ADDRESS, -60);
        event.manufacturer_data.insert(0x004C, vec![0x10, 0x05, 0x01]);

        assert_eq!(s.on_advertisement(&event), None);
        assert!(s.needs_identity(TEST_ADDRESS));
        let readings = s.on_tick();
        assert_eq!(readings.len(), 1);
        assert_eq!(readings[0].rssi, -60);
    }

    #[test]
    fn test_characteristic_identifies_tracked_device() {
        let mut s = session();
        let identity = sample_identity();
        let payload = encode_characteristic_payload(&identity);

        // Unknown device: nothing to identify
        assert_eq!(s.on_characteristic(TEST_ADDRESS, &payload), None);

        s.on_advertisement(&advertisement(TEST_ADDRESS, -60));
        assert!(s.needs_identity(TEST_ADDRESS));
        assert_eq!(
            s.on_characteristic(TEST_ADDRESS, &payload),
            Some(Notification::IdentityDiscovered {
                address: TEST_ADDRESS.to_string(),
                identity,
            })
        );
        assert!(!s.needs_identity(TEST_ADDRESS));
        assert_eq!(s.on_characteristic(TEST_ADDRESS, &payload), None);
    }

    #[test]
    fn test_characteristic_in_advertisement_layout_is_rejected() {
        let mut s = session();
        s.on_advertisement(&advertisement(TEST_ADDRESS, -60));
        let payload = encode_manufacturer_payload(&sample_identity());
        assert_eq!(s.on_characteristic(TEST_ADDRESS, &payload), None);
        assert!(s.needs_identity(TEST_ADDRESS));
    }

    #[test]
    fn test_readings_are_ordered_by_address() {
        let mut s = session();
        s.on_advertisement(&advertisement("CC:00:00:00:00:01", -50));
        s.on_advertisement(&advertisement("AA:00:00:00:00:01", -60));
        s.on_advertisement(&advertisement("BB:00:00:00:00:01", -70));

        let addresses: Vec<_> = s.on_tick().into_iter().map(|r| r.address).collect();
        assert_eq!(
            addresses,
            vec!["AA:00:00:00:00:01", "BB:00:00:00:00:01", "CC:00:00:00:00:01"]
        );
    }

    #[test]
    fn test_missing_rssi_is_not_sampled() {
        let mut s = session();
        s.on_advertisement(&advertisement(TEST_ADDRESS, -60));
        s.on_advertisement(&advertisement(TEST_ADDRESS, NO_RSSI));

        let entry = s.device(TEST_ADDRESS).unwrap();
        assert_eq!(entry.history.samples().collect::<Vec<_>>(), vec![-60]);

        let readings = s.on_tick();
        assert_eq!(readings.len(), 1);
        assert_eq!(readings[0].rssi, -60);
        assert!((readings[0].distance - 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_missing_rssi_still_tracks_and_identifies() {
        let mut s = session();
        let identity = sample_identity();
        let n = s.on_advertisement(&beacon_advertisement(TEST_ADDRESS, NO_RSSI, &identity));

        assert!(matches!(n, Some(Notification::IdentityDiscovered { .. })));
        assert_eq!(s.len(), 1);
        assert!(s.on_tick().is_empty());
    }

    #[test]
    fn test_reset_clears_devices() {
        let mut s = session();
        s.on_advertisement(&advertisement(TEST_ADDRESS, -60));
        assert_eq!(s.len(), 1);
        s.reset();
        assert!(s.is_empty());
        assert!(s.on_tick().is_empty());
        assert!(!s.needs_identity(TEST_ADDRESS));
    }
}
