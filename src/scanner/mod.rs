//! BLE advertisement sources.
//!
//! Each backend turns what the platform reports into [`SourceEvent`]s on a
//! single channel, so the session loop never knows which backend is running.
//! Transport failures travel on the same channel as `Err` values.

#[cfg(feature = "bluer")]
pub mod bluer;

#[cfg(feature = "hci")]
pub mod hci;

use crate::advertisement::SourceEvent;
use thiserror::Error;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Error type for scanner operations.
#[derive(Error, Debug)]
pub enum ScanError {
    /// Bluetooth/adapter related error
    #[error("Bluetooth error: {0}")]
    Bluetooth(String),
    /// The device does not expose the configured identity characteristic
    #[error("characteristic {characteristic} of service {service} not found")]
    CharacteristicNotFound { service: Uuid, characteristic: Uuid },
}

/// Events (or transport errors) produced by a backend.
pub type SourceResult = Result<SourceEvent, ScanError>;

/// Channel buffer size for source events.
pub const SOURCE_CHANNEL_BUFFER_SIZE: usize = 100;

/// Channel buffer size for pending GATT read requests.
pub const GATT_REQUEST_BUFFER_SIZE: usize = 16;

/// Bluetooth manufacturer-specific data type (AD type 0xFF)
pub const MANUFACTURER_DATA_TYPE: u8 = 0xff;

/// GATT service and characteristic holding the beacon identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GattTarget {
    pub service: Uuid,
    pub characteristic: Uuid,
}

/// A running scan.
#[derive(Debug)]
pub struct ScanHandle {
    /// Advertisements, characteristic values and transport errors
    pub events: mpsc::Receiver<SourceResult>,
    /// Addresses to read the identity characteristic from.
    ///
    /// `None` when GATT reads were not requested or the backend cannot do
    /// them. Results arrive on `events` as [`SourceEvent::Characteristic`].
    pub gatt_requests: Option<mpsc::Sender<String>>,
}

/// Available scanner backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Backend {
    /// BlueZ D-Bus backend (requires bluetoothd daemon)
    #[cfg(feature = "bluer")]
    Bluer,
    /// Raw HCI socket backend (direct kernel access, no daemon required)
    #[cfg(feature = "hci")]
    Hci,
}

impl Default for Backend {
    fn default() -> Self {
        #[cfg(feature = "bluer")]
        return Backend::Bluer;
        #[cfg(all(feature = "hci", not(feature = "bluer")))]
        return Backend::Hci;
        #[cfg(not(any(feature = "bluer", feature = "hci")))]
        compile_error!("At least one backend feature must be enabled");
    }
}

impl std::fmt::Display for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            #[cfg(feature = "bluer")]
            Backend::Bluer => write!(f, "bluer"),
            #[cfg(feature = "hci")]
            Backend::Hci => write!(f, "hci"),
            #[cfg(not(any(feature = "bluer", feature = "hci")))]
            _ => unreachable!("Backend enum has no variants when no backend features are enabled"),
        }
    }
}

impl std::str::FromStr for Backend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            #[cfg(feature = "bluer")]
            "bluer" | "bluez" => Ok(Backend::Bluer),
            #[cfg(feature = "hci")]
            "hci" | "raw" => Ok(Backend::Hci),
            _ => Err(format!("Unknown backend: {}", s)),
        }
    }
}

/// Start scanning with the specified backend.
///
/// # Arguments
/// * `backend` - The scanner backend to use
/// * `gatt` - Characteristic to read identities from, if any
pub async fn start_scan(
    backend: Backend,
    gatt: Option<GattTarget>,
) -> Result<ScanHandle, ScanError> {
    match backend {
        #[cfg(feature = "bluer")]
        Backend::Bluer => bluer::start_scan(gatt).await,
        #[cfg(feature = "hci")]
        Backend::Hci => {
            if gatt.is_some() {
                log::warn!("GATT identity reads are not supported by the hci backend");
            }
            hci::start_scan().await
        }
    }
}
