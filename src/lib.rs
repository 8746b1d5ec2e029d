//! `meeblue-ranger` library.
//!
//! The binary (`src/main.rs`) is responsible for CLI parsing, logging setup and
//! process exit codes. Beacon decoding, target matching, RSSI smoothing and
//! distance estimation are pure and live in their own modules; [`crate::session`]
//! ties them together and [`crate::app`] drives a session from a scanner.

pub mod advertisement;
pub mod app;
pub mod beacon;
pub mod distance;
pub mod history;
pub mod interval;
pub mod output;
pub mod scanner;
pub mod session;
pub mod target;

#[cfg(test)]
mod test_utils;

// Re-export commonly used types at the crate root
pub use advertisement::{AdvertisementEvent, SourceEvent};
pub use beacon::{
    BeaconIdentity, DecodeFailure, decode_characteristic_payload, decode_manufacturer_payload,
    encode_characteristic_payload, encode_manufacturer_payload,
};
pub use distance::{PathLossModel, estimate_distance};
pub use history::RssiHistory;
pub use output::influxdb::InfluxDbFormatter;
pub use output::text::TextFormatter;
pub use output::{OutputFormat, OutputFormatter};
pub use scanner::{Backend, GattTarget, ScanError, ScanHandle, SourceResult};
pub use session::{Notification, ScanSession, SessionConfig, SmoothedReading};
pub use target::{TargetFilter, is_target};
