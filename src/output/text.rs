//! Plain text output formatter.

use crate::output::OutputFormatter;
use crate::session::Notification;

/// Formats notifications as short human-readable lines:
///
/// ```text
/// AA:BB:CC:DD:EE:FF - -60 dB - 10.00 m
/// ```
#[derive(Debug, Default, Clone, Copy)]
pub struct TextFormatter;

impl OutputFormatter for TextFormatter {
    fn format(&self, notification: &Notification) -> String {
        match notification {
            Notification::IdentityDiscovered { address, identity } => format!(
                "{} - beacon {} major {} minor {} tx {} dBm",
                address, identity.uuid, identity.major, identity.minor, identity.tx_power
            ),
            Notification::SmoothedReading(reading) => format!(
                "{} - {} dB - {:.2} m",
                reading.address, reading.rssi, reading.distance
            ),
            Notification::SessionError(message) => format!("error: {message}"),
        }
    }
}
