//! RSSI to distance conversion.
//!
//! Uses the log-distance path-loss model:
//! `distance = 10 ^ ((tx_power_at_1m - rssi) / (10 * n))`

/// Expected RSSI at 1 m, in dBm.
pub const DEFAULT_TX_POWER_AT_1M: i32 = -40;

/// Path-loss exponent; 2.0 is free space.
pub const DEFAULT_ENVIRONMENTAL_FACTOR: f64 = 2.0;

/// Returned when there is no usable reading (RSSI of exactly 0).
pub const INVALID_DISTANCE: f64 = -1.0;

/// Estimate the distance in meters for an RSSI reading.
///
/// An `rssi` of 0 means "no reading" and yields [`INVALID_DISTANCE`].
pub fn estimate_distance(rssi: i32, tx_power_at_1m: i32, environmental_factor: f64) -> f64 {
    if rssi == 0 {
        return INVALID_DISTANCE;
    }

    let ratio = f64::from(tx_power_at_1m - rssi) / (10.0 * environmental_factor);
    10f64.powf(ratio)
}

/// Calibration constants for [`estimate_distance`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PathLossModel {
    pub tx_power_at_1m: i32,
    pub environmental_factor: f64,
}

impl Default for PathLossModel {
    fn default() -> Self {
        Self {
            tx_power_at_1m: DEFAULT_TX_POWER_AT_1M,
            environmental_factor: DEFAULT_ENVIRONMENTAL_FACTOR,
        }
    }
}

impl PathLossModel {
    pub fn estimate(&self, rssi: i32) -> f64 {
        estimate_distance(rssi, self.tx_power_at_1m, self.environmental_factor)
    }
}

/// Parse an `--environmental-factor` value.
///
/// The exponent divides the path loss, so it must be finite and positive.
pub fn parse_environmental_factor(src: &str) -> Result<f64, String> {
    let factor: f64 = src
        .trim()
        .parse()
        .map_err(|_| format!("invalid environmental factor: {}", src))?;

    if !factor.is_finite() || factor <= 0.0 {
        return Err(format!(
            "environmental factor must be a finite number above 0, got {}",
            src.trim()
        ));
    }

    Ok(factor)
}
