//! Core application runner for `meeblue-ranger`.
//!
//! This module is decoupled from CLI parsing and process exit codes so it can
//! be tested deterministically with an injected scanner and output streams.

use crate::advertisement::SourceEvent;
use crate::distance::{DEFAULT_ENVIRONMENTAL_FACTOR, DEFAULT_TX_POWER_AT_1M, PathLossModel};
use crate::history::MAX_HISTORY;
use crate::output::{OutputFormat, OutputFormatter};
use crate::scanner::{Backend, GattTarget, ScanError, ScanHandle};
use crate::session::{Notification, ScanSession, SessionConfig};
use crate::target::TargetFilter;
use clap::Parser;
use log::{debug, info, warn};
use std::collections::HashSet;
use std::future::Future;
use std::io;
use std::io::Write;
use std::pin::Pin;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc::error::TrySendError;
use tokio::time::{self, Instant, MissedTickBehavior};
use uuid::Uuid;

/// Configuration for the core run loop.
#[derive(Parser, Debug, Clone)]
#[command(author, about, version)]
pub struct Options {
    /// Address of a beacon to track even if its name does not contain "meeblue".
    /// May be given several times.
    #[arg(long = "device", value_parser = crate::target::parse_device_address, value_name = "ADDRESS")]
    pub devices: Vec<String>,

    /// How often smoothed readings are printed, between 250ms and 5s.
    #[arg(long, default_value = "5s", value_parser = crate::interval::parse_tick_interval)]
    pub interval: Duration,

    /// Stop after this long. Runs until interrupted if not given.
    /// Accepts duration with suffix: 30s, 1m, 500ms, 2h.
    #[arg(long, value_parser = crate::interval::parse_duration)]
    pub timeout: Option<Duration>,

    /// Expected RSSI at 1 meter, in dBm.
    #[arg(long, default_value_t = DEFAULT_TX_POWER_AT_1M, allow_hyphen_values = true)]
    pub tx_power: i32,

    /// Path-loss exponent of the environment (2.0 is free space).
    #[arg(
        long,
        default_value_t = DEFAULT_ENVIRONMENTAL_FACTOR,
        value_parser = crate::distance::parse_environmental_factor
    )]
    pub environmental_factor: f64,

    /// Number of recent RSSI samples the median is taken over.
    #[arg(long, default_value_t = MAX_HISTORY, value_parser = crate::history::parse_window_size)]
    pub history_size: usize,

    /// Bluetooth scanner backend to use
    #[arg(long, default_value_t, value_enum)]
    pub backend: Backend,

    /// Output format
    #[arg(long, default_value_t, value_enum)]
    pub format: OutputFormat,

    /// The name of the measurement in InfluxDB line protocol.
    #[arg(long, default_value = "beacon")]
    pub influxdb_measurement: String,

    /// GATT service holding the beacon identity characteristic.
    /// Enables identity reads over GATT (bluer backend only).
    #[arg(long, requires = "gatt_characteristic", value_name = "UUID")]
    pub gatt_service: Option<Uuid>,

    /// GATT characteristic holding the beacon identity.
    #[arg(long, requires = "gatt_service", value_name = "UUID")]
    pub gatt_characteristic: Option<Uuid>,

    /// Verbose output, log skipped payloads and device tracking
    #[arg(short = 'v', long = "verbose")]
    pub verbose: bool,
}

impl Options {
    /// Session configuration derived from the command line.
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            targets: TargetFilter::new(self.devices.iter().cloned()),
            model: PathLossModel {
                tx_power_at_1m: self.tx_power,
                environmental_factor: self.environmental_factor,
            },
            history_size: self.history_size,
        }
    }

    pub fn gatt_target(&self) -> Option<GattTarget> {
        Some(GattTarget {
            service: self.gatt_service?,
            characteristic: self.gatt_characteristic?,
        })
    }
}

/// Errors returned by the core run loop.
#[derive(Error, Debug)]
pub enum RunError {
    #[error(transparent)]
    Scan(#[from] ScanError),
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Scanner abstraction to enable deterministic unit tests without Bluetooth hardware.
pub trait Scanner: Send + Sync {
    fn start_scan(
        &self,
        backend: Backend,
        gatt: Option<GattTarget>,
    ) -> Pin<Box<dyn Future<Output = Result<ScanHandle, ScanError>> + Send + '_>>;
}

/// Real scanner implementation that delegates to the compiled-in backends.
#[derive(Debug, Default, Clone, Copy)]
pub struct RealScanner;

impl Scanner for RealScanner {
    fn start_scan(
        &self,
        backend: Backend,
        gatt: Option<GattTarget>,
    ) -> Pin<Box<dyn Future<Output = Result<ScanHandle, ScanError>> + Send + '_>> {
        Box::pin(async move { crate::scanner::start_scan(backend, gatt).await })
    }
}

fn write_notification(
    formatter: &dyn OutputFormatter,
    notification: &Notification,
    out: &mut dyn Write,
) -> io::Result<()> {
    let line = formatter.format(notification);
    writeln!(out, "{line}")
}

/// Write a transport failure as a session error and end the run with it.
fn report_session_error(
    formatter: &dyn OutputFormatter,
    scan_err: ScanError,
    err: &mut dyn Write,
) -> Result<(), RunError> {
    let notification = Notification::SessionError(scan_err.to_string());
    write_notification(formatter, &notification, err)?;
    Err(scan_err.into())
}

/// Ask the GATT worker for an identity read, at most once per device.
fn request_identity(
    handle: &ScanHandle,
    session: &ScanSession,
    requested: &mut HashSet<String>,
    address: &str,
) {
    let Some(requests) = &handle.gatt_requests else {
        return;
    };
    if !session.needs_identity(address) || requested.contains(address) {
        return;
    }

    match requests.try_send(address.to_string()) {
        Ok(()) => {
            requested.insert(address.to_string());
        }
        // Retried on the next advertisement from this device
        Err(TrySendError::Full(_)) => debug!("{address}: GATT request queue full"),
        Err(TrySendError::Closed(_)) => warn!("GATT worker stopped"),
    }
}

/// Run the scan session, writing formatted notifications to `out` and
/// transport errors to `err`.
///
/// - Advertisements and characteristic values update the session; newly
///   identified beacons are written immediately.
/// - Every `options.interval` the smoothed reading of each tracked device is
///   written.
/// - The loop ends when the scanner closes its channel, when
///   `options.timeout` elapses, or on the first transport error, which is
///   written as a session error and returned.
pub async fn run_with_io(
    options: Options,
    scanner: &dyn Scanner,
    out: &mut dyn Write,
    err: &mut dyn Write,
) -> Result<(), RunError> {
    let formatter = options.format.formatter(&options.influxdb_measurement);
    let mut session = ScanSession::new(options.session_config());
    let mut requested = HashSet::new();

    let mut handle = match scanner
        .start_scan(options.backend, options.gatt_target())
        .await
    {
        Ok(handle) => handle,
        Err(scan_err) => return report_session_error(formatter.as_ref(), scan_err, err),
    };
    info!("scanning with the {} backend", options.backend);

    let mut ticker = time::interval_at(Instant::now() + options.interval, options.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let deadline = options.timeout.map(|timeout| Instant::now() + timeout);
    let timeout = async move {
        match deadline {
            Some(deadline) => time::sleep_until(deadline).await,
            None => std::future::pending().await,
        }
    };
    tokio::pin!(timeout);

    loop {
        tokio::select! {
            biased;

            _ = &mut timeout => {
                info!("session timeout reached, stopping");
                break;
            }

            result = handle.events.recv() => {
                let Some(result) = result else {
                    debug!("scanner closed its event channel");
                    break;
                };

                match result {
                    Ok(SourceEvent::Advertisement(event)) => {
                        if let Some(n) = session.on_advertisement(&event) {
                            write_notification(formatter.as_ref(), &n, out)?;
                        }
                        request_identity(&handle, &session, &mut requested, &event.address);
                    }
                    Ok(SourceEvent::Characteristic { address, payload }) => {
                        if let Some(n) = session.on_characteristic(&address, &payload) {
                            write_notification(formatter.as_ref(), &n, out)?;
                        }
                    }
                    Err(scan_err) => {
                        return report_session_error(formatter.as_ref(), scan_err, err);
                    }
                }
            }

            _ = ticker.tick() => {
                for reading in session.on_tick() {
                    write_notification(
                        formatter.as_ref(),
                        &Notification::SmoothedReading(reading),
                        out,
                    )?;
                }
            }
        }
    }

    session.reset();
    Ok(())
}
