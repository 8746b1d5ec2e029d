//! Output formatters for session notifications.
//!
//! This module provides a trait for turning [`Notification`]s into output lines
//! and implementations for plain text (for people watching a terminal) and
//! InfluxDB line protocol (for Telegraf `execd` and similar collectors).

pub mod influxdb;
pub mod text;

use crate::session::Notification;
use influxdb::InfluxDbFormatter;
use text::TextFormatter;

/// Trait for formatting notifications into output lines.
pub trait OutputFormatter: Send + Sync {
    /// Format a notification as a single line, without the trailing newline.
    fn format(&self, notification: &Notification) -> String;
}

/// Output formats selectable on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable lines
    #[default]
    Text,
    /// InfluxDB line protocol
    Influxdb,
}

impl OutputFormat {
    /// Build the formatter for this format.
    ///
    /// `measurement` is only used by the InfluxDB formatter.
    pub fn formatter(self, measurement: &str) -> Box<dyn OutputFormatter> {
        match self {
            OutputFormat::Text => Box::new(TextFormatter),
            OutputFormat::Influxdb => Box::new(InfluxDbFormatter::new(measurement.to_string())),
        }
    }
}
