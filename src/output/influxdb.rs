//! InfluxDB line protocol output formatter.

use crate::output::OutputFormatter;
use crate::session::{Notification, SmoothedReading};
use std::collections::BTreeMap;
use std::fmt;
use std::time::SystemTime;

/// Field values for InfluxDB line protocol
#[derive(Debug, PartialEq)]
pub enum FieldValue {
    Float(f64),
    Integer(i64),
    String(String),
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            FieldValue::Float(num) => write!(f, "{num}"),
            FieldValue::Integer(num) => write!(f, "{num}i"),
            FieldValue::String(s) => {
                write!(f, "\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\""))
            }
        }
    }
}

/// Data point in InfluxDB line protocol
#[derive(Debug)]
pub struct DataPoint {
    pub measurement: String,
    pub tag_set: BTreeMap<String, String>,
    pub field_set: BTreeMap<String, FieldValue>,
    pub timestamp: Option<SystemTime>,
}

/// Escape commas, equals signs and spaces in tag values.
fn escape_tag(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, ',' | '=' | ' ') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

fn fmt_tags(data_point: &DataPoint, fmt: &mut fmt::Formatter) -> fmt::Result {
    for (key, value) in data_point.tag_set.iter() {
        write!(fmt, ",{}={}", key, escape_tag(value))?;
    }
    Ok(())
}

fn fmt_fields(data_point: &DataPoint, fmt: &mut fmt::Formatter) -> fmt::Result {
    let mut first = true;
    for (key, value) in data_point.field_set.iter() {
        if first {
            first = false;
        } else {
            write!(fmt, ",")?;
        }
        write!(fmt, "{}={}", key, value)?;
    }
    Ok(())
}

fn fmt_timestamp(data_point: &DataPoint, fmt: &mut fmt::Formatter) -> fmt::Result {
    // Pre-epoch timestamps are left out rather than written as garbage
    if let Some(nanos) = data_point
        .timestamp
        .and_then(|time| time.duration_since(SystemTime::UNIX_EPOCH).ok())
        .map(|elapsed| elapsed.as_nanos())
    {
        write!(fmt, " {}", nanos)?;
    }
    Ok(())
}

impl fmt::Display for DataPoint {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        write!(fmt, "{}", self.measurement)?;
        fmt_tags(self, fmt)?;
        write!(fmt, " ")?;
        fmt_fields(self, fmt)?;
        fmt_timestamp(self, fmt)
    }
}

/// InfluxDB line protocol formatter.
///
/// Readings are written to the configured measurement, identities to
/// `<measurement>_identity` and transport errors to `<measurement>_error`.
pub struct InfluxDbFormatter {
    measurement_name: String,
}

impl InfluxDbFormatter {
    pub fn new(measurement_name: String) -> Self {
        Self { measurement_name }
    }

    fn address_tags(address: &str) -> BTreeMap<String, String> {
        let mut tags = BTreeMap::new();
        tags.insert("address".to_string(), address.to_string());
        tags
    }

    fn reading_point(&self, reading: &SmoothedReading) -> DataPoint {
        let mut fields = BTreeMap::new();
        fields.insert("rssi".into(), FieldValue::Integer(i64::from(reading.rssi)));
        fields.insert("distance".into(), FieldValue::Float(reading.distance));

        DataPoint {
            measurement: self.measurement_name.clone(),
            tag_set: Self::address_tags(&reading.address),
            field_set: fields,
            timestamp: Some(reading.timestamp),
        }
    }

    fn to_data_point(&self, notification: &Notification) -> DataPoint {
        match notification {
            Notification::SmoothedReading(reading) => self.reading_point(reading),
            Notification::IdentityDiscovered { address, identity } => {
                let mut tags = Self::address_tags(address);
                tags.insert("uuid".to_string(), identity.uuid.to_string());

                let mut fields = BTreeMap::new();
                fields.insert("major".into(), FieldValue::Integer(identity.major.into()));
                fields.insert("minor".into(), FieldValue::Integer(identity.minor.into()));
                fields.insert(
                    "tx_power".into(),
                    FieldValue::Integer(identity.tx_power.into()),
                );

                DataPoint {
                    measurement: format!("{}_identity", self.measurement_name),
                    tag_set: tags,
                    field_set: fields,
                    timestamp: None,
                }
            }
            Notification::SessionError(message) => {
                let mut fields = BTreeMap::new();
                fields.insert("message".into(), FieldValue::String(message.clone()));

                DataPoint {
                    measurement: format!("{}_error", self.measurement_name),
                    tag_set: BTreeMap::new(),
                    field_set: fields,
                    timestamp: None,
                }
            }
        }
    }
}

impl OutputFormatter for InfluxDbFormatter {
    fn format(&self, notification: &Notification) -> String {
        format!("{}", self.to_data_point(notification))
    }
}
