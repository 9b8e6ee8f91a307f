use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Keys for auxiliary telemetry fields carried on a [`Position`].
///
/// Kept as a closed enumeration rather than free-form strings so a typo in
/// a producer can't silently mint a new field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Attribute {
    /// Alarm condition raised by the device (e.g. `sos`, `overspeed`).
    Alarm,
    /// Coarse (non-GPS) fix.
    Approximate,
    /// Battery charge, percent.
    BatteryLevel,
    /// External power connected.
    Charge,
    /// GPS availability token from signal reports.
    Gps,
    /// Horizontal dilution of precision.
    Hdop,
    /// Signal strength.
    Rssi,
    /// Satellites in use.
    Satellites,
    /// Satellites in view.
    SatellitesVisible,
    /// Status token: command result or firmware version.
    Status,
    /// Raw sentence-type marker, for downstream provenance.
    Type,
}

/// Value of an auxiliary telemetry field.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum AttributeValue {
    Bool(bool),
    Integer(i64),
    Float(f64),
    Text(String),
}

impl From<bool> for AttributeValue {
    fn from(value: bool) -> Self {
        AttributeValue::Bool(value)
    }
}

impl From<i64> for AttributeValue {
    fn from(value: i64) -> Self {
        AttributeValue::Integer(value)
    }
}

impl From<i32> for AttributeValue {
    fn from(value: i32) -> Self {
        AttributeValue::Integer(i64::from(value))
    }
}

impl From<u32> for AttributeValue {
    fn from(value: u32) -> Self {
        AttributeValue::Integer(i64::from(value))
    }
}

impl From<f64> for AttributeValue {
    fn from(value: f64) -> Self {
        AttributeValue::Float(value)
    }
}

impl From<&str> for AttributeValue {
    fn from(value: &str) -> Self {
        AttributeValue::Text(value.to_string())
    }
}

impl From<String> for AttributeValue {
    fn from(value: String) -> Self {
        AttributeValue::Text(value)
    }
}

/// A decoded telemetry record.
///
/// Records are fully populated by the decoder and returned whole, or not
/// produced at all; nothing downstream ever sees a partial record.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Position {
    pub protocol: String,
    pub device_id: u64,
    /// Device time for fix sentences, receive time otherwise.
    pub timestamp: DateTime<Utc>,
    pub valid: bool,
    /// Decimal degrees.
    pub latitude: f64,
    /// Decimal degrees.
    pub longitude: f64,
    /// Canonical speed unit; wire units are converted during decoding.
    pub speed_knots: f64,
    pub course_degrees: f64,
    pub altitude_meters: f64,
    pub attributes: BTreeMap<Attribute, AttributeValue>,
}

impl Position {
    pub fn new(protocol: &str, device_id: u64, timestamp: DateTime<Utc>) -> Self {
        Self {
            protocol: protocol.to_string(),
            device_id,
            timestamp,
            valid: false,
            latitude: 0.0,
            longitude: 0.0,
            speed_knots: 0.0,
            course_degrees: 0.0,
            altitude_meters: 0.0,
            attributes: BTreeMap::new(),
        }
    }

    pub fn set(&mut self, key: Attribute, value: impl Into<AttributeValue>) {
        self.attributes.insert(key, value.into());
    }

    pub fn get(&self, key: Attribute) -> Option<&AttributeValue> {
        self.attributes.get(&key)
    }

    /// Course in degrees, normalized to [0, 360]; out-of-range parsed
    /// values collapse to 0.
    pub fn set_course(&mut self, course_degrees: f64) {
        self.course_degrees = if course_degrees > 360.0 {
            0.0
        } else {
            course_degrees
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn position() -> Position {
        Position::new("minifinder", 1, DateTime::UNIX_EPOCH)
    }

    #[test]
    fn test_course_above_360_collapses_to_zero() {
        let mut position = position();
        position.set_course(361.5);
        assert_eq!(position.course_degrees, 0.0);
    }

    #[test]
    fn test_course_in_range_passes_through() {
        let mut position = position();
        position.set_course(360.0);
        assert_eq!(position.course_degrees, 360.0);
        position.set_course(0.0);
        assert_eq!(position.course_degrees, 0.0);
        position.set_course(179.25);
        assert_eq!(position.course_degrees, 179.25);
    }

    #[test]
    fn test_attribute_values_serialize_untagged() {
        let mut position = position();
        position.set(Attribute::BatteryLevel, 41);
        position.set(Attribute::Charge, true);
        position.set(Attribute::Hdop, 1.6);
        position.set(Attribute::Status, "ok");

        let json = serde_json::to_value(&position).unwrap();
        let attributes = &json["attributes"];
        assert_eq!(attributes["batteryLevel"], 41);
        assert_eq!(attributes["charge"], true);
        assert_eq!(attributes["hdop"], 1.6);
        assert_eq!(attributes["status"], "ok");
    }

    #[test]
    fn test_set_overwrites_previous_value() {
        let mut position = position();
        position.set(Attribute::Alarm, "fault");
        position.set(Attribute::Alarm, "sos");
        assert_eq!(
            position.get(Attribute::Alarm),
            Some(&AttributeValue::Text("sos".to_string()))
        );
    }
}
