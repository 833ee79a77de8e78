//! ---
//! tgw_section: "02-messaging-data-model"
//! tgw_subsection: "module"
//! tgw_type: "source"
//! tgw_scope: "code"
//! tgw_description: "Measurement data model and payload codecs."
//! tgw_version: "v0.1.0"
//! tgw_owner: "tbd"
//! ---
use serde::{Deserialize, Serialize};
use thermo_gw_common::time::unix_seconds;

use crate::types::{Measurement, TemperatureUnit};

/// Broker topic for a device: `{device_name}/temp/{device_address}`, without escaping.
pub fn topic_for(device_name: &str, device_address: &str) -> String {
    format!("{}/temp/{}", device_name, device_address)
}

/// Broker topic for the device that produced `measurement`.
pub fn measurement_topic(measurement: &Measurement) -> String {
    topic_for(
        measurement.device_name(),
        measurement.device_address().as_str(),
    )
}

/// JSON record published for every measurement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeasurementRecord {
    pub device_name: String,
    pub device_address: String,
    pub temperature: f64,
    pub unit: TemperatureUnit,
    /// Seconds since the Unix epoch.
    pub timestamp: f64,
}

impl From<&Measurement> for MeasurementRecord {
    fn from(measurement: &Measurement) -> Self {
        Self {
            device_name: measurement.device_name().to_owned(),
            device_address: measurement.device_address().to_string(),
            temperature: measurement.value(),
            unit: measurement.unit(),
            timestamp: unix_seconds(measurement.observed_at()),
        }
    }
}

/// Topic and serialized body ready for a publisher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    pub topic: String,
    pub payload: Vec<u8>,
}

impl OutboundMessage {
    /// Encode `measurement` as a JSON record addressed to its device topic.
    pub fn from_measurement(measurement: &Measurement) -> crate::Result<Self> {
        let payload = serde_json::to_vec(&MeasurementRecord::from(measurement))?;
        Ok(Self {
            topic: measurement_topic(measurement),
            payload,
        })
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::*;
    use crate::codec::MeasurementCodec;
    use crate::types::DiscoveredDevice;

    #[test]
    fn topic_is_literal_and_unescaped() {
        assert_eq!(
            topic_for("Thermo1", "AA:BB:CC:DD:EE:FF"),
            "Thermo1/temp/AA:BB:CC:DD:EE:FF"
        );
        assert_eq!(topic_for("a/b #", "x+y"), "a/b #/temp/x+y");
    }

    #[test]
    fn payload_has_exactly_the_documented_fields() {
        let device = DiscoveredDevice::new(Some("Thermo1".into()), "AA:BB:CC:DD:EE:FF");
        let at = Utc.timestamp_millis_opt(1_700_000_000_500).unwrap();
        let measurement = MeasurementCodec::measurement(&device, &[0x01, 0xFA, 0x00], at).unwrap();

        let outbound = OutboundMessage::from_measurement(&measurement).unwrap();
        assert_eq!(outbound.topic, "Thermo1/temp/AA:BB:CC:DD:EE:FF");

        let value: serde_json::Value = serde_json::from_slice(&outbound.payload).unwrap();
        let object = value.as_object().unwrap();
        let mut keys: Vec<_> = object.keys().map(String::as_str).collect();
        keys.sort_unstable();
        assert_eq!(
            keys,
            ["device_address", "device_name", "temperature", "timestamp", "unit"]
        );
        assert_eq!(object["device_name"], "Thermo1");
        assert_eq!(object["device_address"], "AA:BB:CC:DD:EE:FF");
        assert_eq!(object["temperature"], 482.0);
        assert_eq!(object["unit"], "Fahrenheit");
        assert_eq!(object["timestamp"], 1_700_000_000.5);
    }
}
