//! ---
//! tgw_section: "02-messaging-data-model"
//! tgw_subsection: "module"
//! tgw_type: "source"
//! tgw_scope: "code"
//! tgw_description: "Measurement data model and payload codecs."
//! tgw_version: "v0.1.0"
//! tgw_owner: "tbd"
//! ---
//! Decoder for the Temperature Measurement characteristic.
//!
//! Layout: byte 0 is the flags byte (bit 0 set means Fahrenheit), bytes 1..=2
//! carry a little-endian `u16` raw value. Anything after byte 2 is ignored.

use chrono::{DateTime, Utc};

use crate::types::{DiscoveredDevice, Measurement, TemperatureUnit};

/// Minimum number of bytes in a measurement notification.
pub const MEASUREMENT_PAYLOAD_LEN: usize = 3;

/// Flags bit selecting Fahrenheit.
pub const FAHRENHEIT_FLAG: u8 = 0x01;

/// Errors raised while decoding a notification payload.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    /// The payload is shorter than the fixed layout.
    #[error("malformed measurement payload: expected at least {expected} bytes, got {actual}")]
    MalformedPayload {
        /// Required length.
        expected: usize,
        /// Length actually received.
        actual: usize,
    },
}

/// Value and unit extracted from one payload.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DecodedTemperature {
    pub value: f64,
    pub unit: TemperatureUnit,
}

/// Stateless codec for measurement payloads.
#[derive(Debug, Clone, Copy, Default)]
pub struct MeasurementCodec;

impl MeasurementCodec {
    /// Decode the raw notification bytes.
    pub fn decode(raw: &[u8]) -> Result<DecodedTemperature, CodecError> {
        let [flags, low, high, ..] = *raw else {
            return Err(CodecError::MalformedPayload {
                expected: MEASUREMENT_PAYLOAD_LEN,
                actual: raw.len(),
            });
        };
        let raw_value = f64::from(u16::from_le_bytes([low, high]));
        let decoded = if flags & FAHRENHEIT_FLAG == 0 {
            DecodedTemperature {
                value: raw_value,
                unit: TemperatureUnit::Celsius,
            }
        } else {
            DecodedTemperature {
                value: raw_value * 9.0 / 5.0 + 32.0,
                unit: TemperatureUnit::Fahrenheit,
            }
        };
        Ok(decoded)
    }

    /// Decode a notification received from `device` into a [`Measurement`].
    pub fn measurement(
        device: &DiscoveredDevice,
        raw: &[u8],
        observed_at: DateTime<Utc>,
    ) -> Result<Measurement, CodecError> {
        let decoded = Self::decode(raw)?;
        Ok(Measurement::new(
            device,
            decoded.value,
            decoded.unit,
            observed_at,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn celsius_raw_value_is_reported_unmodified() {
        let decoded = MeasurementCodec::decode(&[0x00, 0xFA, 0x00]).unwrap();
        assert_eq!(decoded.value, 250.0);
        assert_eq!(decoded.unit, TemperatureUnit::Celsius);
    }

    #[test]
    fn fahrenheit_flag_converts_raw_value() {
        let decoded = MeasurementCodec::decode(&[0x01, 0xFA, 0x00]).unwrap();
        assert_eq!(decoded.value, 482.0);
        assert_eq!(decoded.unit, TemperatureUnit::Fahrenheit);
    }

    #[test]
    fn only_bit_zero_selects_the_unit() {
        let decoded = MeasurementCodec::decode(&[0xFE, 0x10, 0x00]).unwrap();
        assert_eq!(decoded.unit, TemperatureUnit::Celsius);
        assert_eq!(decoded.value, 16.0);
    }

    #[test]
    fn raw_value_is_little_endian() {
        let decoded = MeasurementCodec::decode(&[0x00, 0x34, 0x12]).unwrap();
        assert_eq!(decoded.value, f64::from(0x1234u16));
    }

    #[test]
    fn trailing_bytes_are_ignored() {
        let decoded = MeasurementCodec::decode(&[0x00, 0x19, 0x00, 0xAA, 0xBB, 0xCC]).unwrap();
        assert_eq!(decoded.value, 25.0);
    }

    #[test]
    fn short_payloads_are_malformed() {
        for raw in [&[][..], &[0x00][..], &[0x01, 0xFA][..]] {
            assert_eq!(
                MeasurementCodec::decode(raw),
                Err(CodecError::MalformedPayload {
                    expected: 3,
                    actual: raw.len()
                })
            );
        }
    }

    #[test]
    fn measurement_carries_device_identity() {
        let device = DiscoveredDevice::new(Some("Thermo1".into()), "AA:BB:CC:DD:EE:FF");
        let at = Utc::now();
        let measurement = MeasurementCodec::measurement(&device, &[0x01, 0xFA, 0x00], at).unwrap();
        assert_eq!(measurement.device_name(), "Thermo1");
        assert_eq!(measurement.device_address().as_str(), "AA:BB:CC:DD:EE:FF");
        assert_eq!(measurement.value(), 482.0);
        assert_eq!(measurement.unit(), TemperatureUnit::Fahrenheit);
        assert_eq!(measurement.observed_at(), at);
    }

    #[test]
    fn malformed_payload_never_yields_a_measurement() {
        let device = DiscoveredDevice::new(None, "AA:BB:CC:DD:EE:FF");
        assert!(MeasurementCodec::measurement(&device, &[0x00, 0x01], Utc::now()).is_err());
    }
}
