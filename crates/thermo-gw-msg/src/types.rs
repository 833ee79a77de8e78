//! ---
//! tgw_section: "02-messaging-data-model"
//! tgw_subsection: "module"
//! tgw_type: "source"
//! tgw_scope: "code"
//! tgw_description: "Measurement data model and payload codecs."
//! tgw_version: "v0.1.0"
//! tgw_owner: "tbd"
//! ---
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Name recorded for peripherals that do not advertise one.
pub const UNKNOWN_DEVICE_NAME: &str = "Unknown";

/// Opaque transport identifier of a peripheral (a MAC-style address on Linux).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceAddress(String);

impl DeviceAddress {
    /// Wrap a transport identifier.
    pub fn new(address: impl Into<String>) -> Self {
        Self(address.into())
    }

    /// Borrow the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DeviceAddress {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for DeviceAddress {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Peripheral seen during a discovery sweep that advertises the target service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveredDevice {
    /// Advertised local name, or [`UNKNOWN_DEVICE_NAME`].
    pub name: String,
    /// Unique key of the device within a sweep.
    pub address: DeviceAddress,
}

impl DiscoveredDevice {
    /// Build a device record, substituting [`UNKNOWN_DEVICE_NAME`] for a missing or empty name.
    pub fn new(name: Option<String>, address: impl Into<DeviceAddress>) -> Self {
        let name = name
            .filter(|name| !name.trim().is_empty())
            .unwrap_or_else(|| UNKNOWN_DEVICE_NAME.to_owned());
        Self {
            name,
            address: address.into(),
        }
    }
}

impl fmt::Display for DiscoveredDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.address)
    }
}

/// Unit carried by a temperature measurement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TemperatureUnit {
    /// Flags bit 0 cleared.
    Celsius,
    /// Flags bit 0 set.
    Fahrenheit,
}

impl TemperatureUnit {
    /// Label used in broker payloads.
    pub fn as_str(&self) -> &'static str {
        match self {
            TemperatureUnit::Celsius => "Celsius",
            TemperatureUnit::Fahrenheit => "Fahrenheit",
        }
    }
}

impl fmt::Display for TemperatureUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One temperature reading captured from one notification.
///
/// Only [`crate::codec::MeasurementCodec`] constructs values of this type; there are
/// no setters.
#[derive(Debug, Clone, PartialEq)]
pub struct Measurement {
    device_name: String,
    device_address: DeviceAddress,
    value: f64,
    unit: TemperatureUnit,
    observed_at: DateTime<Utc>,
}

impl Measurement {
    pub(crate) fn new(
        device: &DiscoveredDevice,
        value: f64,
        unit: TemperatureUnit,
        observed_at: DateTime<Utc>,
    ) -> Self {
        Self {
            device_name: device.name.clone(),
            device_address: device.address.clone(),
            value,
            unit,
            observed_at,
        }
    }

    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    pub fn device_address(&self) -> &DeviceAddress {
        &self.device_address
    }

    pub fn value(&self) -> f64 {
        self.value
    }

    pub fn unit(&self) -> TemperatureUnit {
        self.unit
    }

    pub fn observed_at(&self) -> DateTime<Utc> {
        self.observed_at
    }
}
