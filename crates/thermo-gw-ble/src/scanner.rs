//! ---
//! tgw_section: "05-networking-external-interfaces"
//! tgw_subsection: "module"
//! tgw_type: "source"
//! tgw_scope: "code"
//! tgw_description: "Bluetooth LE discovery and device sessions."
//! tgw_version: "v0.1.0"
//! tgw_owner: "tbd"
//! ---
use std::sync::Arc;
use std::time::Duration;

use indexmap::IndexMap;
use thermo_gw_msg::{DeviceAddress, DiscoveredDevice};
use tracing::{info, instrument};
use uuid::Uuid;

use crate::{Advertisement, Radio, Result};

/// Devices found by one sweep, keyed by address in first-seen order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceSet {
    devices: IndexMap<DeviceAddress, DiscoveredDevice>,
}

impl DeviceSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `device` unless its address is already present. Returns whether it was added.
    pub fn insert(&mut self, device: DiscoveredDevice) -> bool {
        if self.devices.contains_key(&device.address) {
            return false;
        }
        self.devices.insert(device.address.clone(), device);
        true
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    pub fn contains(&self, address: &DeviceAddress) -> bool {
        self.devices.contains_key(address)
    }

    pub fn iter(&self) -> impl Iterator<Item = &DiscoveredDevice> {
        self.devices.values()
    }
}

impl FromIterator<DiscoveredDevice> for DeviceSet {
    fn from_iter<I: IntoIterator<Item = DiscoveredDevice>>(iter: I) -> Self {
        let mut set = DeviceSet::new();
        for device in iter {
            set.insert(device);
        }
        set
    }
}

impl<'a> IntoIterator for &'a DeviceSet {
    type Item = &'a DiscoveredDevice;
    type IntoIter = indexmap::map::Values<'a, DeviceAddress, DiscoveredDevice>;

    fn into_iter(self) -> Self::IntoIter {
        self.devices.values()
    }
}

/// Runs discovery sweeps and filters them down to one advertised service.
#[derive(Clone)]
pub struct DiscoveryScanner {
    radio: Arc<dyn Radio>,
    scan_duration: Duration,
}

impl DiscoveryScanner {
    pub fn new(radio: Arc<dyn Radio>, scan_duration: Duration) -> Self {
        Self {
            radio,
            scan_duration,
        }
    }

    /// One sweep. An empty result is not an error; a radio failure is.
    #[instrument(name = "discovery", skip(self), fields(service = %target_service))]
    pub async fn discover(&self, target_service: Uuid) -> Result<DeviceSet> {
        let advertisements = self.radio.scan(self.scan_duration).await?;
        let devices = filter_advertisements(advertisements, target_service);
        if devices.is_empty() {
            info!("no devices advertising service");
        } else {
            for device in &devices {
                info!(device_name = %device.name, device_address = %device.address, "found device");
            }
            info!(count = devices.len(), "discovery sweep complete");
        }
        Ok(devices)
    }
}

impl std::fmt::Debug for DiscoveryScanner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiscoveryScanner")
            .field("scan_duration", &self.scan_duration)
            .finish_non_exhaustive()
    }
}

/// Keep advertisements listing `target_service`, collapsing duplicates by address.
pub fn filter_advertisements(
    advertisements: impl IntoIterator<Item = Advertisement>,
    target_service: Uuid,
) -> DeviceSet {
    advertisements
        .into_iter()
        .filter(|advertisement| advertisement.advertises(target_service))
        .map(|advertisement| DiscoveredDevice::new(advertisement.name, advertisement.address))
        .collect()
}

#[cfg(test)]
mod tests {
    use thermo_gw_common::HEALTH_THERMOMETER_SERVICE_UUID;

    use super::*;
    use crate::sim::{SimulatedPeripheral, SimulatedRadio};

    fn advert(name: Option<&str>, address: &str, services: Vec<Uuid>) -> Advertisement {
        Advertisement {
            name: name.map(str::to_owned),
            address: DeviceAddress::new(address),
            services,
        }
    }

    #[test]
    fn keeps_only_target_service_in_first_seen_order() {
        let other = Uuid::from_u128(0x180f);
        let set = filter_advertisements(
            vec![
                advert(Some("B"), "00:00:00:00:00:0B", vec![HEALTH_THERMOMETER_SERVICE_UUID]),
                advert(Some("Battery"), "00:00:00:00:00:0F", vec![other]),
                advert(None, "00:00:00:00:00:0A", vec![other, HEALTH_THERMOMETER_SERVICE_UUID]),
            ],
            HEALTH_THERMOMETER_SERVICE_UUID,
        );
        let names: Vec<_> = set.iter().map(|device| device.name.as_str()).collect();
        assert_eq!(names, ["B", "Unknown"]);
    }

    #[test]
    fn duplicates_collapse_to_first_sighting() {
        let set = filter_advertisements(
            vec![
                advert(Some("First"), "AA", vec![HEALTH_THERMOMETER_SERVICE_UUID]),
                advert(Some("Other"), "BB", vec![HEALTH_THERMOMETER_SERVICE_UUID]),
                advert(Some("Again"), "AA", vec![HEALTH_THERMOMETER_SERVICE_UUID]),
            ],
            HEALTH_THERMOMETER_SERVICE_UUID,
        );
        assert_eq!(set.len(), 2);
        let first = set.iter().next().unwrap();
        assert_eq!(first.name, "First");
        assert!(set.contains(&DeviceAddress::new("BB")));
    }

    #[tokio::test(start_paused = true)]
    async fn discover_returns_empty_set_without_error() {
        let radio = Arc::new(SimulatedRadio::new(Vec::new()));
        let scanner = DiscoveryScanner::new(radio, Duration::from_secs(5));
        let set = scanner.discover(HEALTH_THERMOMETER_SERVICE_UUID).await.unwrap();
        assert!(set.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn discover_propagates_radio_failure() {
        let radio = Arc::new(
            SimulatedRadio::new(vec![SimulatedPeripheral::thermometer("T", "AA", 0, 20)])
                .failing_scans(),
        );
        let scanner = DiscoveryScanner::new(radio, Duration::from_secs(5));
        assert!(scanner.discover(HEALTH_THERMOMETER_SERVICE_UUID).await.is_err());
    }
}
