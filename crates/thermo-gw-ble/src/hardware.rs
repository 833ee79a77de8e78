//! ---
//! tgw_section: "05-networking-external-interfaces"
//! tgw_subsection: "module"
//! tgw_type: "source"
//! tgw_scope: "code"
//! tgw_description: "Bluetooth LE discovery and device sessions."
//! tgw_version: "v0.1.0"
//! tgw_owner: "tbd"
//! ---
use std::hash::Hash;
use std::time::Duration;

use async_trait::async_trait;
use btleplug::api::{Central, CentralEvent, Characteristic, Manager as _, Peripheral as _, ScanFilter};
use btleplug::platform::{Adapter, Manager, Peripheral, PeripheralId};
use futures::{future, Stream, StreamExt};
use indexmap::IndexSet;
use thermo_gw_msg::DeviceAddress;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{Advertisement, BleError, Connection, NotificationStream, Radio, Result};

/// [`Radio`] over the host Bluetooth stack.
#[derive(Debug)]
pub struct BtleplugRadio {
    adapter: Adapter,
}

impl BtleplugRadio {
    /// Open the adapter at position `index` in the platform's adapter list.
    pub async fn open(index: usize) -> Result<Self> {
        let manager = Manager::new().await?;
        let adapter = manager
            .adapters()
            .await?
            .into_iter()
            .nth(index)
            .ok_or(BleError::AdapterUnavailable { index })?;
        match adapter.adapter_info().await {
            Ok(adapter_info) => info!(index, adapter = %adapter_info, "bluetooth adapter opened"),
            Err(err) => warn!(index, error = %err, "adapter opened but info unavailable"),
        }
        Ok(Self { adapter })
    }

    async fn find(&self, address: &DeviceAddress) -> Result<Peripheral> {
        self.adapter
            .peripherals()
            .await?
            .into_iter()
            .find(|peripheral| peripheral.address().to_string() == address.as_str())
            .ok_or_else(|| BleError::UnknownPeripheral(address.clone()))
    }
}

#[async_trait]
impl Radio for BtleplugRadio {
    async fn scan(&self, duration: Duration) -> Result<Vec<Advertisement>> {
        // Subscribe before scanning so early advertisements are not missed.
        let events = self
            .adapter
            .events()
            .await
            .map_err(|err| BleError::Scan(err.to_string()))?;
        self.adapter
            .start_scan(ScanFilter::default())
            .await
            .map_err(|err| BleError::Scan(err.to_string()))?;
        let sighted = collect_sightings(
            events.filter_map(|event| future::ready(sighting(event))),
            duration,
        )
        .await;
        if let Err(err) = self.adapter.stop_scan().await {
            warn!(error = %err, "failed to stop scan");
        }
        debug!(sighted = sighted.len(), "scan window closed");

        // The adapter's peripheral list also holds devices cached from earlier
        // sweeps; only those heard during this window are reported.
        let mut advertisements = Vec::with_capacity(sighted.len());
        for id in sighted {
            let peripheral = match self.adapter.peripheral(&id).await {
                Ok(peripheral) => peripheral,
                Err(err) => {
                    debug!(error = %err, "sighted peripheral no longer known to adapter");
                    continue;
                }
            };
            match peripheral.properties().await {
                Ok(Some(properties)) => advertisements.push(Advertisement {
                    name: properties.local_name,
                    address: DeviceAddress::new(properties.address.to_string()),
                    services: properties.services,
                }),
                Ok(None) => {}
                Err(err) => debug!(error = %err, "skipping peripheral without properties"),
            }
        }
        Ok(advertisements)
    }

    async fn connect(&self, address: &DeviceAddress) -> Result<Box<dyn Connection>> {
        let peripheral = self.find(address).await?;
        peripheral.connect().await.map_err(|err| BleError::Connect {
            address: address.clone(),
            reason: err.to_string(),
        })?;
        Ok(Box::new(BtleplugConnection {
            peripheral,
            subscribed: None,
        }))
    }
}

struct BtleplugConnection {
    peripheral: Peripheral,
    subscribed: Option<Characteristic>,
}

#[async_trait]
impl Connection for BtleplugConnection {
    async fn subscribe(&mut self, characteristic: Uuid) -> Result<NotificationStream> {
        self.peripheral.discover_services().await?;
        let target = self
            .peripheral
            .characteristics()
            .into_iter()
            .find(|candidate| candidate.uuid == characteristic)
            .ok_or(BleError::CharacteristicNotFound(characteristic))?;

        // Open the stream before enabling notifications so the first one is not lost.
        let notifications = self.peripheral.notifications().await?;
        self.peripheral.subscribe(&target).await?;
        self.subscribed = Some(target);

        Ok(Box::pin(notifications.filter_map(move |notification| {
            future::ready((notification.uuid == characteristic).then_some(notification.value))
        })))
    }

    async fn unsubscribe(&mut self, _characteristic: Uuid) -> Result<()> {
        if let Some(target) = self.subscribed.take() {
            self.peripheral.unsubscribe(&target).await?;
        }
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<()> {
        self.peripheral.disconnect().await?;
        Ok(())
    }
}

/// Peripheral an advertisement-bearing event was heard from.
fn sighting(event: CentralEvent) -> Option<PeripheralId> {
    match event {
        CentralEvent::DeviceDiscovered(id)
        | CentralEvent::DeviceUpdated(id)
        | CentralEvent::ServicesAdvertisement { id, .. }
        | CentralEvent::ServiceDataAdvertisement { id, .. }
        | CentralEvent::ManufacturerDataAdvertisement { id, .. } => Some(id),
        _ => None,
    }
}

/// Distinct ids seen on `sightings` within `window`, in first-heard order.
async fn collect_sightings<S, T>(sightings: S, window: Duration) -> IndexSet<T>
where
    S: Stream<Item = T>,
    T: Hash + Eq,
{
    let deadline = tokio::time::Instant::now() + window;
    let mut sightings = std::pin::pin!(sightings);
    let mut seen = IndexSet::new();
    loop {
        tokio::select! {
            next = sightings.next() => match next {
                Some(id) => {
                    seen.insert(id);
                }
                None => {
                    // Event source gone; keep the sweep the configured length.
                    tokio::time::sleep_until(deadline).await;
                    break;
                }
            },
            _ = tokio::time::sleep_until(deadline) => break,
        }
    }
    seen
}
