//! ---
//! tgw_section: "05-networking-external-interfaces"
//! tgw_subsection: "module"
//! tgw_type: "source"
//! tgw_scope: "code"
//! tgw_description: "Bluetooth LE discovery and device sessions."
//! tgw_version: "v0.1.0"
//! tgw_owner: "tbd"
//! ---
//! Scripted radio used by simulation mode and the test suites.
//!
//! Every radio call is appended to an event log so callers can assert on
//! connection ordering.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream;
use parking_lot::Mutex;
use thermo_gw_common::{
    SimulatedDeviceConfig, SimulationConfig, HEALTH_THERMOMETER_SERVICE_UUID,
    TEMPERATURE_MEASUREMENT_UUID,
};
use thermo_gw_msg::DeviceAddress;
use tracing::debug;
use uuid::Uuid;

use crate::{Advertisement, BleError, Connection, NotificationStream, Radio, Result};

const REFUSAL_DELAY: Duration = Duration::from_secs(1);

/// A radio call observed by [`SimulatedRadio`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RadioEvent {
    Scan,
    Connect(DeviceAddress),
    Subscribe(DeviceAddress),
    Unsubscribe(DeviceAddress),
    Disconnect(DeviceAddress),
}

/// Behaviour of one scripted peripheral.
#[derive(Debug, Clone)]
pub struct SimulatedPeripheral {
    pub name: Option<String>,
    pub address: DeviceAddress,
    pub services: Vec<Uuid>,
    pub characteristic: Uuid,
    pub payload: Vec<u8>,
    pub notify_after: Duration,
    pub silent: bool,
    pub fail_connect: bool,
    /// How long a refused connection attempt takes to fail.
    pub connect_failure_after: Duration,
}

impl SimulatedPeripheral {
    /// Health thermometer notifying `[flags, raw_lo, raw_hi]` every 200 ms.
    pub fn thermometer(name: &str, address: &str, flags: u8, raw_value: u16) -> Self {
        let [low, high] = raw_value.to_le_bytes();
        Self {
            name: Some(name.to_owned()),
            address: DeviceAddress::new(address),
            services: vec![HEALTH_THERMOMETER_SERVICE_UUID],
            characteristic: TEMPERATURE_MEASUREMENT_UUID,
            payload: vec![flags, low, high],
            notify_after: Duration::from_millis(200),
            silent: false,
            fail_connect: false,
            connect_failure_after: REFUSAL_DELAY,
        }
    }

    pub fn silent(mut self) -> Self {
        self.silent = true;
        self
    }

    pub fn refusing_connections(mut self) -> Self {
        self.fail_connect = true;
        self
    }

    pub fn with_payload(mut self, payload: Vec<u8>) -> Self {
        self.payload = payload;
        self
    }

    pub fn notify_after(mut self, delay: Duration) -> Self {
        self.notify_after = delay;
        self
    }

    pub fn advertising(mut self, services: Vec<Uuid>) -> Self {
        self.services = services;
        self
    }

    fn advertisement(&self) -> Advertisement {
        Advertisement {
            name: self.name.clone(),
            address: self.address.clone(),
            services: self.services.clone(),
        }
    }
}

impl From<&SimulatedDeviceConfig> for SimulatedPeripheral {
    fn from(config: &SimulatedDeviceConfig) -> Self {
        let [low, high] = config.raw_value.to_le_bytes();
        Self {
            name: config.name.clone(),
            address: DeviceAddress::new(config.address.clone()),
            services: config.services.clone(),
            characteristic: TEMPERATURE_MEASUREMENT_UUID,
            payload: vec![config.flags, low, high],
            notify_after: config.notify_after,
            silent: config.silent,
            fail_connect: config.fail_connect,
            connect_failure_after: REFUSAL_DELAY,
        }
    }
}

/// [`Radio`] backed by scripted peripherals.
///
/// Each scan returns the next entry of the scan script; the last entry repeats.
#[derive(Debug, Default)]
pub struct SimulatedRadio {
    known: Vec<SimulatedPeripheral>,
    scans: Mutex<VecDeque<Vec<SimulatedPeripheral>>>,
    last_scan: Mutex<Vec<SimulatedPeripheral>>,
    fail_scans: bool,
    events: Arc<Mutex<Vec<RadioEvent>>>,
}

impl SimulatedRadio {
    /// Every sweep reports the same `peripherals`.
    pub fn new(peripherals: Vec<SimulatedPeripheral>) -> Self {
        Self::with_scan_script(vec![peripherals])
    }

    /// Successive sweeps report successive entries of `script`.
    pub fn with_scan_script(script: Vec<Vec<SimulatedPeripheral>>) -> Self {
        let mut known: Vec<SimulatedPeripheral> = Vec::new();
        for peripheral in script.iter().flatten() {
            if !known.iter().any(|seen| seen.address == peripheral.address) {
                known.push(peripheral.clone());
            }
        }
        Self {
            known,
            scans: Mutex::new(script.into()),
            ..Self::default()
        }
    }

    pub fn from_config(config: &SimulationConfig) -> Self {
        Self::new(config.devices.iter().map(SimulatedPeripheral::from).collect())
    }

    /// Make every sweep fail as if the adapter were gone.
    pub fn failing_scans(mut self) -> Self {
        self.fail_scans = true;
        self
    }

    pub fn events(&self) -> Vec<RadioEvent> {
        self.events.lock().clone()
    }

    /// Addresses in the order connections were attempted.
    pub fn connect_order(&self) -> Vec<DeviceAddress> {
        self.events
            .lock()
            .iter()
            .filter_map(|event| match event {
                RadioEvent::Connect(address) => Some(address.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn scan_count(&self) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|event| matches!(event, RadioEvent::Scan))
            .count()
    }

    fn record(&self, event: RadioEvent) {
        self.events.lock().push(event);
    }

    fn next_sweep(&self) -> Vec<SimulatedPeripheral> {
        let mut last = self.last_scan.lock();
        if let Some(next) = self.scans.lock().pop_front() {
            *last = next;
        }
        last.clone()
    }
}

#[async_trait]
impl Radio for SimulatedRadio {
    async fn scan(&self, duration: Duration) -> Result<Vec<Advertisement>> {
        self.record(RadioEvent::Scan);
        tokio::time::sleep(duration).await;
        if self.fail_scans {
            return Err(BleError::Scan("simulated adapter failure".to_owned()));
        }
        let sweep = self.next_sweep();
        debug!(observed = sweep.len(), "simulated sweep");
        Ok(sweep.iter().map(SimulatedPeripheral::advertisement).collect())
    }

    async fn connect(&self, address: &DeviceAddress) -> Result<Box<dyn Connection>> {
        self.record(RadioEvent::Connect(address.clone()));
        let peripheral = self
            .known
            .iter()
            .find(|peripheral| &peripheral.address == address)
            .ok_or_else(|| BleError::UnknownPeripheral(address.clone()))?;
        if peripheral.fail_connect {
            tokio::time::sleep(peripheral.connect_failure_after).await;
            return Err(BleError::Connect {
                address: address.clone(),
                reason: "simulated refusal".to_owned(),
            });
        }
        Ok(Box::new(SimulatedConnection {
            peripheral: peripheral.clone(),
            events: self.events.clone(),
        }))
    }
}

struct SimulatedConnection {
    peripheral: SimulatedPeripheral,
    events: Arc<Mutex<Vec<RadioEvent>>>,
}

impl SimulatedConnection {
    fn record(&self, event: fn(DeviceAddress) -> RadioEvent) {
        self.events.lock().push(event(self.peripheral.address.clone()));
    }
}

#[async_trait]
impl Connection for SimulatedConnection {
    async fn subscribe(&mut self, characteristic: Uuid) -> Result<NotificationStream> {
        if characteristic != self.peripheral.characteristic {
            return Err(BleError::CharacteristicNotFound(characteristic));
        }
        self.record(RadioEvent::Subscribe);
        if self.peripheral.silent {
            return Ok(Box::pin(stream::pending::<Vec<u8>>()));
        }
        let payload = self.peripheral.payload.clone();
        let every = self.peripheral.notify_after;
        Ok(Box::pin(stream::unfold(payload, move |payload| async move {
            tokio::time::sleep(every).await;
            Some((payload.clone(), payload))
        })))
    }

    async fn unsubscribe(&mut self, _characteristic: Uuid) -> Result<()> {
        self.record(RadioEvent::Unsubscribe);
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<()> {
        self.record(RadioEvent::Disconnect);
        Ok(())
    }
}
