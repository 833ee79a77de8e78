//! ---
//! tgw_section: "05-networking-external-interfaces"
//! tgw_subsection: "module"
//! tgw_type: "source"
//! tgw_scope: "code"
//! tgw_description: "Bluetooth LE discovery and device sessions."
//! tgw_version: "v0.1.0"
//! tgw_owner: "tbd"
//! ---
//! Radio access for the thermometer gateway.
//!
//! The scheduler only sees [`Radio`] and [`Connection`]; the btleplug-backed
//! implementation talks to the host adapter and [`sim::SimulatedRadio`] replays
//! scripted peripherals.

use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use futures::Stream;
use thermo_gw_msg::DeviceAddress;
use uuid::Uuid;

pub mod adapter;
pub mod hardware;
pub mod scanner;
pub mod session;
pub mod sim;

pub use adapter::bring_up;
pub use hardware::BtleplugRadio;
pub use scanner::{DeviceSet, DiscoveryScanner};
pub use session::{DeviceSession, NoReadingReason, SessionOutcome};
pub use sim::{RadioEvent, SimulatedPeripheral, SimulatedRadio};

pub type Result<T> = std::result::Result<T, BleError>;

/// Raw notification payloads, in arrival order.
pub type NotificationStream = Pin<Box<dyn Stream<Item = Vec<u8>> + Send>>;

#[derive(Debug, thiserror::Error)]
pub enum BleError {
    #[error("bluetooth adapter #{index} is not available")]
    AdapterUnavailable { index: usize },
    #[error("failed to run adapter command `{command}`: {source}")]
    AdapterCommand {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("adapter command `{command}` exited with {status}: {stderr}")]
    AdapterBringUp {
        command: String,
        status: String,
        stderr: String,
    },
    #[error("discovery sweep failed: {0}")]
    Scan(String),
    #[error("peripheral {0} is not known to the adapter")]
    UnknownPeripheral(DeviceAddress),
    #[error("connection to {address} failed: {reason}")]
    Connect {
        address: DeviceAddress,
        reason: String,
    },
    #[error("characteristic {0} not found on peripheral")]
    CharacteristicNotFound(Uuid),
    #[error("bluetooth stack error: {0}")]
    Stack(#[from] ::btleplug::Error),
}

/// One peripheral as seen during a discovery sweep.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Advertisement {
    pub name: Option<String>,
    pub address: DeviceAddress,
    pub services: Vec<Uuid>,
}

impl Advertisement {
    pub fn advertises(&self, service: Uuid) -> bool {
        self.services.contains(&service)
    }
}

/// Access to the local wireless medium.
#[async_trait]
pub trait Radio: Send + Sync {
    /// Sweep for `duration` and report every peripheral observed.
    async fn scan(&self, duration: Duration) -> Result<Vec<Advertisement>>;

    /// Open a connection to the peripheral at `address`.
    async fn connect(&self, address: &DeviceAddress) -> Result<Box<dyn Connection>>;
}

/// Open link to one peripheral.
#[async_trait]
pub trait Connection: Send {
    /// Enable notifications on `characteristic` and return the payload stream.
    async fn subscribe(&mut self, characteristic: Uuid) -> Result<NotificationStream>;

    async fn unsubscribe(&mut self, characteristic: Uuid) -> Result<()>;

    async fn disconnect(&mut self) -> Result<()>;
}
